//! Sequential workflow engine with durable checkpointing, retry, and failover.
//!
//! `WorkflowEngine` drives one run per `execute` call. Steps run strictly in
//! declaration order, since later steps read earlier outputs through the
//! shared `ExecutionContext`. Every step transition is checkpointed before the
//! engine moves on.
//!
//! # Step flow
//!
//! 1. Evaluate the step `condition`; a falsy result checkpoints SKIPPED.
//! 2. Resolve `{{ }}` templates in the step inputs.
//! 3. Walk the attempt plan: the primary action `1 + max_retries` times, then
//!    each fallback provider once. Every attempt checkpoints RUNNING first.
//! 4. The first success stores the output and checkpoints COMPLETED.
//! 5. Exhaustion checkpoints FAILED and, unless the step continues on error,
//!    fails the run.

use std::sync::Arc;
use std::time::Instant;

use conductor_types::execution::{
    ExecutionRecord, ExecutionStatus, RESUME_INDEX_KEY, RESUMED_FROM_KEY, StepStatus,
};
use conductor_types::workflow::{StepAction, Workflow, WorkflowStep};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::Instrument;
use uuid::Uuid;

use crate::repository::state::StateStore;
use crate::routing::health::{FailoverHistory, HealthTracker};

use super::checkpoint::{CheckpointError, CheckpointManager, StepCheckpointer};
use super::context::ExecutionContext;
use super::expression::ConditionEvaluator;
use super::logger::{ExecutionLogger, GuardedLogger, LogLevel, TracingExecutionLogger};
use super::registry::{RegistryError, SdkRegistry};
use super::retry::{AttemptKind, RetryHandler};
use super::template::{PathTemplateRenderer, TemplateRenderer, resolve_inputs};

// ---------------------------------------------------------------------------
// Step executor port
// ---------------------------------------------------------------------------

/// Per-attempt information handed to the step executor.
#[derive(Debug, Clone)]
pub struct ExecutorContext {
    pub run_id: String,
    pub step_index: u32,
    /// Zero-based attempt number across retries and failover.
    pub attempt: u32,
    /// The action to perform. Differs from `step.action` during failover.
    pub action: StepAction,
    /// Step inputs with templates resolved.
    pub inputs: Map<String, Value>,
}

impl ExecutorContext {
    pub fn is_failover(&self, step: &WorkflowStep) -> bool {
        self.action.provider != step.action.provider
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("step timed out after {0} ms")]
    Timeout(u64),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Performs the work of a single step attempt.
///
/// Timeouts are the executor's concern; the engine treats them as ordinary
/// failures.
pub trait StepExecutor: Send + Sync {
    fn execute<R: SdkRegistry>(
        &self,
        step: &WorkflowStep,
        context: &ExecutionContext,
        registry: &R,
        exec: &ExecutorContext,
    ) -> impl std::future::Future<Output = Result<Value, StepError>> + Send;
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub step_index: u32,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    /// Provider of the last attempt, if the step ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// Outcome of a run. Always produced, even when the run fails.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub run_id: String,
    pub status: ExecutionStatus,
    pub step_results: Vec<StepResult>,
    pub outputs: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Reuse an id. An interrupted (PENDING or RUNNING) record with this id
    /// is resumed in place; a finished one is left untouched and the run fails.
    pub run_id: Option<String>,
    /// First step index to execute.
    pub resume_from: Option<u32>,
    pub workflow_path: Option<String>,
    /// Initial `variables` of the context.
    pub variables: Map<String, Value>,
    /// Finished run this one continues. Its completed step outputs seed the
    /// context and the link is kept in `metadata.resumed_from`.
    pub resumed_from: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("tool registration failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("run '{run_id}' belongs to workflow '{expected}', not '{found}'")]
    WorkflowMismatch {
        run_id: String,
        expected: String,
        found: String,
    },

    #[error("step '{step_id}' failed: {error}")]
    StepFailed { step_id: String, error: String },
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

pub struct WorkflowEngine<S: StateStore> {
    checkpoint: CheckpointManager<S>,
    evaluator: ConditionEvaluator,
    renderer: Arc<dyn TemplateRenderer>,
    logger: Arc<dyn ExecutionLogger>,
    health: Arc<HealthTracker>,
    failovers: FailoverHistory,
}

impl<S: StateStore> WorkflowEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            checkpoint: CheckpointManager::new(store),
            evaluator: ConditionEvaluator::new(),
            renderer: Arc::new(PathTemplateRenderer),
            logger: Arc::new(TracingExecutionLogger),
            health: Arc::new(HealthTracker::new()),
            failovers: FailoverHistory::new(),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn ExecutionLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Share a health tracker with a router or another engine.
    pub fn with_health(mut self, health: Arc<HealthTracker>) -> Self {
        self.health = health;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        self.checkpoint.store()
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Every failover attempt made by this engine instance.
    pub fn failover_history(&self) -> Vec<conductor_types::agent::FailoverEvent> {
        self.failovers.events()
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Run `workflow` to completion. Never fails: problems end up in the
    /// returned result's `status` and `error`.
    pub async fn execute<R, E>(
        &self,
        workflow: &Workflow,
        inputs: Map<String, Value>,
        registry: &R,
        executor: &E,
        options: ExecuteOptions,
    ) -> ExecutionResult
    where
        R: SdkRegistry,
        E: StepExecutor,
    {
        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let span = tracing::info_span!("workflow_run", run_id = %run_id, workflow_id = %workflow.id());
        self.execute_inner(workflow, inputs, registry, executor, options, run_id)
            .instrument(span)
            .await
    }

    /// Continue a persisted run from its resume point.
    ///
    /// An interrupted run (PENDING or RUNNING) continues in place under its
    /// own `run_id`. A finished run is never modified: a continuation run with
    /// a fresh id starts at the resume point, seeded with the completed step
    /// outputs of the original.
    pub async fn resume<R, E>(
        &self,
        run_id: &str,
        workflow: &Workflow,
        registry: &R,
        executor: &E,
    ) -> Result<ExecutionResult, ExecutorError>
    where
        R: SdkRegistry,
        E: StepExecutor,
    {
        let continuation_id = Uuid::now_v7().to_string();
        self.resume_as(run_id, &continuation_id, workflow, registry, executor)
            .await
    }

    /// Like [`resume`](Self::resume), with a caller-chosen id for the
    /// continuation run. `continuation_id` is unused when `run_id` was
    /// interrupted and continues in place.
    pub async fn resume_as<R, E>(
        &self,
        run_id: &str,
        continuation_id: &str,
        workflow: &Workflow,
        registry: &R,
        executor: &E,
    ) -> Result<ExecutionResult, ExecutorError>
    where
        R: SdkRegistry,
        E: StepExecutor,
    {
        let state = self.checkpoint.load_resume_state(run_id).await?;
        if state.record.workflow_id != workflow.id() {
            return Err(ExecutorError::WorkflowMismatch {
                run_id: run_id.to_string(),
                expected: state.record.workflow_id,
                found: workflow.id().to_string(),
            });
        }

        let inputs = match state.record.inputs {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let variables = state
            .record
            .metadata
            .as_ref()
            .and_then(|m| m.get("variables"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let options = if state.record.status.is_terminal() {
            tracing::info!(
                run_id = continuation_id,
                previous_run_id = run_id,
                previous_status = %state.record.status,
                resume_from = state.resume_from,
                "continuing finished workflow run"
            );
            ExecuteOptions {
                run_id: Some(continuation_id.to_string()),
                resume_from: Some(state.resume_from),
                workflow_path: Some(state.record.workflow_path),
                variables,
                resumed_from: Some(run_id.to_string()),
            }
        } else {
            tracing::info!(run_id, resume_from = state.resume_from, "resuming interrupted workflow run");
            ExecuteOptions {
                run_id: Some(run_id.to_string()),
                resume_from: Some(state.resume_from),
                workflow_path: Some(state.record.workflow_path),
                variables,
                resumed_from: None,
            }
        };
        Ok(self
            .execute(workflow, inputs, registry, executor, options)
            .await)
    }

    // -----------------------------------------------------------------------
    // Run driver
    // -----------------------------------------------------------------------

    async fn execute_inner<R, E>(
        &self,
        workflow: &Workflow,
        inputs: Map<String, Value>,
        registry: &R,
        executor: &E,
        options: ExecuteOptions,
        run_id: String,
    ) -> ExecutionResult
    where
        R: SdkRegistry,
        E: StepExecutor,
    {
        let logger = GuardedLogger(self.logger.as_ref());
        let start_index = options.resume_from.unwrap_or(0);

        let mut ctx = match self.open_run(workflow, &inputs, &options, &run_id).await {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!(error = %e, "failed to record run start");
                return ExecutionResult {
                    run_id,
                    status: ExecutionStatus::Failed,
                    step_results: Vec::new(),
                    outputs: json!({}),
                    error: Some(e.to_string()),
                };
            }
        };

        logger.start(&run_id, workflow.id());
        tracing::info!(
            steps = workflow.steps.len(),
            start_index,
            "starting workflow execution"
        );

        let run_start = Instant::now();
        let mut step_results = Vec::new();
        let outcome = match registry.register_tools(&workflow.tools).await {
            Ok(()) => {
                self.run_steps(workflow, &mut ctx, start_index, registry, executor, &mut step_results)
                    .await
            }
            Err(e) => Err(ExecutorError::Registry(e)),
        };

        let (status, error) = match outcome {
            Ok(()) => (ExecutionStatus::Completed, None),
            Err(e) => (ExecutionStatus::Failed, Some(e.to_string())),
        };
        let outputs = ctx.outputs();

        if let Err(e) = self
            .checkpoint
            .finish_run(&run_id, status, outputs.clone(), error.clone())
            .await
        {
            tracing::error!(error = %e, "failed to record run completion");
        }
        logger.finish(&run_id, status == ExecutionStatus::Completed, Some(&outputs), error.as_deref());

        tracing::info!(
            status = %status,
            duration_ms = run_start.elapsed().as_millis() as u64,
            steps_run = step_results.len(),
            "workflow execution finished"
        );

        ExecutionResult {
            run_id,
            status,
            step_results,
            outputs,
            error,
        }
    }

    /// Create the run record, or reopen it when `run_id` names an interrupted
    /// run. A finished record is rejected without being written.
    async fn open_run(
        &self,
        workflow: &Workflow,
        inputs: &Map<String, Value>,
        options: &ExecuteOptions,
        run_id: &str,
    ) -> Result<ExecutionContext, CheckpointError> {
        let existing = match options.run_id {
            Some(_) => self
                .checkpoint
                .store()
                .get_execution(run_id)
                .await
                .map_err(|e| CheckpointError::Repository(e.to_string()))?,
            None => None,
        };
        let step_ids: Vec<&str> = workflow.steps.iter().map(|s| s.id.as_str()).collect();

        if let Some(record) = existing {
            if record.status.is_terminal() {
                return Err(CheckpointError::RunFinished {
                    run_id: run_id.to_string(),
                    status: record.status,
                });
            }
            let checkpoints = self.checkpoint.lineage_checkpoints(run_id).await?;
            self.checkpoint.reopen_run(run_id).await?;
            return Ok(ExecutionContext::restore(
                run_id,
                workflow.id(),
                inputs.clone(),
                options.variables.clone(),
                &checkpoints,
                &step_ids,
            ));
        }

        let mut record = ExecutionRecord::start(
            run_id,
            workflow.id(),
            options.workflow_path.clone().unwrap_or_default(),
            workflow.steps.len() as u32,
            Some(Value::Object(inputs.clone())),
        );
        let mut metadata = Map::new();
        if !options.variables.is_empty() {
            metadata.insert("variables".into(), Value::Object(options.variables.clone()));
        }
        if let Some(previous) = &options.resumed_from {
            metadata.insert(RESUMED_FROM_KEY.into(), json!(previous));
            metadata.insert(RESUME_INDEX_KEY.into(), json!(options.resume_from.unwrap_or(0)));
        }
        if !metadata.is_empty() {
            record.metadata = Some(Value::Object(metadata));
        }
        self.checkpoint.start_run(&record).await?;

        let inherited = match &options.resumed_from {
            Some(previous) => self.checkpoint.lineage_checkpoints(previous).await?,
            None => Vec::new(),
        };
        Ok(ExecutionContext::restore(
            run_id,
            workflow.id(),
            inputs.clone(),
            options.variables.clone(),
            &inherited,
            &step_ids,
        ))
    }

    async fn run_steps<R, E>(
        &self,
        workflow: &Workflow,
        ctx: &mut ExecutionContext,
        start_index: u32,
        registry: &R,
        executor: &E,
        step_results: &mut Vec<StepResult>,
    ) -> Result<(), ExecutorError>
    where
        R: SdkRegistry,
        E: StepExecutor,
    {
        let logger = GuardedLogger(self.logger.as_ref());

        for (index, step) in workflow.steps.iter().enumerate().skip(start_index as usize) {
            let step_index = index as u32;
            if let Err(e) = self.checkpoint.progress(&ctx.run_id, step_index).await {
                tracing::warn!(step_index, error = %e, "failed to record progress");
            }

            let result = self
                .run_step(workflow, step, step_index, ctx, registry, executor)
                .await?;

            let level = match result.status {
                StepStatus::Failed => LogLevel::Error,
                _ => LogLevel::Info,
            };
            logger.log(
                &ctx.run_id,
                level,
                &format!("step '{}' {}", step.id, result.status.as_str()),
                Some(&json!({ "retry_count": result.retry_count, "error": result.error })),
            );

            let failed = result.status == StepStatus::Failed;
            let error = result.error.clone().unwrap_or_default();
            step_results.push(result);

            if failed {
                if step.continues_on_error() {
                    tracing::warn!(step_id = %step.id, error = %error, "step failed, continuing");
                    continue;
                }
                return Err(ExecutorError::StepFailed {
                    step_id: step.id.clone(),
                    error,
                });
            }
        }
        Ok(())
    }

    /// Drive one step to a terminal checkpoint. Only checkpoint failures are
    /// returned as `Err`; step failures are reported in the `StepResult`.
    async fn run_step<R, E>(
        &self,
        workflow: &Workflow,
        step: &WorkflowStep,
        step_index: u32,
        ctx: &mut ExecutionContext,
        registry: &R,
        executor: &E,
    ) -> Result<StepResult, ExecutorError>
    where
        R: SdkRegistry,
        E: StepExecutor,
    {
        let checkpointer = StepCheckpointer::new(&ctx.run_id, step_index, step.display_name());
        let failed = |error: String, retry_count: u32, agent: Option<String>| StepResult {
            step_id: step.id.clone(),
            step_index,
            status: StepStatus::Failed,
            output: None,
            error: Some(error),
            retry_count,
            agent,
        };

        if let Some(condition) = &step.condition {
            match self.evaluator.evaluate_condition(condition, ctx) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(step_id = %step.id, "condition false, skipping step");
                    self.checkpoint
                        .checkpoint_step(&checkpointer.build(StepStatus::Skipped, 0, None, None, None))
                        .await?;
                    return Ok(StepResult {
                        step_id: step.id.clone(),
                        step_index,
                        status: StepStatus::Skipped,
                        output: None,
                        error: None,
                        retry_count: 0,
                        agent: None,
                    });
                }
                Err(e) => {
                    let error = format!("condition evaluation failed: {e}");
                    self.checkpoint
                        .checkpoint_step(&checkpointer.build(StepStatus::Failed, 0, None, None, Some(error.clone())))
                        .await?;
                    return Ok(failed(error, 0, None));
                }
            }
        }

        let inputs = match resolve_inputs(
            self.renderer.as_ref(),
            &step.inputs,
            &ctx.to_expression_context(),
        ) {
            Ok(inputs) => inputs,
            Err(e) => {
                let error = format!("input resolution failed: {e}");
                self.checkpoint
                    .checkpoint_step(&checkpointer.build(StepStatus::Failed, 0, None, None, Some(error.clone())))
                    .await?;
                return Ok(failed(error, 0, None));
            }
        };
        let inputs_value = Value::Object(inputs.clone());

        let plan = RetryHandler::plan(step, workflow.failover_for(step));
        let mut last_error = String::new();
        let mut last_agent = None;

        for (attempt_no, attempt) in plan.iter().enumerate() {
            let attempt_no = attempt_no as u32;
            if !attempt.delay.is_zero() {
                tokio::time::sleep(attempt.delay).await;
            }

            self.checkpoint
                .checkpoint_step(&checkpointer.build(
                    StepStatus::Running,
                    attempt_no,
                    Some(inputs_value.clone()),
                    None,
                    None,
                ))
                .await?;

            let exec = ExecutorContext {
                run_id: ctx.run_id.clone(),
                step_index,
                attempt: attempt_no,
                action: attempt.action.clone(),
                inputs: inputs.clone(),
            };
            let provider = attempt.action.provider.as_str();
            last_agent = Some(provider.to_string());
            tracing::debug!(
                step_id = %step.id,
                action = %attempt.action,
                attempt = attempt_no,
                failover = exec.is_failover(step),
                "invoking step"
            );

            let started = Instant::now();
            let outcome = executor.execute(step, ctx, registry, &exec).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(output) => {
                    self.health.mark_healthy(provider, latency_ms);
                    if let AttemptKind::Failover { from } = &attempt.kind {
                        self.failovers.record(from, provider, &last_error, true);
                    }

                    ctx.set_step_output(&step.id, output);
                    let stored = ctx.step_output(&step.id).cloned();
                    self.checkpoint
                        .checkpoint_step(&checkpointer.build(
                            StepStatus::Completed,
                            attempt_no,
                            Some(inputs_value),
                            stored.clone(),
                            None,
                        ))
                        .await?;

                    tracing::debug!(step_id = %step.id, action = %attempt.action, attempt = attempt_no, "step completed");
                    return Ok(StepResult {
                        step_id: step.id.clone(),
                        step_index,
                        status: StepStatus::Completed,
                        output: stored,
                        error: None,
                        retry_count: attempt_no,
                        agent: last_agent,
                    });
                }
                Err(e) => {
                    let error = e.to_string();
                    self.health.mark_unhealthy(provider, &error);
                    if let AttemptKind::Failover { from } = &attempt.kind {
                        self.failovers.record(from, provider, &last_error, false);
                    }
                    tracing::warn!(
                        step_id = %step.id,
                        action = %attempt.action,
                        attempt = attempt_no,
                        error = %error,
                        "step attempt failed"
                    );
                    last_error = error;
                }
            }
        }

        let retry_count = plan.len().saturating_sub(1) as u32;
        self.checkpoint
            .checkpoint_step(&checkpointer.build(
                StepStatus::Failed,
                retry_count,
                Some(inputs_value),
                None,
                Some(last_error.clone()),
            ))
            .await?;
        Ok(failed(last_error, retry_count, last_agent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use conductor_types::error::RepositoryError;
    use conductor_types::execution::{
        ExecutionFilter, ExecutionStats, ExecutionUpdate, StepCheckpoint,
    };
    use conductor_types::workflow::{FailoverConfig, RetryPolicy, ToolConfig, WorkflowMetadata};

    use crate::engine::registry::InMemorySdkRegistry;
    use crate::store::InMemoryStateStore;

    // -----------------------------------------------------------------------
    // Test executors
    // -----------------------------------------------------------------------

    /// Fails for providers in `failing`, otherwise echoes the action and inputs.
    #[derive(Default)]
    struct ScriptedExecutor {
        failing: Vec<String>,
        /// Remaining failures per step id before it starts succeeding.
        flaky: Mutex<HashMap<String, u32>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn failing(providers: &[&str]) -> Self {
            Self {
                failing: providers.iter().map(|p| p.to_string()).collect(),
                ..Default::default()
            }
        }

        fn flaky(step_id: &str, failures: u32) -> Self {
            let exec = Self::default();
            exec.flaky.lock().unwrap().insert(step_id.to_string(), failures);
            exec
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl StepExecutor for ScriptedExecutor {
        async fn execute<R: SdkRegistry>(
            &self,
            step: &WorkflowStep,
            _context: &ExecutionContext,
            _registry: &R,
            exec: &ExecutorContext,
        ) -> Result<Value, StepError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:{}", step.id, exec.action));

            if self.failing.contains(&exec.action.provider) {
                return Err(StepError::failed(format!("{} is down", exec.action.provider)));
            }
            {
                let mut flaky = self.flaky.lock().unwrap();
                if let Some(remaining) = flaky.get_mut(&step.id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(StepError::failed("transient"));
                    }
                }
            }
            Ok(json!({ "action": exec.action.to_string(), "inputs": exec.inputs }))
        }
    }

    /// In-memory store whose `fail_on`-th checkpoint write (1-based) fails.
    struct FailingCheckpointStore {
        inner: InMemoryStateStore,
        fail_on: u32,
        saves: AtomicU32,
    }

    impl FailingCheckpointStore {
        fn new(fail_on: u32) -> Self {
            Self {
                inner: InMemoryStateStore::new(),
                fail_on,
                saves: AtomicU32::new(0),
            }
        }
    }

    impl StateStore for FailingCheckpointStore {
        async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
            self.inner.create_execution(record).await
        }

        async fn update_execution(
            &self,
            run_id: &str,
            update: &ExecutionUpdate,
        ) -> Result<(), RepositoryError> {
            self.inner.update_execution(run_id, update).await
        }

        async fn get_execution(&self, run_id: &str) -> Result<Option<ExecutionRecord>, RepositoryError> {
            self.inner.get_execution(run_id).await
        }

        async fn list_executions(
            &self,
            filter: &ExecutionFilter,
        ) -> Result<Vec<ExecutionRecord>, RepositoryError> {
            self.inner.list_executions(filter).await
        }

        async fn delete_execution(&self, run_id: &str) -> Result<bool, RepositoryError> {
            self.inner.delete_execution(run_id).await
        }

        async fn get_stats(&self, workflow_id: Option<&str>) -> Result<ExecutionStats, RepositoryError> {
            self.inner.get_stats(workflow_id).await
        }

        async fn cleanup(&self, retention_days: u32) -> Result<u64, RepositoryError> {
            self.inner.cleanup(retention_days).await
        }

        async fn save_checkpoint(&self, checkpoint: &StepCheckpoint) -> Result<(), RepositoryError> {
            let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_on {
                return Err(RepositoryError::Query("disk full".to_string()));
            }
            self.inner.save_checkpoint(checkpoint).await
        }

        async fn get_checkpoints(&self, run_id: &str) -> Result<Vec<StepCheckpoint>, RepositoryError> {
            self.inner.get_checkpoints(run_id).await
        }

        async fn get_last_checkpoint(
            &self,
            run_id: &str,
        ) -> Result<Option<StepCheckpoint>, RepositoryError> {
            self.inner.get_last_checkpoint(run_id).await
        }
    }

    fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
        Workflow {
            metadata: WorkflowMetadata {
                id: "wf".to_string(),
                name: "Test".to_string(),
                description: None,
                version: None,
            },
            steps,
            tools: HashMap::new(),
            triggers: Vec::new(),
            failover: None,
        }
    }

    fn step(id: &str, action: &str) -> WorkflowStep {
        WorkflowStep::new(id, StepAction::parse(action).unwrap())
    }

    fn engine() -> WorkflowEngine<InMemoryStateStore> {
        WorkflowEngine::new(Arc::new(InMemoryStateStore::new()))
    }

    fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Happy path
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_sequential_steps_see_prior_outputs() {
        let engine = engine();
        let mut second = step("post", "slack.post");
        second
            .inputs
            .insert("text".into(), json!("{{ steps.fetch.action }} for {{ inputs.user }}"));
        let wf = workflow(vec![step("fetch", "http.get"), second]);

        let result = engine
            .execute(
                &wf,
                inputs(json!({"user": "ada"})),
                &InMemorySdkRegistry::new(),
                &ScriptedExecutor::default(),
                ExecuteOptions::default(),
            )
            .await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.step_results.len(), 2);
        assert_eq!(
            result.outputs["post"]["inputs"]["text"],
            json!("http.get for ada")
        );

        let record = engine.store().get_execution(&result.run_id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.current_step, 1);
        assert!(record.completed_at.is_some());

        let checkpoints = engine.store().get_checkpoints(&result.run_id).await.unwrap();
        assert_eq!(checkpoints.len(), 2);
        assert!(checkpoints.iter().all(|c| c.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn test_false_condition_skips_step() {
        let engine = engine();
        let mut gated = step("notify", "slack.post");
        gated.condition = Some("inputs.notify == true".to_string());
        let wf = workflow(vec![gated, step("after", "http.get")]);

        let result = engine
            .execute(
                &wf,
                inputs(json!({"notify": false})),
                &InMemorySdkRegistry::new(),
                &ScriptedExecutor::default(),
                ExecuteOptions::default(),
            )
            .await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.step_results[0].status, StepStatus::Skipped);
        assert_eq!(result.step_results[1].status, StepStatus::Completed);
        let cps = engine.store().get_checkpoints(&result.run_id).await.unwrap();
        assert_eq!(cps[0].status, StepStatus::Skipped);
    }

    // -----------------------------------------------------------------------
    // Retry / failover
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_retry_then_success_counts_retries() {
        let engine = engine();
        let mut flaky = step("flaky", "svc.op");
        flaky.retry = Some(RetryPolicy {
            max_retries: 3,
            delay_ms: 0,
            backoff_multiplier: 2.0,
        });
        let wf = workflow(vec![flaky]);
        let executor = ScriptedExecutor::flaky("flaky", 2);

        let result = engine
            .execute(&wf, Map::new(), &InMemorySdkRegistry::new(), &executor, ExecuteOptions::default())
            .await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.step_results[0].retry_count, 2);
        assert_eq!(executor.calls().len(), 3);
        let cp = engine.store().get_last_checkpoint(&result.run_id).await.unwrap().unwrap();
        assert_eq!(cp.retry_count, 2);
        assert!(engine.failover_history().is_empty());
    }

    #[tokio::test]
    async fn test_failover_to_fallback_records_one_event() {
        let engine = engine();
        let mut primary = step("summarize", "primary.op");
        primary.retry = Some(RetryPolicy::default());
        primary.failover = Some(FailoverConfig {
            fallback_agents: vec!["fallback".to_string()],
            max_failover_attempts: 1,
        });
        let wf = workflow(vec![primary]);
        let executor = ScriptedExecutor::failing(&["primary"]);

        let result = engine
            .execute(&wf, Map::new(), &InMemorySdkRegistry::new(), &executor, ExecuteOptions::default())
            .await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.step_results[0].status, StepStatus::Completed);
        assert_eq!(result.step_results[0].agent.as_deref(), Some("fallback"));
        assert_eq!(result.outputs["summarize"]["action"], json!("fallback.op"));

        let history = engine.failover_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_agent, "primary");
        assert_eq!(history[0].to_agent, "fallback");
        assert!(history[0].succeeded);
        assert!(history[0].reason.contains("primary is down"));

        assert!(!engine.health().is_healthy("primary"));
        assert!(engine.health().is_healthy("fallback"));
        assert_eq!(executor.calls(), vec!["summarize:primary.op", "summarize:fallback.op"]);
    }

    #[tokio::test]
    async fn test_exhausted_failover_fails_run_and_keeps_outputs() {
        let engine = engine();
        let mut doomed = step("doomed", "a.op");
        doomed.failover = Some(FailoverConfig {
            fallback_agents: vec!["b".to_string(), "c".to_string()],
            max_failover_attempts: 2,
        });
        let wf = workflow(vec![step("first", "ok.op"), doomed, step("never", "ok.op")]);
        let executor = ScriptedExecutor::failing(&["a", "b", "c"]);

        let result = engine
            .execute(&wf, Map::new(), &InMemorySdkRegistry::new(), &executor, ExecuteOptions::default())
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.step_results.len(), 2);
        assert_eq!(result.step_results[1].retry_count, 2);
        assert!(result.error.as_deref().unwrap().contains("doomed"));
        assert!(result.outputs.get("first").is_some());

        let history = engine.failover_history();
        assert_eq!(history.len(), 2);
        assert_eq!((history[1].from_agent.as_str(), history[1].to_agent.as_str()), ("b", "c"));
        assert!(history.iter().all(|e| !e.succeeded));

        let record = engine.store().get_execution(&result.run_id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(!executor.calls().iter().any(|c| c.starts_with("never")));
    }

    #[tokio::test]
    async fn test_workflow_level_failover_default() {
        let engine = engine();
        let mut wf = workflow(vec![step("s", "down.op")]);
        wf.failover = Some(FailoverConfig {
            fallback_agents: vec!["up".to_string()],
            max_failover_attempts: 1,
        });

        let result = engine
            .execute(
                &wf,
                Map::new(),
                &InMemorySdkRegistry::new(),
                &ScriptedExecutor::failing(&["down"]),
                ExecuteOptions::default(),
            )
            .await;
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(engine.failover_history().len(), 1);
    }

    // -----------------------------------------------------------------------
    // Error policy
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_continue_on_error_keeps_going() {
        let engine = engine();
        let mut soft = step("soft", "down.op");
        soft.continue_on_error = Some(true);
        let wf = workflow(vec![soft, step("next", "up.op")]);

        let result = engine
            .execute(
                &wf,
                Map::new(),
                &InMemorySdkRegistry::new(),
                &ScriptedExecutor::failing(&["down"]),
                ExecuteOptions::default(),
            )
            .await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.step_results[0].status, StepStatus::Failed);
        assert_eq!(result.step_results[1].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_unresolved_template_fails_step_without_invoking() {
        let engine = engine();
        let mut bad = step("bad", "svc.op");
        bad.inputs.insert("x".into(), json!("{{ steps.nope.value }}"));
        let wf = workflow(vec![bad]);
        let executor = ScriptedExecutor::default();

        let result = engine
            .execute(&wf, Map::new(), &InMemorySdkRegistry::new(), &executor, ExecuteOptions::default())
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.step_results[0].error.as_deref().unwrap().contains("steps.nope.value"));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_tool_fails_before_any_step() {
        let engine = engine();
        let mut wf = workflow(vec![step("s", "svc.op")]);
        wf.tools.insert(
            "github".to_string(),
            ToolConfig {
                required: true,
                config: json!({}),
            },
        );
        let executor = ScriptedExecutor::default();

        let result = engine
            .execute(&wf, Map::new(), &InMemorySdkRegistry::new(), &executor, ExecuteOptions::default())
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("github"));
        assert!(result.step_results.is_empty());
        assert!(executor.calls().is_empty());
        let record = engine.store().get_execution(&result.run_id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
    }

    // -----------------------------------------------------------------------
    // Resume
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_checkpoint_write_failure_stops_the_run() {
        // Writes: first RUNNING, first COMPLETED, second RUNNING, second COMPLETED.
        let engine = WorkflowEngine::new(Arc::new(FailingCheckpointStore::new(4)));
        let wf = workflow(vec![
            step("first", "ok.op"),
            step("second", "ok.op"),
            step("third", "ok.op"),
        ]);
        let executor = ScriptedExecutor::default();

        let result = engine
            .execute(&wf, Map::new(), &InMemorySdkRegistry::new(), &executor, ExecuteOptions::default())
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("disk full"));
        assert_eq!(executor.calls(), vec!["first:ok.op", "second:ok.op"]);
        assert_eq!(result.step_results.len(), 1);

        let cps = engine.store().get_checkpoints(&result.run_id).await.unwrap();
        assert_eq!(cps.len(), 2);
        assert_eq!(cps[0].status, StepStatus::Completed);
        assert_eq!(cps[0].outputs, result.step_results[0].output);
        assert_eq!(cps[1].status, StepStatus::Running);

        let record = engine.store().get_execution(&result.run_id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(engine.store().get_resume_point(&result.run_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resume_failed_run_continues_under_new_id() {
        let engine = engine();
        let mut second = step("second", "svc.op");
        second.inputs.insert("prev".into(), json!("{{ steps.first.action }}"));
        let wf = workflow(vec![step("first", "ok.op"), second, step("third", "ok.op")]);

        let failing = ScriptedExecutor::failing(&["svc"]);
        let first = engine
            .execute(&wf, inputs(json!({"k": 1})), &InMemorySdkRegistry::new(), &failing, ExecuteOptions::default())
            .await;
        assert_eq!(first.status, ExecutionStatus::Failed);
        assert_eq!(engine.store().get_resume_point(&first.run_id).await.unwrap(), 1);
        let before = engine.store().get_execution(&first.run_id).await.unwrap().unwrap();
        let before_cps = engine.store().get_checkpoints(&first.run_id).await.unwrap();

        let healthy = ScriptedExecutor::default();
        let resumed = engine
            .resume(&first.run_id, &wf, &InMemorySdkRegistry::new(), &healthy)
            .await
            .unwrap();

        assert_ne!(resumed.run_id, first.run_id);
        assert_eq!(resumed.status, ExecutionStatus::Completed);
        assert_eq!(healthy.calls(), vec!["second:svc.op", "third:ok.op"]);
        assert_eq!(resumed.outputs["second"]["inputs"]["prev"], json!("ok.op"));
        assert_eq!(resumed.outputs["first"]["action"], json!("ok.op"));

        let after = engine.store().get_execution(&first.run_id).await.unwrap().unwrap();
        assert_eq!(after, before);
        assert_eq!(after.error, first.error);
        assert_eq!(engine.store().get_checkpoints(&first.run_id).await.unwrap(), before_cps);

        let continuation = engine.store().get_execution(&resumed.run_id).await.unwrap().unwrap();
        assert_eq!(continuation.status, ExecutionStatus::Completed);
        assert_eq!(continuation.resumed_from(), Some(first.run_id.as_str()));
        assert_eq!(continuation.resume_index(), Some(1));
        assert_eq!(continuation.inputs, Some(json!({"k": 1})));
        let listed = engine.store().list_executions(&Default::default()).await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_resume_completed_run_leaves_record_untouched() {
        let engine = engine();
        let wf = workflow(vec![step("a", "ok.op"), step("b", "ok.op")]);
        let run = engine
            .execute(&wf, Map::new(), &InMemorySdkRegistry::new(), &ScriptedExecutor::default(), ExecuteOptions::default())
            .await;
        let before = engine.store().get_execution(&run.run_id).await.unwrap().unwrap();

        let executor = ScriptedExecutor::default();
        let again = engine
            .resume(&run.run_id, &wf, &InMemorySdkRegistry::new(), &executor)
            .await
            .unwrap();

        assert_eq!(again.status, ExecutionStatus::Completed);
        assert!(executor.calls().is_empty());
        assert_eq!(again.outputs, run.outputs);
        let after = engine.store().get_execution(&run.run_id).await.unwrap().unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_resume_interrupted_run_continues_in_place() {
        let engine = engine();
        let wf = workflow(vec![step("a", "ok.op"), step("b", "ok.op")]);
        let record = ExecutionRecord::start("crashed", "wf", "wf.json", 2, Some(json!({"n": 1})));
        engine.store().create_execution(&record).await.unwrap();
        let done = StepCheckpointer::new("crashed", 0, "a")
            .build(StepStatus::Completed, 0, None, Some(json!("from a")), None);
        engine.store().save_checkpoint(&done).await.unwrap();

        let executor = ScriptedExecutor::default();
        let resumed = engine
            .resume("crashed", &wf, &InMemorySdkRegistry::new(), &executor)
            .await
            .unwrap();

        assert_eq!(resumed.run_id, "crashed");
        assert_eq!(resumed.status, ExecutionStatus::Completed);
        assert_eq!(executor.calls(), vec!["b:ok.op"]);
        assert_eq!(resumed.outputs["a"], json!("from a"));
        let listed = engine.store().list_executions(&Default::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_crashed_continuation_resumes_at_its_start_index() {
        let engine = engine();
        let wf = workflow(vec![step("a", "ok.op"), step("b", "svc.op"), step("c", "ok.op")]);
        let first = engine
            .execute(&wf, Map::new(), &InMemorySdkRegistry::new(), &ScriptedExecutor::failing(&["svc"]), ExecuteOptions::default())
            .await;

        // A continuation that crashed before its first checkpoint.
        let mut record = ExecutionRecord::start("next", "wf", "", 3, None);
        record.metadata = Some(json!({"resumed_from": first.run_id, "resume_index": 1}));
        engine.store().create_execution(&record).await.unwrap();

        let executor = ScriptedExecutor::default();
        let resumed = engine
            .resume("next", &wf, &InMemorySdkRegistry::new(), &executor)
            .await
            .unwrap();

        assert_eq!(resumed.run_id, "next");
        assert_eq!(resumed.status, ExecutionStatus::Completed);
        assert_eq!(executor.calls(), vec!["b:svc.op", "c:ok.op"]);
        assert_eq!(resumed.outputs["a"]["action"], json!("ok.op"));
    }

    #[tokio::test]
    async fn test_execute_with_finished_run_id_is_rejected() {
        let engine = engine();
        let wf = workflow(vec![step("a", "ok.op")]);
        let options = || ExecuteOptions {
            run_id: Some("fixed".to_string()),
            ..Default::default()
        };
        let first = engine
            .execute(&wf, Map::new(), &InMemorySdkRegistry::new(), &ScriptedExecutor::default(), options())
            .await;
        assert_eq!(first.status, ExecutionStatus::Completed);
        let before = engine.store().get_execution("fixed").await.unwrap().unwrap();

        let executor = ScriptedExecutor::default();
        let second = engine
            .execute(&wf, Map::new(), &InMemorySdkRegistry::new(), &executor, options())
            .await;

        assert_eq!(second.status, ExecutionStatus::Failed);
        assert!(second.error.as_deref().unwrap().contains("already finished"));
        assert!(executor.calls().is_empty());
        assert_eq!(engine.store().get_execution("fixed").await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_resume_rejects_other_workflow() {
        let engine = engine();
        let wf = workflow(vec![step("a", "ok.op")]);
        let run = engine
            .execute(&wf, Map::new(), &InMemorySdkRegistry::new(), &ScriptedExecutor::default(), ExecuteOptions::default())
            .await;

        let mut other = workflow(vec![step("a", "ok.op")]);
        other.metadata.id = "other".to_string();
        let err = engine
            .resume(&run.run_id, &other, &InMemorySdkRegistry::new(), &ScriptedExecutor::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::WorkflowMismatch { .. }));
    }

    #[tokio::test]
    async fn test_resume_unknown_run() {
        let engine = engine();
        let wf = workflow(vec![step("a", "ok.op")]);
        let err = engine
            .resume("missing", &wf, &InMemorySdkRegistry::new(), &ScriptedExecutor::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Checkpoint(CheckpointError::RunNotFound(_))));
    }
}
