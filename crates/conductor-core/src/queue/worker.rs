//! Queue-driven workflow runs.
//!
//! Each message names a workflow (`workflow_id`) and carries the run inputs
//! as its `payload`. Every delivery attempt owns one run: the first uses the
//! message id, redelivery `k` uses `<id>.<k>`. A redelivered message
//! continues the previous attempt's run from its last checkpoint instead of
//! starting over, leaving the earlier record as it finished.

use std::collections::HashMap;
use std::sync::Arc;

use conductor_types::execution::ExecutionStatus;
use conductor_types::queue::QueueMessage;
use conductor_types::workflow::Workflow;
use serde_json::{Map, Value};

use crate::engine::{ExecuteOptions, SdkRegistry, StepExecutor, WorkflowEngine};
use crate::repository::state::StateStore;

use super::backend::{QueueBackend, QueueError};
use super::message_queue::{MessageHandler, MessageQueue};

/// Resolves a message's `workflow_id` to a definition.
pub trait WorkflowSource: Send + Sync {
    fn load(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<Workflow, String>> + Send;
}

/// Workflows registered up front, keyed by id.
#[derive(Debug, Default)]
pub struct StaticWorkflowSource {
    workflows: HashMap<String, Workflow>,
}

impl StaticWorkflowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, workflow: Workflow) -> Self {
        self.workflows.insert(workflow.id().to_string(), workflow);
        self
    }
}

impl WorkflowSource for StaticWorkflowSource {
    async fn load(&self, workflow_id: &str) -> Result<Workflow, String> {
        self.workflows
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| format!("unknown workflow '{workflow_id}'"))
    }
}

// ---------------------------------------------------------------------------
// QueueWorker
// ---------------------------------------------------------------------------

pub struct QueueWorker<S: StateStore, R, E, W> {
    engine: Arc<WorkflowEngine<S>>,
    registry: Arc<R>,
    executor: Arc<E>,
    source: Arc<W>,
}

impl<S, R, E, W> QueueWorker<S, R, E, W>
where
    S: StateStore + 'static,
    R: SdkRegistry + 'static,
    E: StepExecutor + 'static,
    W: WorkflowSource + 'static,
{
    pub fn new(
        engine: Arc<WorkflowEngine<S>>,
        registry: Arc<R>,
        executor: Arc<E>,
        source: Arc<W>,
    ) -> Self {
        Self {
            engine,
            registry,
            executor,
            source,
        }
    }

    /// Start `workers` consumers on `queue`, all driving this worker.
    pub fn spawn_pool<B: QueueBackend + 'static>(
        self: Arc<Self>,
        queue: &MessageQueue<B>,
        workers: usize,
    ) -> Result<(), QueueError> {
        tracing::info!(workers, "starting queue worker pool");
        queue.consume_with(self, workers)
    }
}

/// Run id owned by the current delivery attempt of `message`.
fn attempt_run_id(message: &QueueMessage) -> String {
    run_id_for(&message.id, message.attempts)
}

fn run_id_for(message_id: &str, attempt: u32) -> String {
    match attempt {
        0 => message_id.to_string(),
        n => format!("{message_id}.{n}"),
    }
}

fn payload_inputs(payload: &Value) -> Result<Map<String, Value>, String> {
    match payload {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        other => Err(format!("message payload must be an object, got {other}")),
    }
}

impl<S, R, E, W> MessageHandler for QueueWorker<S, R, E, W>
where
    S: StateStore + 'static,
    R: SdkRegistry + 'static,
    E: StepExecutor + 'static,
    W: WorkflowSource + 'static,
{
    async fn handle(&self, message: &QueueMessage) -> Result<(), String> {
        let workflow = self.source.load(&message.workflow_id).await?;
        let inputs = payload_inputs(&message.payload)?;
        let run_id = attempt_run_id(message);
        let store = self.engine.store();
        let registry = self.registry.as_ref();
        let executor = self.executor.as_ref();

        let existing = store.get_execution(&run_id).await.map_err(|e| e.to_string())?;
        let result = match existing {
            // Finished before the message was settled, e.g. a crash between
            // the run and the ack.
            Some(record) if record.status.is_terminal() => {
                tracing::info!(run_id = %run_id, status = %record.status, "run already finished");
                return match record.status {
                    ExecutionStatus::Completed => Ok(()),
                    _ => Err(record
                        .error
                        .unwrap_or_else(|| format!("run {run_id} {}", record.status))),
                };
            }
            Some(_) => {
                tracing::info!(run_id = %run_id, attempts = message.attempts, "resuming interrupted run");
                self.engine
                    .resume(&run_id, &workflow, registry, executor)
                    .await
                    .map_err(|e| e.to_string())?
            }
            None => match self.previous_run(message).await? {
                Some(previous) => {
                    tracing::info!(
                        run_id = %run_id,
                        previous_run_id = %previous,
                        attempts = message.attempts,
                        "continuing redelivered run"
                    );
                    self.engine
                        .resume_as(&previous, &run_id, &workflow, registry, executor)
                        .await
                        .map_err(|e| e.to_string())?
                }
                None => {
                    let options = ExecuteOptions {
                        run_id: Some(run_id),
                        workflow_path: Some(message.workflow_id.clone()),
                        ..Default::default()
                    };
                    self.engine
                        .execute(&workflow, inputs, registry, executor, options)
                        .await
                }
            },
        };

        if result.is_success() {
            Ok(())
        } else {
            Err(result
                .error
                .unwrap_or_else(|| format!("run {} failed", result.run_id)))
        }
    }
}

impl<S, R, E, W> QueueWorker<S, R, E, W>
where
    S: StateStore + 'static,
    R: SdkRegistry + 'static,
    E: StepExecutor + 'static,
    W: WorkflowSource + 'static,
{
    /// Newest run recorded by an earlier delivery of `message`.
    async fn previous_run(&self, message: &QueueMessage) -> Result<Option<String>, String> {
        for attempt in (0..message.attempts).rev() {
            let run_id = run_id_for(&message.id, attempt);
            let found = self
                .engine
                .store()
                .get_execution(&run_id)
                .await
                .map_err(|e| e.to_string())?;
            if found.is_some() {
                return Ok(Some(run_id));
            }
        }
        Ok(None)
    }
}
