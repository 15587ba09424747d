//! Durable checkpoint manager for workflow runs.
//!
//! Wraps a `StateStore` with the run-level and step-level transitions the
//! engine performs. Every write completes before the engine moves on, so a
//! crashed run can be resumed from its last checkpoint.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use conductor_types::execution::{
    ExecutionRecord, ExecutionStatus, ExecutionUpdate, StepCheckpoint, StepStatus,
};
use serde_json::Value;

use crate::repository::state::{StateStore, resume_point};

/// Longest chain of continuation runs followed when rebuilding a context.
const MAX_LINEAGE: usize = 64;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Records run and step transitions through a `StateStore`.
pub struct CheckpointManager<S: StateStore> {
    store: Arc<S>,
}

impl<S: StateStore> CheckpointManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Run-level
    // -----------------------------------------------------------------------

    pub async fn start_run(&self, record: &ExecutionRecord) -> Result<(), CheckpointError> {
        self.store
            .create_execution(record)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        tracing::debug!(run_id = %record.run_id, workflow_id = %record.workflow_id, "checkpointed run start");
        Ok(())
    }

    /// Flip an interrupted (PENDING or RUNNING) record back to RUNNING.
    pub async fn reopen_run(&self, run_id: &str) -> Result<(), CheckpointError> {
        self.store
            .update_execution(run_id, &ExecutionUpdate::reopened())
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    pub async fn progress(&self, run_id: &str, current_step: u32) -> Result<(), CheckpointError> {
        self.store
            .update_execution(run_id, &ExecutionUpdate::progress(current_step))
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    pub async fn finish_run(
        &self,
        run_id: &str,
        status: ExecutionStatus,
        outputs: Value,
        error: Option<String>,
    ) -> Result<(), CheckpointError> {
        self.store
            .update_execution(run_id, &ExecutionUpdate::finished(status, outputs, error))
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        tracing::debug!(run_id, status = %status, "checkpointed run finish");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Step-level
    // -----------------------------------------------------------------------

    /// Upsert the checkpoint for one step attempt.
    pub async fn checkpoint_step(&self, checkpoint: &StepCheckpoint) -> Result<(), CheckpointError> {
        self.store
            .save_checkpoint(checkpoint)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        tracing::debug!(
            run_id = %checkpoint.run_id,
            step_index = checkpoint.step_index,
            status = checkpoint.status.as_str(),
            retry_count = checkpoint.retry_count,
            "checkpointed step"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Everything needed to resume a run: its record, checkpoints, and the
    /// index to restart from.
    ///
    /// A continuation run that crashed before checkpointing anything restarts
    /// at the index it was started with.
    pub async fn load_resume_state(&self, run_id: &str) -> Result<ResumeState, CheckpointError> {
        let record = self
            .store
            .get_execution(run_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or_else(|| CheckpointError::RunNotFound(run_id.to_string()))?;
        let checkpoints = self
            .store
            .get_checkpoints(run_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        let resume_from = match checkpoints.last() {
            Some(last) => resume_point(Some(last)),
            None => record.resume_index().unwrap_or(0),
        };

        Ok(ResumeState {
            record,
            checkpoints,
            resume_from,
        })
    }

    /// Checkpoints of `run_id` preceded by those of the runs it continues,
    /// oldest run first, so later outcomes for a step index come last.
    ///
    /// The walk stops at a missing ancestor (e.g. one removed by cleanup).
    pub async fn lineage_checkpoints(
        &self,
        run_id: &str,
    ) -> Result<Vec<StepCheckpoint>, CheckpointError> {
        let mut chain: Vec<String> = Vec::new();
        let mut next = Some(run_id.to_string());
        while let Some(id) = next.take() {
            if chain.len() >= MAX_LINEAGE || chain.contains(&id) {
                tracing::warn!(run_id, "run lineage truncated");
                break;
            }
            let Some(record) = self
                .store
                .get_execution(&id)
                .await
                .map_err(|e| CheckpointError::Repository(e.to_string()))?
            else {
                break;
            };
            next = record.resumed_from().map(str::to_string);
            chain.push(id);
        }

        let mut checkpoints = Vec::new();
        for id in chain.iter().rev() {
            let own = self
                .store
                .get_checkpoints(id)
                .await
                .map_err(|e| CheckpointError::Repository(e.to_string()))?;
            checkpoints.extend(own);
        }
        Ok(checkpoints)
    }
}

/// Persisted state of a run being resumed.
#[derive(Debug, Clone)]
pub struct ResumeState {
    pub record: ExecutionRecord,
    pub checkpoints: Vec<StepCheckpoint>,
    pub resume_from: u32,
}

/// Builds the checkpoint for one step of one run.
#[derive(Debug, Clone)]
pub struct StepCheckpointer {
    run_id: String,
    step_index: u32,
    step_name: String,
    started_at: DateTime<Utc>,
}

impl StepCheckpointer {
    pub fn new(run_id: &str, step_index: u32, step_name: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            step_index,
            step_name: step_name.to_string(),
            started_at: Utc::now(),
        }
    }

    pub fn build(
        &self,
        status: StepStatus,
        retry_count: u32,
        inputs: Option<Value>,
        outputs: Option<Value>,
        error: Option<String>,
    ) -> StepCheckpoint {
        StepCheckpoint {
            run_id: self.run_id.clone(),
            step_index: self.step_index,
            step_name: self.step_name.clone(),
            status,
            started_at: self.started_at,
            completed_at: status.is_terminal().then(Utc::now),
            inputs,
            outputs,
            error,
            retry_count,
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    #[error("execution not found: {0}")]
    RunNotFound(String),

    #[error("run {run_id} already finished as {status}")]
    RunFinished {
        run_id: String,
        status: ExecutionStatus,
    },
}
