//! State store trait definition.
//!
//! Defines the durable log of run progress: execution records keyed by
//! `run_id` and step checkpoints keyed by `(run_id, step_index)`. The
//! infrastructure layer implements this with SQLite; `store::memory`
//! provides an in-process implementation.

use chrono::{DateTime, TimeDelta, Utc};
use conductor_types::error::RepositoryError;
use conductor_types::execution::{
    ExecutionFilter, ExecutionRecord, ExecutionStats, ExecutionStatus, ExecutionUpdate,
    StepCheckpoint, StepStatus,
};

/// Repository trait for execution and checkpoint persistence.
///
/// Implementations must support concurrent callers and make a checkpoint
/// write visible to subsequent reads before the call returns.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait StateStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Insert a new record. Fails with `Conflict` if `run_id` exists.
    fn create_execution(
        &self,
        record: &ExecutionRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Merge the set fields of `update` into an existing record.
    fn update_execution(
        &self,
        run_id: &str,
        update: &ExecutionUpdate,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        run_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionRecord>, RepositoryError>> + Send;

    /// List records matching `filter`, newest-first by `started_at`.
    fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRecord>, RepositoryError>> + Send;

    /// Delete a record and its checkpoints. Returns `true` if it existed.
    fn delete_execution(
        &self,
        run_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn get_stats(
        &self,
        workflow_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<ExecutionStats, RepositoryError>> + Send;

    /// Delete records (and checkpoints) started more than `retention_days` ago.
    fn cleanup(
        &self,
        retention_days: u32,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// Upsert keyed by `(run_id, step_index)`.
    fn save_checkpoint(
        &self,
        checkpoint: &StepCheckpoint,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All checkpoints of a run, ordered by `step_index` ascending.
    fn get_checkpoints(
        &self,
        run_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<StepCheckpoint>, RepositoryError>> + Send;

    /// The checkpoint with the highest `step_index`.
    fn get_last_checkpoint(
        &self,
        run_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<StepCheckpoint>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Derived queries
    // -----------------------------------------------------------------------

    fn get_running_executions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRecord>, RepositoryError>> + Send
    {
        async move {
            self.list_executions(&ExecutionFilter::with_status(ExecutionStatus::Running))
                .await
        }
    }

    fn get_failed_executions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRecord>, RepositoryError>> + Send
    {
        async move {
            self.list_executions(&ExecutionFilter::with_status(ExecutionStatus::Failed))
                .await
        }
    }

    /// Step index a resumed run should start from.
    fn get_resume_point(
        &self,
        run_id: &str,
    ) -> impl std::future::Future<Output = Result<u32, RepositoryError>> + Send {
        async move {
            let last = self.get_last_checkpoint(run_id).await?;
            Ok(resume_point(last.as_ref()))
        }
    }
}

/// Start-time cutoff for `cleanup`: runs started before it are expired.
///
/// `None` when the window reaches past the earliest representable time, so
/// nothing can have started before it.
pub fn retention_cutoff(retention_days: u32) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(retention_days))
        .and_then(|window| Utc::now().checked_sub_signed(window))
}

/// Resume index implied by a run's last checkpoint.
///
/// COMPLETED and SKIPPED advance past the step; FAILED and every non-terminal
/// state re-run it, so no step that did not finish is ever skipped.
pub fn resume_point(last: Option<&StepCheckpoint>) -> u32 {
    match last {
        None => 0,
        Some(cp) => match cp.status {
            StepStatus::Completed | StepStatus::Skipped => cp.step_index + 1,
            StepStatus::Failed | StepStatus::Pending | StepStatus::Running => cp.step_index,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn checkpoint(step_index: u32, status: StepStatus) -> StepCheckpoint {
        StepCheckpoint {
            run_id: "run".to_string(),
            step_index,
            step_name: format!("step-{step_index}"),
            status,
            started_at: Utc::now(),
            completed_at: None,
            inputs: None,
            outputs: None,
            error: None,
            retry_count: 0,
        }
    }

    #[test]
    fn resume_point_without_checkpoints_is_zero() {
        assert_eq!(resume_point(None), 0);
    }

    #[test]
    fn resume_point_advances_past_completed_and_skipped() {
        assert_eq!(resume_point(Some(&checkpoint(2, StepStatus::Completed))), 3);
        assert_eq!(resume_point(Some(&checkpoint(0, StepStatus::Skipped))), 1);
    }

    #[test]
    fn resume_point_retries_failed_and_in_flight() {
        assert_eq!(resume_point(Some(&checkpoint(4, StepStatus::Failed))), 4);
        assert_eq!(resume_point(Some(&checkpoint(1, StepStatus::Running))), 1);
        assert_eq!(resume_point(Some(&checkpoint(1, StepStatus::Pending))), 1);
    }

    #[test]
    fn retention_cutoff_handles_huge_windows() {
        let cutoff = retention_cutoff(30).unwrap();
        let age = Utc::now() - cutoff;
        assert!(age >= TimeDelta::days(30) && age < TimeDelta::days(31));
        assert!(retention_cutoff(0).is_some());
        assert!(retention_cutoff(u32::MAX).is_none());
    }
}
