//! Execution tracking types: run records, step checkpoints, and query shapes.
//!
//! `ExecutionRecord` is the durable projection of one run; `StepCheckpoint`
//! is the durable projection of one attempted step within it, keyed by
//! `(run_id, step_index)`. Together they are enough to resume a crashed run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal states are never mutated afterwards (except cleanup deletion).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

/// Status of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("invalid step status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionRecord
// ---------------------------------------------------------------------------

/// Persistent record of a single workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    /// Unique run identifier.
    pub run_id: String,
    pub workflow_id: String,
    /// Where the workflow definition was loaded from (may be empty).
    pub workflow_path: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Index of the step currently (or last) being executed.
    pub current_step: u32,
    pub total_steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ExecutionRecord {
    /// A fresh `Running` record starting now.
    pub fn start(
        run_id: impl Into<String>,
        workflow_id: impl Into<String>,
        workflow_path: impl Into<String>,
        total_steps: u32,
        inputs: Option<Value>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            workflow_id: workflow_id.into(),
            workflow_path: workflow_path.into(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            current_step: 0,
            total_steps,
            inputs,
            outputs: None,
            error: None,
            metadata: None,
        }
    }

    /// Merge a partial update into this record. `None` fields are untouched.
    pub fn apply(&mut self, update: &ExecutionUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(completed_at) = update.completed_at {
            self.completed_at = completed_at;
        }
        if let Some(current_step) = update.current_step {
            self.current_step = current_step;
        }
        if let Some(total_steps) = update.total_steps {
            self.total_steps = total_steps;
        }
        if let Some(outputs) = &update.outputs {
            self.outputs = Some(outputs.clone());
        }
        if let Some(error) = &update.error {
            self.error = error.clone();
        }
        if let Some(metadata) = &update.metadata {
            self.metadata = Some(metadata.clone());
        }
    }

    /// The finished run this one continues, from `metadata.resumed_from`.
    pub fn resumed_from(&self) -> Option<&str> {
        self.metadata.as_ref()?.get(RESUMED_FROM_KEY)?.as_str()
    }

    /// Step index a continuation run started at, from `metadata.resume_index`.
    pub fn resume_index(&self) -> Option<u32> {
        let index = self.metadata.as_ref()?.get(RESUME_INDEX_KEY)?.as_u64()?;
        u32::try_from(index).ok()
    }
}

/// Metadata key linking a continuation run to the run it picks up from.
pub const RESUMED_FROM_KEY: &str = "resumed_from";

/// Metadata key holding the step index a continuation run started at.
pub const RESUME_INDEX_KEY: &str = "resume_index";

/// Partial update for an execution record.
///
/// `None` leaves a field untouched. The nullable fields use `Some(None)` to
/// clear the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionUpdate {
    pub status: Option<ExecutionStatus>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub current_step: Option<u32>,
    pub total_steps: Option<u32>,
    pub outputs: Option<Value>,
    pub error: Option<Option<String>>,
    pub metadata: Option<Value>,
}

impl ExecutionUpdate {
    /// Progress marker written after each step.
    pub fn progress(current_step: u32) -> Self {
        Self {
            current_step: Some(current_step),
            ..Default::default()
        }
    }

    /// Terminal transition stamped with the current time.
    pub fn finished(status: ExecutionStatus, outputs: Value, error: Option<String>) -> Self {
        Self {
            status: Some(status),
            completed_at: Some(Some(Utc::now())),
            outputs: Some(outputs),
            error: Some(error),
            ..Default::default()
        }
    }

    /// Back to RUNNING for an interrupted run picked up again.
    ///
    /// Finished runs are never reopened; they are continued under a new run id.
    pub fn reopened() -> Self {
        Self {
            status: Some(ExecutionStatus::Running),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// StepCheckpoint
// ---------------------------------------------------------------------------

/// Persistent record of one attempted step, keyed by `(run_id, step_index)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepCheckpoint {
    pub run_id: String,
    pub step_index: u32,
    pub step_name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
}

// ---------------------------------------------------------------------------
// Query shapes
// ---------------------------------------------------------------------------

/// Filter for listing executions. Results are newest-first by `started_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionFilter {
    pub workflow_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ExecutionFilter {
    pub fn with_status(status: ExecutionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Aggregate counts over matching executions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub completed: u64,
    pub failed: u64,
    pub running: u64,
    /// `completed / total_executions`, 0.0 when there are none.
    pub success_rate: f64,
}

impl ExecutionStats {
    pub fn from_counts(total: u64, completed: u64, failed: u64, running: u64) -> Self {
        let success_rate = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64
        };
        Self {
            total_executions: total,
            completed,
            failed,
            running,
            success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_leaves_unset_fields() {
        let mut record = ExecutionRecord::start("r1", "wf", "wf.json", 3, Some(json!({"a": 1})));
        record.apply(&ExecutionUpdate::progress(2));
        assert_eq!(record.current_step, 2);
        assert_eq!(record.status, ExecutionStatus::Running);
        assert_eq!(record.inputs, Some(json!({"a": 1})));
        assert!(record.completed_at.is_none());

        record.apply(&ExecutionUpdate::finished(
            ExecutionStatus::Failed,
            json!({}),
            Some("boom".to_string()),
        ));
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert_eq!(record.current_step, 2);
        assert!(record.completed_at.is_some());

        record.apply(&ExecutionUpdate {
            error: Some(None),
            ..Default::default()
        });
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error.is_none());
        assert!(record.completed_at.is_some());
        assert_eq!(record.outputs, Some(json!({})));
    }

    #[test]
    fn test_continuation_metadata_accessors() {
        let mut record = ExecutionRecord::start("r2", "wf", "", 3, None);
        assert_eq!(record.resumed_from(), None);
        assert_eq!(record.resume_index(), None);

        record.metadata = Some(json!({"resumed_from": "r1", "resume_index": 2}));
        assert_eq!(record.resumed_from(), Some("r1"));
        assert_eq!(record.resume_index(), Some(2));

        record.metadata = Some(json!({"resumed_from": 7, "resume_index": -1}));
        assert_eq!(record.resumed_from(), None);
        assert_eq!(record.resume_index(), None);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(ExecutionStatus::Completed.to_string(), "completed");
        assert_eq!("FAILED".parse::<ExecutionStatus>(), Ok(ExecutionStatus::Failed));
        assert!("nope".parse::<ExecutionStatus>().is_err());
        assert_eq!("skipped".parse::<StepStatus>(), Ok(StepStatus::Skipped));
        assert_eq!(
            serde_json::to_value(StepStatus::Running).unwrap(),
            json!("running")
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Pending.is_terminal());
    }

    #[test]
    fn test_stats_success_rate() {
        let stats = ExecutionStats::from_counts(4, 3, 1, 0);
        assert!((stats.success_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(ExecutionStats::from_counts(0, 0, 0, 0).success_rate, 0.0);
    }
}
