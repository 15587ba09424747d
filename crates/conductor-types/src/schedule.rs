//! Scheduled job types for cron-driven triggers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A job registered with the scheduler.
///
/// `next_run`, `last_run`, and `run_count` are only mutated by the scheduler
/// after each due-check cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledJob {
    pub id: String,
    pub workflow_path: String,
    /// 5-field cron expression.
    pub schedule: String,
    #[serde(default)]
    pub inputs: Value,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u64,
}

/// Registration request for a scheduled job (also the config-file shape).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSpec {
    pub id: String,
    pub workflow_path: String,
    pub schedule: String,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl JobSpec {
    pub fn new(
        id: impl Into<String>,
        workflow_path: impl Into<String>,
        schedule: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            workflow_path: workflow_path.into(),
            schedule: schedule.into(),
            inputs: Value::Null,
            enabled: true,
        }
    }
}
