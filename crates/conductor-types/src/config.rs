//! Configuration types for Conductor.
//!
//! `ConductorConfig` represents the top-level `conductor.toml` that controls
//! storage, the scheduler and queue loops, routing budget, agent profiles,
//! and statically declared scheduled jobs. All fields have sensible defaults.

use serde::{Deserialize, Serialize};

use crate::agent::{AgentProfile, SelectionStrategy};
use crate::queue::DEFAULT_MAX_ATTEMPTS;
use crate::schedule::JobSpec;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConductorConfig {
    /// SQLite URL; `None` uses `{data_dir}/conductor.db`.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Directory holding workflow definition files.
    #[serde(default)]
    pub workflows_dir: Option<String>,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub agents: Vec<AgentProfile>,

    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

/// Scheduler loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-job checks.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_check_interval_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

/// Which queue substrate to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackendKind {
    Memory,
    #[default]
    Sqlite,
    Broker,
}

/// Queue and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackendKind,
    /// Idle poll interval when the backend has no wake-up signal.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    /// Concurrent consumers in a worker pool.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Broker backend: unacknowledged deliveries allowed at once.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_workers() -> usize {
    4
}

fn default_prefetch() -> usize {
    16
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackendKind::default(),
            poll_interval_ms: default_poll_interval_ms(),
            default_max_attempts: default_max_attempts(),
            workers: default_workers(),
            prefetch: default_prefetch(),
        }
    }
}

/// Agent routing and budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub strategy: SelectionStrategy,
    /// Total spend allowed (same currency unit as agent costs).
    #[serde(default = "default_total_budget")]
    pub total_budget: f64,
    /// Fraction of the budget at which a one-time warning is emitted.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
}

fn default_total_budget() -> f64 {
    100.0
}

fn default_warning_threshold() -> f64 {
    0.8
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::default(),
            total_budget: default_total_budget(),
            warning_threshold: default_warning_threshold(),
        }
    }
}

/// Storage hygiene settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub days: u32,
}

fn default_retention_days() -> u32 {
    30
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = ConductorConfig::default();
        assert_eq!(config.scheduler.check_interval_secs, 60);
        assert_eq!(config.queue.backend, QueueBackendKind::Sqlite);
        assert_eq!(config.queue.default_max_attempts, 3);
        assert_eq!(config.retention.days, 30);
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config: ConductorConfig = toml::from_str("").unwrap();
        assert_eq!(config.queue.workers, 4);
        assert!((config.routing.warning_threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_deserialize_with_values() {
        let toml_str = r#"
database_url = "sqlite://test.db"

[scheduler]
check_interval_secs = 15

[queue]
backend = "broker"
workers = 8

[routing]
strategy = "lowest_cost"
total_budget = 25.0

[[agents]]
name = "haiku"
provider = "anthropic"
model = "claude-haiku"
capabilities = ["chat"]
cost_per_1k_tokens = 0.25

[[jobs]]
id = "nightly"
workflow_path = "nightly.json"
schedule = "0 2 * * *"
"#;
        let config: ConductorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database_url.as_deref(), Some("sqlite://test.db"));
        assert_eq!(config.scheduler.check_interval_secs, 15);
        assert_eq!(config.queue.backend, QueueBackendKind::Broker);
        assert_eq!(config.queue.workers, 8);
        assert_eq!(config.routing.strategy, SelectionStrategy::LowestCost);
        assert_eq!(config.agents.len(), 1);
        assert!(config.agents[0].enabled);
        assert_eq!(config.jobs[0].schedule, "0 2 * * *");
        assert!(config.jobs[0].enabled);
    }
}
