//! Execution logger port.
//!
//! A side channel the engine writes to at run start, after each step, and at
//! run end. Logger failures are reported through `tracing` and never affect
//! the run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("log for run '{0}' was never started")]
    NotStarted(String),

    #[error("log io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("log serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub trait ExecutionLogger: Send + Sync {
    fn start_log(&self, run_id: &str, workflow_id: &str) -> Result<(), LoggerError>;

    fn log(
        &self,
        run_id: &str,
        level: LogLevel,
        message: &str,
        details: Option<&Value>,
    ) -> Result<(), LoggerError>;

    /// Close the run's log. Returns where it was written, if anywhere.
    fn finish_log(
        &self,
        run_id: &str,
        success: bool,
        outputs: Option<&Value>,
        error: Option<&str>,
    ) -> Result<Option<PathBuf>, LoggerError>;
}

/// Forwards execution log lines to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingExecutionLogger;

impl ExecutionLogger for TracingExecutionLogger {
    fn start_log(&self, run_id: &str, workflow_id: &str) -> Result<(), LoggerError> {
        tracing::info!(run_id, workflow_id, "run log started");
        Ok(())
    }

    fn log(
        &self,
        run_id: &str,
        level: LogLevel,
        message: &str,
        details: Option<&Value>,
    ) -> Result<(), LoggerError> {
        let details = details.map(Value::to_string).unwrap_or_default();
        match level {
            LogLevel::Debug => tracing::debug!(run_id, %details, "{message}"),
            LogLevel::Info => tracing::info!(run_id, %details, "{message}"),
            LogLevel::Warn => tracing::warn!(run_id, %details, "{message}"),
            LogLevel::Error => tracing::error!(run_id, %details, "{message}"),
        }
        Ok(())
    }

    fn finish_log(
        &self,
        run_id: &str,
        success: bool,
        _outputs: Option<&Value>,
        error: Option<&str>,
    ) -> Result<Option<PathBuf>, LoggerError> {
        tracing::info!(run_id, success, ?error, "run log finished");
        Ok(None)
    }
}

/// Wraps a logger so that every failure is downgraded to a warning.
pub(crate) struct GuardedLogger<'a>(pub &'a dyn ExecutionLogger);

impl GuardedLogger<'_> {
    pub fn start(&self, run_id: &str, workflow_id: &str) {
        if let Err(e) = self.0.start_log(run_id, workflow_id) {
            tracing::warn!(run_id, error = %e, "execution logger failed to start");
        }
    }

    pub fn log(&self, run_id: &str, level: LogLevel, message: &str, details: Option<&Value>) {
        if let Err(e) = self.0.log(run_id, level, message, details) {
            tracing::warn!(run_id, error = %e, "execution logger failed to write");
        }
    }

    pub fn finish(&self, run_id: &str, success: bool, outputs: Option<&Value>, error: Option<&str>) {
        match self.0.finish_log(run_id, success, outputs, error) {
            Ok(Some(path)) => tracing::debug!(run_id, path = %path.display(), "run log written"),
            Ok(None) => {}
            Err(e) => tracing::warn!(run_id, error = %e, "execution logger failed to finish"),
        }
    }
}
