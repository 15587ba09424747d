//! JSON-lines execution logger.
//!
//! Writes one `{run_id}.jsonl` file per run under a log directory. Each line
//! is a JSON object with a timestamp, level, message, and optional details.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use conductor_core::engine::logger::{ExecutionLogger, LogLevel, LoggerError};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
struct LogLine<'a> {
    timestamp: String,
    level: LogLevel,
    run_id: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

pub struct JsonlExecutionLogger {
    dir: PathBuf,
    open: Mutex<HashMap<String, BufWriter<File>>>,
}

impl JsonlExecutionLogger {
    /// Log into `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, LoggerError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            open: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.jsonl"))
    }

    fn write_line(
        writer: &mut BufWriter<File>,
        run_id: &str,
        level: LogLevel,
        message: &str,
        details: Option<&Value>,
    ) -> Result<(), LoggerError> {
        let line = LogLine {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            level,
            run_id,
            message,
            details,
        };
        serde_json::to_writer(&mut *writer, &line)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

impl ExecutionLogger for JsonlExecutionLogger {
    fn start_log(&self, run_id: &str, workflow_id: &str) -> Result<(), LoggerError> {
        // Append so a resumed run continues the same file.
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(run_id))?;
        let mut writer = BufWriter::new(file);
        Self::write_line(
            &mut writer,
            run_id,
            LogLevel::Info,
            "run started",
            Some(&serde_json::json!({ "workflow_id": workflow_id })),
        )?;

        let mut open = self.open.lock().unwrap_or_else(|p| p.into_inner());
        open.insert(run_id.to_string(), writer);
        Ok(())
    }

    fn log(
        &self,
        run_id: &str,
        level: LogLevel,
        message: &str,
        details: Option<&Value>,
    ) -> Result<(), LoggerError> {
        let mut open = self.open.lock().unwrap_or_else(|p| p.into_inner());
        let writer = open
            .get_mut(run_id)
            .ok_or_else(|| LoggerError::NotStarted(run_id.to_string()))?;
        Self::write_line(writer, run_id, level, message, details)
    }

    fn finish_log(
        &self,
        run_id: &str,
        success: bool,
        outputs: Option<&Value>,
        error: Option<&str>,
    ) -> Result<Option<PathBuf>, LoggerError> {
        let mut writer = self
            .open
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(run_id)
            .ok_or_else(|| LoggerError::NotStarted(run_id.to_string()))?;

        let (level, message) = if success {
            (LogLevel::Info, "run completed")
        } else {
            (LogLevel::Error, "run failed")
        };
        let details = serde_json::json!({ "outputs": outputs, "error": error });
        Self::write_line(&mut writer, run_id, level, message, Some(&details))?;
        writer.flush()?;
        Ok(Some(self.log_path(run_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_writes_one_json_object_per_line() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = JsonlExecutionLogger::new(tmp.path().join("logs")).unwrap();

        logger.start_log("run-1", "wf").unwrap();
        logger
            .log("run-1", LogLevel::Warn, "step retried", Some(&json!({"step": "a"})))
            .unwrap();
        let path = logger
            .finish_log("run-1", true, Some(&json!({"a": 1})), None)
            .unwrap()
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["details"]["workflow_id"], "wf");
        assert_eq!(lines[1]["level"], "warn");
        assert_eq!(lines[1]["details"]["step"], "a");
        assert_eq!(lines[2]["message"], "run completed");
        assert_eq!(lines[2]["details"]["outputs"]["a"], 1);
    }

    #[test]
    fn test_log_without_start_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = JsonlExecutionLogger::new(tmp.path()).unwrap();
        assert!(matches!(
            logger.log("nope", LogLevel::Info, "x", None),
            Err(LoggerError::NotStarted(_))
        ));
        assert!(logger.finish_log("nope", false, None, Some("e")).is_err());
    }

    #[test]
    fn test_resumed_run_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = JsonlExecutionLogger::new(tmp.path()).unwrap();
        logger.start_log("r", "wf").unwrap();
        logger.finish_log("r", false, None, Some("boom")).unwrap();
        logger.start_log("r", "wf").unwrap();
        let path = logger.finish_log("r", true, None, None).unwrap().unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1]["details"]["error"], "boom");
        assert_eq!(lines[1]["level"], "error");
    }
}
