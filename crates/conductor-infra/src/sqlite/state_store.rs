//! SQLite `StateStore` implementation.
//!
//! Executions and checkpoints live in two tables; checkpoints cascade on
//! execution delete. JSON payloads (inputs, outputs, metadata) are stored as
//! text. All writes go through the single-connection writer pool.

use conductor_core::repository::state::{StateStore, retention_cutoff};
use conductor_types::error::RepositoryError;
use conductor_types::execution::{
    ExecutionFilter, ExecutionRecord, ExecutionStats, ExecutionStatus, ExecutionUpdate,
    StepCheckpoint, StepStatus,
};
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_json, to_json};

/// SQLite-backed implementation of `StateStore`.
pub struct SqliteStateStore {
    pool: DatabasePool,
}

impl SqliteStateStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    run_id: String,
    workflow_id: String,
    workflow_path: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    current_step: i64,
    total_steps: i64,
    inputs: Option<String>,
    outputs: Option<String>,
    error: Option<String>,
    metadata: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_id: row.try_get("run_id")?,
            workflow_id: row.try_get("workflow_id")?,
            workflow_path: row.try_get("workflow_path")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            current_step: row.try_get("current_step")?,
            total_steps: row.try_get("total_steps")?,
            inputs: row.try_get("inputs")?,
            outputs: row.try_get("outputs")?,
            error: row.try_get("error")?,
            metadata: row.try_get("metadata")?,
        })
    }

    fn into_record(self) -> Result<ExecutionRecord, RepositoryError> {
        let status: ExecutionStatus = self.status.parse().map_err(RepositoryError::Query)?;
        Ok(ExecutionRecord {
            run_id: self.run_id,
            workflow_id: self.workflow_id,
            workflow_path: self.workflow_path,
            status,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            current_step: self.current_step as u32,
            total_steps: self.total_steps as u32,
            inputs: parse_json(self.inputs.as_deref(), "inputs")?,
            outputs: parse_json(self.outputs.as_deref(), "outputs")?,
            error: self.error,
            metadata: parse_json(self.metadata.as_deref(), "metadata")?,
        })
    }
}

struct CheckpointRow {
    run_id: String,
    step_index: i64,
    step_name: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    inputs: Option<String>,
    outputs: Option<String>,
    error: Option<String>,
    retry_count: i64,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_id: row.try_get("run_id")?,
            step_index: row.try_get("step_index")?,
            step_name: row.try_get("step_name")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            inputs: row.try_get("inputs")?,
            outputs: row.try_get("outputs")?,
            error: row.try_get("error")?,
            retry_count: row.try_get("retry_count")?,
        })
    }

    fn into_checkpoint(self) -> Result<StepCheckpoint, RepositoryError> {
        let status: StepStatus = self.status.parse().map_err(RepositoryError::Query)?;
        Ok(StepCheckpoint {
            run_id: self.run_id,
            step_index: self.step_index as u32,
            step_name: self.step_name,
            status,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            inputs: parse_json(self.inputs.as_deref(), "checkpoint inputs")?,
            outputs: parse_json(self.outputs.as_deref(), "checkpoint outputs")?,
            error: self.error,
            retry_count: self.retry_count as u32,
        })
    }
}

fn records(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<ExecutionRecord>, RepositoryError> {
    rows.iter()
        .map(|row| ExecutionRow::from_row(row).map_err(query_err)?.into_record())
        .collect()
}

// ---------------------------------------------------------------------------
// StateStore impl
// ---------------------------------------------------------------------------

impl StateStore for SqliteStateStore {
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"INSERT INTO executions
               (run_id, workflow_id, workflow_path, status, started_at, completed_at,
                current_step, total_steps, inputs, outputs, error, metadata)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.run_id)
        .bind(&record.workflow_id)
        .bind(&record.workflow_path)
        .bind(record.status.as_str())
        .bind(format_datetime(&record.started_at))
        .bind(record.completed_at.as_ref().map(format_datetime))
        .bind(i64::from(record.current_step))
        .bind(i64::from(record.total_steps))
        .bind(to_json(record.inputs.as_ref())?)
        .bind(to_json(record.outputs.as_ref())?)
        .bind(&record.error)
        .bind(to_json(record.metadata.as_ref())?)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                RepositoryError::Conflict(format!("execution '{}' already exists", record.run_id)),
            ),
            Err(e) => Err(query_err(e)),
        }
    }

    async fn update_execution(
        &self,
        run_id: &str,
        update: &ExecutionUpdate,
    ) -> Result<(), RepositoryError> {
        // Nullable columns take a "set" flag so `Some(None)` can clear them.
        let completed_at = update
            .completed_at
            .map(|v| v.as_ref().map(format_datetime));
        let error = update.error.clone();

        let result = sqlx::query(
            r#"UPDATE executions SET
                 status = COALESCE(?, status),
                 completed_at = CASE WHEN ? THEN ? ELSE completed_at END,
                 current_step = COALESCE(?, current_step),
                 total_steps = COALESCE(?, total_steps),
                 outputs = COALESCE(?, outputs),
                 error = CASE WHEN ? THEN ? ELSE error END,
                 metadata = COALESCE(?, metadata)
               WHERE run_id = ?"#,
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(completed_at.is_some())
        .bind(completed_at.flatten())
        .bind(update.current_step.map(i64::from))
        .bind(update.total_steps.map(i64::from))
        .bind(to_json(update.outputs.as_ref())?)
        .bind(error.is_some())
        .bind(error.flatten())
        .bind(to_json(update.metadata.as_ref())?)
        .bind(run_id)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_execution(&self, run_id: &str) -> Result<Option<ExecutionRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM executions WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(ExecutionRow::from_row(&row).map_err(query_err)?.into_record()?)),
            None => Ok(None),
        }
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let status = filter.status.map(|s| s.as_str());
        // LIMIT -1 is unbounded in SQLite.
        let limit = filter.limit.map_or(-1, i64::from);
        let offset = filter.offset.map_or(0, i64::from);

        let rows = sqlx::query(
            r#"SELECT * FROM executions
               WHERE (? IS NULL OR workflow_id = ?)
                 AND (? IS NULL OR status = ?)
               ORDER BY started_at DESC, run_id DESC
               LIMIT ? OFFSET ?"#,
        )
        .bind(&filter.workflow_id)
        .bind(&filter.workflow_id)
        .bind(status)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        records(&rows)
    }

    async fn delete_execution(&self, run_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM executions WHERE run_id = ?")
            .bind(run_id)
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_stats(&self, workflow_id: Option<&str>) -> Result<ExecutionStats, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT
                 COUNT(*) AS total,
                 COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
                 COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
                 COALESCE(SUM(CASE WHEN status = 'running' THEN 1 ELSE 0 END), 0) AS running
               FROM executions
               WHERE (? IS NULL OR workflow_id = ?)"#,
        )
        .bind(workflow_id)
        .bind(workflow_id)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let count = |col: &str| -> Result<u64, RepositoryError> {
            row.try_get::<i64, _>(col).map(|v| v as u64).map_err(query_err)
        };
        Ok(ExecutionStats::from_counts(
            count("total")?,
            count("completed")?,
            count("failed")?,
            count("running")?,
        ))
    }

    async fn cleanup(&self, retention_days: u32) -> Result<u64, RepositoryError> {
        let Some(cutoff) = retention_cutoff(retention_days) else {
            return Ok(0);
        };
        let result = sqlx::query("DELETE FROM executions WHERE started_at < ?")
            .bind(format_datetime(&cutoff))
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(deleted, retention_days, "cleaned up old executions");
        }
        Ok(deleted)
    }

    async fn save_checkpoint(&self, checkpoint: &StepCheckpoint) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO checkpoints
               (run_id, step_index, step_name, status, started_at, completed_at,
                inputs, outputs, error, retry_count)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(run_id, step_index) DO UPDATE SET
                 step_name = excluded.step_name,
                 status = excluded.status,
                 started_at = excluded.started_at,
                 completed_at = excluded.completed_at,
                 inputs = excluded.inputs,
                 outputs = excluded.outputs,
                 error = excluded.error,
                 retry_count = excluded.retry_count"#,
        )
        .bind(&checkpoint.run_id)
        .bind(i64::from(checkpoint.step_index))
        .bind(&checkpoint.step_name)
        .bind(checkpoint.status.as_str())
        .bind(format_datetime(&checkpoint.started_at))
        .bind(checkpoint.completed_at.as_ref().map(format_datetime))
        .bind(to_json(checkpoint.inputs.as_ref())?)
        .bind(to_json(checkpoint.outputs.as_ref())?)
        .bind(&checkpoint.error)
        .bind(i64::from(checkpoint.retry_count))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_checkpoints(&self, run_id: &str) -> Result<Vec<StepCheckpoint>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM checkpoints WHERE run_id = ? ORDER BY step_index ASC")
            .bind(run_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter()
            .map(|row| CheckpointRow::from_row(row).map_err(query_err)?.into_checkpoint())
            .collect()
    }

    async fn get_last_checkpoint(
        &self,
        run_id: &str,
    ) -> Result<Option<StepCheckpoint>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM checkpoints WHERE run_id = ? ORDER BY step_index DESC LIMIT 1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(CheckpointRow::from_row(&row).map_err(query_err)?.into_checkpoint()?)),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
