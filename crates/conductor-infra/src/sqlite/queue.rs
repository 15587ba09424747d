//! Durable SQLite queue backend.
//!
//! One row per message. Pending rows are delivered in ascending `score`, the
//! composite of priority tier and enqueue sequence, so a requeued message
//! (re-inserted with a fresh sequence) lands at the back of its tier. A claim
//! is a single `UPDATE ... RETURNING` on the writer connection, so two
//! consumers can never claim the same row.

use std::collections::HashMap;

use chrono::Utc;
use conductor_core::queue::delivery::priority_score;
use conductor_core::queue::{Delivery, QueueBackend, QueueError};
use conductor_types::error::RepositoryError;
use conductor_types::queue::{MessagePriority, MessageStatus, QueueMessage};
use serde_json::Value;
use sqlx::{Row, SqliteConnection};

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime};

pub struct SqliteQueueBackend {
    pool: DatabasePool,
}

impl SqliteQueueBackend {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Return messages left claimed by a crashed consumer to the pending set,
    /// keeping their original position. Call before starting consumers.
    pub async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "UPDATE queue_messages SET status = 'pending', claimed_at = NULL WHERE status = 'processing'",
        )
        .execute(&self.pool.writer)
        .await
        .map_err(backend_err)?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            tracing::warn!(recovered, "returned in-flight queue messages to pending");
        }
        Ok(recovered)
    }
}

fn backend_err(e: sqlx::Error) -> QueueError {
    QueueError::Backend(e.to_string())
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct MessageRow {
    seq: i64,
    id: String,
    workflow_id: String,
    payload: String,
    priority: String,
    status: String,
    created_at: String,
    attempts: i64,
    max_attempts: i64,
    metadata: String,
    last_error: Option<String>,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            seq: row.try_get("seq")?,
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            payload: row.try_get("payload")?,
            priority: row.try_get("priority")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            metadata: row.try_get("metadata")?,
            last_error: row.try_get("last_error")?,
        })
    }

    fn into_delivery(self) -> Result<Delivery, RepositoryError> {
        let priority: MessagePriority = self.priority.parse().map_err(RepositoryError::Query)?;
        let status: MessageStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let payload: Value = serde_json::from_str(&self.payload)
            .map_err(|e| RepositoryError::Query(format!("invalid payload JSON: {e}")))?;
        let metadata: HashMap<String, Value> = serde_json::from_str(&self.metadata)
            .map_err(|e| RepositoryError::Query(format!("invalid metadata JSON: {e}")))?;

        Ok(Delivery {
            tag: self.seq as u64,
            message: QueueMessage {
                id: self.id,
                workflow_id: self.workflow_id,
                payload,
                priority,
                status,
                created_at: parse_datetime(&self.created_at)?,
                attempts: self.attempts as u32,
                max_attempts: self.max_attempts as u32,
                metadata,
                last_error: self.last_error,
            },
        })
    }
}

/// Insert `message` as pending and stamp its score from the assigned sequence.
async fn insert_pending(
    conn: &mut SqliteConnection,
    message: &QueueMessage,
) -> Result<(), QueueError> {
    let payload = serde_json::to_string(&message.payload)
        .map_err(|e| QueueError::Backend(format!("serialize payload: {e}")))?;
    let metadata = serde_json::to_string(&message.metadata)
        .map_err(|e| QueueError::Backend(format!("serialize metadata: {e}")))?;

    let seq: i64 = sqlx::query_scalar(
        r#"INSERT INTO queue_messages
           (id, workflow_id, payload, priority, status, created_at,
            attempts, max_attempts, metadata, last_error)
           VALUES (?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?)
           RETURNING seq"#,
    )
    .bind(&message.id)
    .bind(&message.workflow_id)
    .bind(&payload)
    .bind(message.priority.as_str())
    .bind(format_datetime(&message.created_at))
    .bind(i64::from(message.attempts))
    .bind(i64::from(message.max_attempts))
    .bind(&metadata)
    .bind(&message.last_error)
    .fetch_one(&mut *conn)
    .await
    .map_err(backend_err)?;

    sqlx::query("UPDATE queue_messages SET score = ? WHERE seq = ?")
        .bind(priority_score(message.priority, seq as u64))
        .bind(seq)
        .execute(&mut *conn)
        .await
        .map_err(backend_err)?;

    Ok(())
}

// ---------------------------------------------------------------------------
// QueueBackend impl
// ---------------------------------------------------------------------------

impl QueueBackend for SqliteQueueBackend {
    async fn push(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut tx = self.pool.writer.begin().await.map_err(backend_err)?;
        insert_pending(&mut *tx, message).await?;
        tx.commit().await.map_err(backend_err)
    }

    async fn claim(&self) -> Result<Option<Delivery>, QueueError> {
        let row = sqlx::query(
            r#"UPDATE queue_messages SET status = 'processing', claimed_at = ?
               WHERE seq = (
                 SELECT seq FROM queue_messages
                 WHERE status = 'pending'
                 ORDER BY score ASC
                 LIMIT 1
               )
               RETURNING *"#,
        )
        .bind(format_datetime(&Utc::now()))
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(backend_err)?;

        match row {
            Some(row) => Ok(Some(
                MessageRow::from_row(&row).map_err(backend_err)?.into_delivery()?,
            )),
            None => Ok(None),
        }
    }

    async fn ack(&self, tag: u64) -> Result<(), QueueError> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE seq = ? AND status = 'processing'")
            .bind(tag as i64)
            .execute(&self.pool.writer)
            .await
            .map_err(backend_err)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(tag));
        }
        Ok(())
    }

    async fn requeue(&self, tag: u64, message: &QueueMessage) -> Result<(), QueueError> {
        let mut tx = self.pool.writer.begin().await.map_err(backend_err)?;
        let removed = sqlx::query("DELETE FROM queue_messages WHERE seq = ? AND status = 'processing'")
            .bind(tag as i64)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        if removed.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(tag));
        }
        insert_pending(&mut *tx, message).await?;
        tx.commit().await.map_err(backend_err)
    }

    async fn dead_letter(&self, tag: u64, message: &QueueMessage) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"UPDATE queue_messages
               SET status = 'failed', attempts = ?, last_error = ?, claimed_at = NULL
               WHERE seq = ? AND status = 'processing'"#,
        )
        .bind(i64::from(message.attempts))
        .bind(&message.last_error)
        .bind(tag as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(backend_err)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(tag));
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE status = 'pending'")
                .fetch_one(&self.pool.reader)
                .await
                .map_err(backend_err)?;
        Ok(count as usize)
    }

    async fn dead_letters(&self) -> Result<Vec<QueueMessage>, QueueError> {
        let rows = sqlx::query("SELECT * FROM queue_messages WHERE status = 'failed' ORDER BY seq ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(backend_err)?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let delivery = MessageRow::from_row(row).map_err(backend_err)?.into_delivery()?;
            messages.push(delivery.message);
        }
        Ok(messages)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
