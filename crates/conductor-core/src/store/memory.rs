//! In-memory `StateStore` for tests and ephemeral deployments.
//!
//! Holds executions and checkpoints behind a single `RwLock`, so every write
//! is visible to the next read. Nothing survives a process restart.

use std::collections::{BTreeMap, HashMap};

use conductor_types::error::RepositoryError;
use conductor_types::execution::{
    ExecutionFilter, ExecutionRecord, ExecutionStats, ExecutionStatus, ExecutionUpdate,
    StepCheckpoint,
};
use tokio::sync::RwLock;

use crate::repository::state::{StateStore, retention_cutoff};

#[derive(Default)]
struct Inner {
    executions: HashMap<String, ExecutionRecord>,
    checkpoints: HashMap<String, BTreeMap<u32, StepCheckpoint>>,
}

/// `StateStore` backed by process memory.
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: RwLock<Inner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        if inner.executions.contains_key(&record.run_id) {
            return Err(RepositoryError::Conflict(format!(
                "execution '{}' already exists",
                record.run_id
            )));
        }
        inner
            .executions
            .insert(record.run_id.clone(), record.clone());
        Ok(())
    }

    async fn update_execution(
        &self,
        run_id: &str,
        update: &ExecutionUpdate,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .executions
            .get_mut(run_id)
            .ok_or(RepositoryError::NotFound)?;
        record.apply(update);
        Ok(())
    }

    async fn get_execution(&self, run_id: &str) -> Result<Option<ExecutionRecord>, RepositoryError> {
        Ok(self.inner.read().await.executions.get(run_id).cloned())
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut records: Vec<ExecutionRecord> = inner
            .executions
            .values()
            .filter(|r| {
                filter
                    .workflow_id
                    .as_deref()
                    .is_none_or(|wf| r.workflow_id == wf)
            })
            .filter(|r| filter.status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();

        records.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.run_id.cmp(&a.run_id))
        });

        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l as usize);
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete_execution(&self, run_id: &str) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.write().await;
        inner.checkpoints.remove(run_id);
        Ok(inner.executions.remove(run_id).is_some())
    }

    async fn get_stats(&self, workflow_id: Option<&str>) -> Result<ExecutionStats, RepositoryError> {
        let inner = self.inner.read().await;
        let (mut total, mut completed, mut failed, mut running) = (0, 0, 0, 0);
        for record in inner
            .executions
            .values()
            .filter(|r| workflow_id.is_none_or(|wf| r.workflow_id == wf))
        {
            total += 1;
            match record.status {
                ExecutionStatus::Completed => completed += 1,
                ExecutionStatus::Failed => failed += 1,
                ExecutionStatus::Running => running += 1,
                _ => {}
            }
        }
        Ok(ExecutionStats::from_counts(total, completed, failed, running))
    }

    async fn cleanup(&self, retention_days: u32) -> Result<u64, RepositoryError> {
        let Some(cutoff) = retention_cutoff(retention_days) else {
            return Ok(0);
        };
        let mut inner = self.inner.write().await;
        let expired: Vec<String> = inner
            .executions
            .values()
            .filter(|r| r.started_at < cutoff)
            .map(|r| r.run_id.clone())
            .collect();

        for run_id in &expired {
            inner.executions.remove(run_id);
            inner.checkpoints.remove(run_id);
        }

        tracing::debug!(deleted = expired.len(), retention_days, "cleaned up executions");
        Ok(expired.len() as u64)
    }

    async fn save_checkpoint(&self, checkpoint: &StepCheckpoint) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        inner
            .checkpoints
            .entry(checkpoint.run_id.clone())
            .or_default()
            .insert(checkpoint.step_index, checkpoint.clone());
        Ok(())
    }

    async fn get_checkpoints(&self, run_id: &str) -> Result<Vec<StepCheckpoint>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .checkpoints
            .get(run_id)
            .map(|steps| steps.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_last_checkpoint(
        &self,
        run_id: &str,
    ) -> Result<Option<StepCheckpoint>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .checkpoints
            .get(run_id)
            .and_then(|steps| steps.values().next_back().cloned()))
    }
}
