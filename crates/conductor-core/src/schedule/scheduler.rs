//! Due-job scheduler.
//!
//! Holds a registry of [`ScheduledJob`]s and, on each cycle, invokes a single
//! callback for every enabled job whose `next_run` has passed. The callback
//! decides what "running" a job means (the operator binary publishes it to
//! the durable queue). Callback errors are logged and never stop the loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use conductor_types::schedule::{JobSpec, ScheduledJob};
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cron::{CronError, CronParser};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid schedule for job {job_id}: {source}")]
    InvalidSchedule {
        job_id: String,
        #[source]
        source: CronError,
    },

    #[error("job {0} is already registered")]
    DuplicateJob(String),

    #[error("job {0} not registered in scheduler")]
    JobNotFound(String),

    #[error("scheduler loop is already running")]
    AlreadyRunning,
}

/// Invoked once per due job. Errors are logged by the scheduler.
pub type JobCallback =
    Arc<dyn Fn(ScheduledJob) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    jobs: RwLock<HashMap<String, ScheduledJob>>,
    callback: JobCallback,
    check_interval: Duration,
    /// Held for the duration of a cycle so `stop()` can wait for it.
    cycle: Mutex<()>,
    cancel: CancellationToken,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(callback: JobCallback, check_interval: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            callback,
            check_interval,
            cycle: Mutex::new(()),
            cancel: CancellationToken::new(),
            handle: StdMutex::new(None),
        }
    }

    /// Register a job, computing its first `next_run` from now.
    pub async fn add_job(&self, spec: JobSpec) -> Result<ScheduledJob, SchedulerError> {
        self.add_job_at(spec, Utc::now()).await
    }

    /// Register a job, computing its first `next_run` from `now`.
    pub async fn add_job_at(
        &self,
        spec: JobSpec,
        now: DateTime<Utc>,
    ) -> Result<ScheduledJob, SchedulerError> {
        let schedule =
            CronParser::parse(&spec.schedule).map_err(|source| SchedulerError::InvalidSchedule {
                job_id: spec.id.clone(),
                source,
            })?;

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&spec.id) {
            return Err(SchedulerError::DuplicateJob(spec.id));
        }

        let next_run = schedule.next_after(now);
        if next_run.is_none() {
            tracing::warn!(
                job_id = %spec.id,
                schedule = %spec.schedule,
                "schedule has no upcoming run; job will never fire"
            );
        }

        let job = ScheduledJob {
            id: spec.id,
            workflow_path: spec.workflow_path,
            schedule: spec.schedule,
            inputs: spec.inputs,
            enabled: spec.enabled,
            next_run,
            last_run: None,
            run_count: 0,
        };
        tracing::info!(
            job_id = %job.id,
            schedule = %job.schedule,
            next_run = ?job.next_run,
            "registered scheduled job"
        );
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    /// Remove a job. Returns whether it existed.
    pub async fn remove_job(&self, job_id: &str) -> bool {
        let removed = self.jobs.write().await.remove(job_id).is_some();
        if removed {
            tracing::info!(job_id, "removed scheduled job");
        }
        removed
    }

    /// Enable or disable a job. Re-enabling recomputes `next_run` from now
    /// so missed runs are not replayed.
    pub async fn set_enabled(&self, job_id: &str, enabled: bool) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;

        if enabled && !job.enabled {
            job.next_run = CronParser::next_run(&job.schedule, Some(Utc::now()));
        }
        job.enabled = enabled;
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Option<ScheduledJob> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// All jobs, ordered by id.
    pub async fn list_jobs(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Run one due-check cycle at `now`. Returns the ids of the jobs fired.
    ///
    /// The job map is not locked while callbacks run, so jobs may be added or
    /// removed concurrently. A job removed mid-cycle is not updated.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Vec<String> {
        let _cycle = self.cycle.lock().await;

        let mut due: Vec<ScheduledJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.enabled && job.next_run.is_some_and(|next| next <= now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_run.cmp(&b.next_run).then_with(|| a.id.cmp(&b.id)));

        let mut fired = Vec::with_capacity(due.len());
        for job in due {
            let job_id = job.id.clone();
            tracing::debug!(job_id = %job_id, "job due");

            if let Err(error) = (self.callback)(job).await {
                tracing::error!(job_id = %job_id, error = %error, "scheduled job callback failed");
            }

            let mut jobs = self.jobs.write().await;
            if let Some(job) = jobs.get_mut(&job_id) {
                job.last_run = Some(now);
                job.run_count += 1;
                job.next_run = CronParser::next_run(&job.schedule, Some(now));
                tracing::debug!(job_id = %job_id, next_run = ?job.next_run, "rescheduled job");
            }
            fired.push(job_id);
        }
        fired
    }

    /// Start the periodic check loop on the current runtime.
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if handle.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let scheduler = Arc::clone(self);
        let cancel = self.cancel.clone();
        let period = self.check_interval;
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs = period.as_secs(), "scheduler started");
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let fired = scheduler.run_once(Utc::now()).await;
                        if !fired.is_empty() {
                            tracing::info!(count = fired.len(), "fired scheduled jobs");
                        }
                    }
                }
            }
            tracing::info!("scheduler stopped");
        }));
        Ok(())
    }

    /// Signal the loop to stop and wait for any in-flight cycle to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "scheduler task ended abnormally");
            }
        }
        // A cycle driven directly through run_once may still hold the lock.
        drop(self.cycle.lock().await);
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .map(|h| h.is_some())
            .unwrap_or(false)
            && !self.cancel.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
