//! Scheduler daemon: fires configured cron jobs into the durable queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::FutureExt;
use serde_json::Value;

use conductor_core::queue::{MessageQueue, QueueBackend};
use conductor_core::schedule::{JobCallback, Scheduler};
use conductor_types::queue::QueueMessage;
use conductor_types::schedule::ScheduledJob;

use crate::state::AppState;

/// Run the scheduler until Ctrl-C.
pub async fn run_scheduler(state: &AppState) -> Result<()> {
    let callback = job_publisher(
        Arc::clone(&state.queue),
        state.config.queue.default_max_attempts,
    );
    let interval = Duration::from_secs(state.config.scheduler.check_interval_secs.max(1));
    let scheduler = Arc::new(Scheduler::new(callback, interval));

    for spec in &state.config.jobs {
        scheduler
            .add_job(spec.clone())
            .await
            .with_context(|| format!("failed to register job '{}'", spec.id))?;
    }

    if state.config.jobs.is_empty() {
        tracing::warn!("no jobs configured; the scheduler will idle");
    }

    scheduler.start()?;
    println!(
        "Scheduler running with {} job(s). Press Ctrl-C to stop.",
        state.config.jobs.len()
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("shutting down scheduler");
    scheduler.stop().await;
    state.queue.stop().await;
    Ok(())
}

/// Callback that turns each due job into a queue message.
///
/// The job's inputs become the payload; `job_id` and `scheduled_at` are kept
/// in the message metadata.
pub fn job_publisher<B: QueueBackend + 'static>(
    queue: Arc<MessageQueue<B>>,
    max_attempts: u32,
) -> JobCallback {
    Arc::new(move |job: ScheduledJob| {
        let queue = Arc::clone(&queue);
        async move {
            let mut message = QueueMessage::new(job.workflow_path.clone(), job.inputs.clone())
                .with_max_attempts(max_attempts);
            message
                .metadata
                .insert("job_id".to_string(), Value::String(job.id.clone()));
            if let Some(at) = job.next_run {
                message
                    .metadata
                    .insert("scheduled_at".to_string(), Value::String(at.to_rfc3339()));
            }

            let id = queue.publish(message).await.map_err(|e| e.to_string())?;
            tracing::info!(job_id = %job.id, message_id = %id, "scheduled run enqueued");
            Ok(())
        }
        .boxed()
    })
}
