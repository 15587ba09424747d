//! The queue contract: publish, consume, queue_length, stop.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use conductor_types::queue::{MessageStatus, QueueMessage};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backend::{QueueBackend, QueueError};
use super::delivery::{Settlement, deliver_one};

/// Default sleep between polls of an empty queue.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Processes one delivered message. An `Err` counts as a failed attempt.
pub trait MessageHandler: Send + Sync {
    fn handle(
        &self,
        message: &QueueMessage,
    ) -> impl std::future::Future<Output = Result<(), String>> + Send;
}

/// Adapts an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(pub F);

impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(QueueMessage) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), String>> + Send,
{
    fn handle(
        &self,
        message: &QueueMessage,
    ) -> impl std::future::Future<Output = Result<(), String>> + Send {
        (self.0)(message.clone())
    }
}

// ---------------------------------------------------------------------------
// MessageQueue
// ---------------------------------------------------------------------------

pub struct MessageQueue<B: QueueBackend> {
    backend: Arc<B>,
    poll_interval: Duration,
    notify: Arc<Notify>,
    cancel: CancellationToken,
    consumers: StdMutex<Vec<JoinHandle<()>>>,
}

impl<B: QueueBackend + 'static> MessageQueue<B> {
    pub fn new(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    pub fn from_arc(backend: Arc<B>) -> Self {
        Self {
            backend,
            poll_interval: DEFAULT_POLL_INTERVAL,
            notify: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            consumers: StdMutex::new(Vec::new()),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Enqueue `message` as pending. Returns its id.
    pub async fn publish(&self, mut message: QueueMessage) -> Result<String, QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::Stopped);
        }
        message.status = MessageStatus::Pending;
        self.backend.push(&message).await?;
        self.notify.notify_one();
        tracing::debug!(
            message_id = %message.id,
            workflow_id = %message.workflow_id,
            priority = message.priority.as_str(),
            "message published"
        );
        Ok(message.id)
    }

    /// Start one background consumer delivering to `handler` until `stop()`.
    pub fn consume<H: MessageHandler + 'static>(&self, handler: Arc<H>) -> Result<(), QueueError> {
        self.consume_with(handler, 1)
    }

    /// Start `concurrency` background consumers sharing `handler`.
    pub fn consume_with<H: MessageHandler + 'static>(
        &self,
        handler: Arc<H>,
        concurrency: usize,
    ) -> Result<(), QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::Stopped);
        }
        let mut consumers = self
            .consumers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for _ in 0..concurrency.max(1) {
            let worker = consumers.len();
            consumers.push(tokio::spawn(consume_loop(
                worker,
                Arc::clone(&self.backend),
                Arc::clone(&handler),
                Arc::clone(&self.notify),
                self.cancel.clone(),
                self.poll_interval,
            )));
        }
        Ok(())
    }

    /// Deliver a single message synchronously, if one is pending.
    pub async fn process_next<H: MessageHandler>(
        &self,
        handler: &H,
    ) -> Result<Option<Settlement>, QueueError> {
        deliver_one(self.backend.as_ref(), handler).await
    }

    /// Number of pending messages.
    pub async fn queue_length(&self) -> Result<usize, QueueError> {
        self.backend.len().await
    }

    pub async fn dead_letters(&self) -> Result<Vec<QueueMessage>, QueueError> {
        self.backend.dead_letters().await
    }

    /// Stop all consumers. Messages being handled are allowed to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let consumers: Vec<JoinHandle<()>> = self
            .consumers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in consumers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "queue consumer ended abnormally");
            }
        }
    }
}

async fn consume_loop<B, H>(
    worker: usize,
    backend: Arc<B>,
    handler: Arc<H>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
    poll_interval: Duration,
) where
    B: QueueBackend,
    H: MessageHandler,
{
    tracing::debug!(worker, "queue consumer started");
    while !cancel.is_cancelled() {
        match deliver_one(backend.as_ref(), handler.as_ref()).await {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => tracing::warn!(worker, error = %e, "queue delivery failed"),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = notify.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    tracing::debug!(worker, "queue consumer stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{BrokerBackend, MemoryBackend};
    use conductor_types::queue::MessagePriority;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn msg(wf: &str, priority: MessagePriority) -> QueueMessage {
        QueueMessage::new(wf, json!(null)).with_priority(priority)
    }

    async fn drain_order<B: QueueBackend + 'static>(queue: &MessageQueue<B>) -> Vec<String> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = FnHandler(move |m: QueueMessage| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(m.workflow_id);
                Ok::<(), String>(())
            }
        });
        while queue.process_next(&handler).await.unwrap().is_some() {}
        let order = seen.lock().unwrap().clone();
        order
    }

    async fn publish_mixed<B: QueueBackend + 'static>(queue: &MessageQueue<B>) {
        queue.publish(msg("low-1", MessagePriority::Low)).await.unwrap();
        queue.publish(msg("normal-1", MessagePriority::Normal)).await.unwrap();
        queue.publish(msg("high-1", MessagePriority::High)).await.unwrap();
        queue.publish(msg("normal-2", MessagePriority::Normal)).await.unwrap();
        queue.publish(msg("high-2", MessagePriority::High)).await.unwrap();
    }

    const EXPECTED: [&str; 5] = ["high-1", "high-2", "normal-1", "normal-2", "low-1"];

    #[tokio::test]
    async fn test_priority_then_fifo_memory() {
        let queue = MessageQueue::new(MemoryBackend::new());
        publish_mixed(&queue).await;
        assert_eq!(queue.queue_length().await.unwrap(), 5);
        assert_eq!(drain_order(&queue).await, EXPECTED);
        assert_eq!(queue.queue_length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_priority_then_fifo_broker() {
        let queue = MessageQueue::new(BrokerBackend::new(4));
        publish_mixed(&queue).await;
        assert_eq!(drain_order(&queue).await, EXPECTED);
    }

    async fn assert_fails_exactly_once<B: QueueBackend + 'static>(queue: MessageQueue<B>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = FnHandler(move |_m: QueueMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), String>("always".to_string()) }
        });

        queue
            .publish(QueueMessage::new("wf", json!({})).with_max_attempts(3))
            .await
            .unwrap();

        let mut settlements = Vec::new();
        while let Some(s) = queue.process_next(&handler).await.unwrap() {
            settlements.push(s);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(settlements.len(), 3);
        assert!(matches!(settlements[0], Settlement::Requeued(_)));
        assert!(matches!(settlements[1], Settlement::Requeued(_)));
        assert!(matches!(settlements[2], Settlement::DeadLettered(_)));

        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].status, MessageStatus::Failed);
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(dead[0].last_error.as_deref(), Some("always"));
        assert_eq!(queue.queue_length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_exactly_once_after_max_attempts() {
        assert_fails_exactly_once(MessageQueue::new(MemoryBackend::new())).await;
        assert_fails_exactly_once(MessageQueue::new(BrokerBackend::new(1))).await;
    }

    #[tokio::test]
    async fn test_consume_delivers_until_stopped() {
        let queue = MessageQueue::new(MemoryBackend::new()).with_poll_interval(Duration::from_millis(5));
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handled);
        let handler = Arc::new(FnHandler(move |_m: QueueMessage| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), String>(())
            }
        }));

        queue.consume_with(handler, 2).unwrap();
        for i in 0..10 {
            queue.publish(msg(&format!("wf-{i}"), MessagePriority::Normal)).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while handled.load(Ordering::SeqCst) < 10 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("consumers should drain the queue");

        queue.stop().await;
        assert!(matches!(
            queue.publish(msg("late", MessagePriority::High)).await,
            Err(QueueError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_stop_lets_in_flight_message_finish() {
        let queue = MessageQueue::new(MemoryBackend::new()).with_poll_interval(Duration::from_millis(5));
        let started = Arc::new(Notify::new());
        let finished = Arc::new(AtomicBool::new(false));

        let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
        let handler = Arc::new(FnHandler(move |_m: QueueMessage| {
            let (s, f) = (Arc::clone(&s), Arc::clone(&f));
            async move {
                s.notify_one();
                tokio::time::sleep(Duration::from_millis(50)).await;
                f.store(true, Ordering::SeqCst);
                Ok::<(), String>(())
            }
        }));

        queue.publish(msg("slow", MessagePriority::Normal)).await.unwrap();
        queue.consume(handler).unwrap();
        started.notified().await;
        queue.stop().await;

        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(queue.backend().in_flight().await, 0);
    }
}
