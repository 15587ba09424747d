//! Queue backend port.

use conductor_types::error::RepositoryError;
use conductor_types::queue::QueueMessage;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    #[error("queue has been stopped")]
    Stopped,
}

/// A claimed message. `tag` identifies the claim when settling it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub tag: u64,
    pub message: QueueMessage,
}

/// Storage primitives a queue needs.
///
/// `claim` must hand out the lowest `(priority rank, enqueue order)` pending
/// message and hide it from other claimers until it is settled by exactly one
/// of `ack`, `requeue`, or `dead_letter`. A requeued message goes to the back
/// of its priority tier.
pub trait QueueBackend: Send + Sync {
    /// Append a pending message.
    fn push(
        &self,
        message: &QueueMessage,
    ) -> impl std::future::Future<Output = Result<(), QueueError>> + Send;

    /// Take the next pending message, if any.
    fn claim(&self) -> impl std::future::Future<Output = Result<Option<Delivery>, QueueError>> + Send;

    /// The handler succeeded; forget the message.
    fn ack(&self, tag: u64) -> impl std::future::Future<Output = Result<(), QueueError>> + Send;

    /// Return `message` (already updated) to the pending set.
    fn requeue(
        &self,
        tag: u64,
        message: &QueueMessage,
    ) -> impl std::future::Future<Output = Result<(), QueueError>> + Send;

    /// Park `message` as FAILED, out of the pending set.
    fn dead_letter(
        &self,
        tag: u64,
        message: &QueueMessage,
    ) -> impl std::future::Future<Output = Result<(), QueueError>> + Send;

    /// Number of pending (unclaimed) messages.
    fn len(&self) -> impl std::future::Future<Output = Result<usize, QueueError>> + Send;

    /// Messages that exhausted their attempts, oldest first.
    fn dead_letters(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<QueueMessage>, QueueError>> + Send;
}
