//! Backend-independent delivery rules.

use std::collections::BTreeMap;

use conductor_types::queue::{MessagePriority, MessageStatus, QueueMessage};

use super::backend::{QueueBackend, QueueError};
use super::message_queue::MessageHandler;

/// Width of one priority tier in [`priority_score`].
pub const SCORE_TIER: i64 = 1 << 48;

/// Composite ordering key: all of a higher tier sorts before any of a lower
/// one, and `seq` orders within a tier.
pub fn priority_score(priority: MessagePriority, seq: u64) -> i64 {
    i64::from(priority.rank()) * SCORE_TIER + (seq as i64 % SCORE_TIER)
}

// ---------------------------------------------------------------------------
// PendingSet
// ---------------------------------------------------------------------------

/// Pending messages keyed by `(rank, seq)`.
#[derive(Debug, Default)]
pub struct PendingSet {
    entries: BTreeMap<(u8, u64), QueueMessage>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, seq: u64, message: QueueMessage) {
        self.entries.insert((message.priority.rank(), seq), message);
    }

    /// Remove and return the first message with its sequence number.
    pub fn pop_first(&mut self) -> Option<(u64, QueueMessage)> {
        self.entries
            .pop_first()
            .map(|((_, seq), message)| (seq, message))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// What happened to a delivered message.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Completed(QueueMessage),
    Requeued(QueueMessage),
    DeadLettered(QueueMessage),
}

impl Settlement {
    pub fn message(&self) -> &QueueMessage {
        match self {
            Self::Completed(m) | Self::Requeued(m) | Self::DeadLettered(m) => m,
        }
    }
}

/// Apply a handler outcome to a delivered message.
///
/// A failure counts one attempt; once `attempts` reaches `max_attempts` the
/// message is FAILED.
pub fn settle(mut message: QueueMessage, outcome: Result<(), String>) -> Settlement {
    match outcome {
        Ok(()) => {
            message.status = MessageStatus::Completed;
            Settlement::Completed(message)
        }
        Err(error) => {
            message.attempts += 1;
            message.last_error = Some(error);
            if message.attempts >= message.max_attempts {
                message.status = MessageStatus::Failed;
                Settlement::DeadLettered(message)
            } else {
                message.status = MessageStatus::Pending;
                Settlement::Requeued(message)
            }
        }
    }
}

/// Claim one message, run `handler` on it, and settle it on `backend`.
///
/// Returns `None` when nothing was pending.
pub async fn deliver_one<B, H>(backend: &B, handler: &H) -> Result<Option<Settlement>, QueueError>
where
    B: QueueBackend,
    H: MessageHandler + ?Sized,
{
    let Some(delivery) = backend.claim().await? else {
        return Ok(None);
    };

    let outcome = handler.handle(&delivery.message).await;
    let settlement = settle(delivery.message, outcome);
    let message = settlement.message();

    match &settlement {
        Settlement::Completed(_) => {
            backend.ack(delivery.tag).await?;
            tracing::debug!(message_id = %message.id, "message completed");
        }
        Settlement::Requeued(_) => {
            backend.requeue(delivery.tag, message).await?;
            tracing::warn!(
                message_id = %message.id,
                attempts = message.attempts,
                max_attempts = message.max_attempts,
                error = message.last_error.as_deref().unwrap_or_default(),
                "message handler failed; requeued"
            );
        }
        Settlement::DeadLettered(_) => {
            backend.dead_letter(delivery.tag, message).await?;
            tracing::error!(
                message_id = %message.id,
                attempts = message.attempts,
                error = message.last_error.as_deref().unwrap_or_default(),
                "message exhausted its attempts; dead-lettered"
            );
        }
    }
    Ok(Some(settlement))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_score_orders_tiers_then_sequence() {
        let high_late = priority_score(MessagePriority::High, 1_000_000);
        let normal_early = priority_score(MessagePriority::Normal, 1);
        let low_first = priority_score(MessagePriority::Low, 0);
        assert!(high_late < normal_early);
        assert!(normal_early < low_first);
        assert!(priority_score(MessagePriority::Normal, 1) < priority_score(MessagePriority::Normal, 2));
    }

    #[test]
    fn test_pending_set_priority_then_fifo() {
        let mut set = PendingSet::new();
        set.insert(0, QueueMessage::new("low", json!(null)).with_priority(MessagePriority::Low));
        set.insert(1, QueueMessage::new("n1", json!(null)));
        set.insert(2, QueueMessage::new("high", json!(null)).with_priority(MessagePriority::High));
        set.insert(3, QueueMessage::new("n2", json!(null)));

        let order: Vec<String> = std::iter::from_fn(|| set.pop_first())
            .map(|(_, m)| m.workflow_id)
            .collect();
        assert_eq!(order, vec!["high", "n1", "n2", "low"]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_settle_counts_attempts_until_failed() {
        let msg = QueueMessage::new("wf", json!(null)).with_max_attempts(2);

        let first = settle(msg, Err("boom".into()));
        let Settlement::Requeued(msg) = first else {
            panic!("expected requeue, got {first:?}");
        };
        assert_eq!(msg.attempts, 1);
        assert_eq!(msg.status, MessageStatus::Pending);
        assert_eq!(msg.last_error.as_deref(), Some("boom"));

        let second = settle(msg, Err("boom again".into()));
        let Settlement::DeadLettered(msg) = second else {
            panic!("expected dead letter, got {second:?}");
        };
        assert_eq!(msg.attempts, 2);
        assert_eq!(msg.status, MessageStatus::Failed);
    }

    #[test]
    fn test_settle_success_does_not_count_attempt() {
        let msg = QueueMessage::new("wf", json!(null));
        let settled = settle(msg, Ok(()));
        assert!(matches!(&settled, Settlement::Completed(m) if m.attempts == 0));
        assert_eq!(settled.message().status, MessageStatus::Completed);
    }
}
