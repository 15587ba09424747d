//! Broker-style queue backend.
//!
//! Models a priority queue on a message broker channel: every delivery gets a
//! fresh, monotonically increasing delivery tag, at most `prefetch` deliveries
//! may be unacknowledged at once, and a negative acknowledgement either puts
//! the message back at its original position or routes it to the
//! dead-letter exchange.

use std::collections::HashMap;

use conductor_types::queue::{MessageStatus, QueueMessage};
use tokio::sync::Mutex;

use super::backend::{Delivery, QueueBackend, QueueError};
use super::delivery::PendingSet;

#[derive(Debug, Default)]
struct Channel {
    queue: PendingSet,
    /// delivery tag -> (enqueue sequence, message)
    unacked: HashMap<u64, (u64, QueueMessage)>,
    dead_letter_exchange: Vec<QueueMessage>,
    last_delivery_tag: u64,
    next_seq: u64,
}

impl Channel {
    fn publish(&mut self, mut message: QueueMessage) {
        message.status = MessageStatus::Pending;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert(seq, message);
    }

    fn settle(&mut self, tag: u64) -> Result<(u64, QueueMessage), QueueError> {
        self.unacked
            .remove(&tag)
            .ok_or(QueueError::UnknownDelivery(tag))
    }
}

#[derive(Debug)]
pub struct BrokerBackend {
    channel: Mutex<Channel>,
    /// Maximum unacknowledged deliveries; 0 means unlimited.
    prefetch: usize,
}

impl BrokerBackend {
    pub fn new(prefetch: usize) -> Self {
        Self {
            channel: Mutex::new(Channel::default()),
            prefetch,
        }
    }

    pub async fn basic_publish(&self, message: &QueueMessage) {
        self.channel.lock().await.publish(message.clone());
    }

    /// Next message, or `None` if the queue is empty or the prefetch window
    /// is full.
    pub async fn basic_get(&self) -> Option<Delivery> {
        let mut channel = self.channel.lock().await;
        if self.prefetch > 0 && channel.unacked.len() >= self.prefetch {
            return None;
        }
        let (seq, mut message) = channel.queue.pop_first()?;
        message.status = MessageStatus::Processing;
        channel.last_delivery_tag += 1;
        let tag = channel.last_delivery_tag;
        channel.unacked.insert(tag, (seq, message.clone()));
        Some(Delivery { tag, message })
    }

    pub async fn basic_ack(&self, tag: u64) -> Result<(), QueueError> {
        self.channel.lock().await.settle(tag).map(|_| ())
    }

    /// With `requeue` the message returns to its original queue position;
    /// without, it is dead-lettered unchanged.
    pub async fn basic_nack(&self, tag: u64, requeue: bool) -> Result<(), QueueError> {
        let mut channel = self.channel.lock().await;
        let (seq, mut message) = channel.settle(tag)?;
        if requeue {
            message.status = MessageStatus::Pending;
            channel.queue.insert(seq, message);
        } else {
            message.status = MessageStatus::Failed;
            channel.dead_letter_exchange.push(message);
        }
        Ok(())
    }

    pub async fn unacked(&self) -> usize {
        self.channel.lock().await.unacked.len()
    }
}

impl Default for BrokerBackend {
    fn default() -> Self {
        Self::new(0)
    }
}

impl QueueBackend for BrokerBackend {
    async fn push(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.basic_publish(message).await;
        Ok(())
    }

    async fn claim(&self) -> Result<Option<Delivery>, QueueError> {
        Ok(self.basic_get().await)
    }

    async fn ack(&self, tag: u64) -> Result<(), QueueError> {
        self.basic_ack(tag).await
    }

    // A plain nack would redeliver the stale attempt count, so retries are
    // acked and republished at the tail.
    async fn requeue(&self, tag: u64, message: &QueueMessage) -> Result<(), QueueError> {
        let mut channel = self.channel.lock().await;
        channel.settle(tag)?;
        channel.publish(message.clone());
        Ok(())
    }

    async fn dead_letter(&self, tag: u64, message: &QueueMessage) -> Result<(), QueueError> {
        let mut channel = self.channel.lock().await;
        channel.settle(tag)?;
        let mut message = message.clone();
        message.status = MessageStatus::Failed;
        channel.dead_letter_exchange.push(message);
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.channel.lock().await.queue.len())
    }

    async fn dead_letters(&self) -> Result<Vec<QueueMessage>, QueueError> {
        Ok(self.channel.lock().await.dead_letter_exchange.clone())
    }
}
