//! In-process queue backend.

use std::collections::HashMap;

use conductor_types::queue::{MessageStatus, QueueMessage};
use tokio::sync::Mutex;

use super::backend::{Delivery, QueueBackend, QueueError};
use super::delivery::PendingSet;

#[derive(Debug, Default)]
struct MemoryState {
    pending: PendingSet,
    in_flight: HashMap<u64, QueueMessage>,
    dead: Vec<QueueMessage>,
    next_seq: u64,
}

impl MemoryState {
    fn enqueue(&mut self, mut message: QueueMessage) {
        message.status = MessageStatus::Pending;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(seq, message);
    }

    fn take_in_flight(&mut self, tag: u64) -> Result<QueueMessage, QueueError> {
        self.in_flight
            .remove(&tag)
            .ok_or(QueueError::UnknownDelivery(tag))
    }
}

/// Lost on process exit. The delivery tag is the message's sequence number.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently claimed and not yet settled.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

impl QueueBackend for MemoryBackend {
    async fn push(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.state.lock().await.enqueue(message.clone());
        Ok(())
    }

    async fn claim(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state.lock().await;
        let Some((seq, mut message)) = state.pending.pop_first() else {
            return Ok(None);
        };
        message.status = MessageStatus::Processing;
        state.in_flight.insert(seq, message.clone());
        Ok(Some(Delivery { tag: seq, message }))
    }

    async fn ack(&self, tag: u64) -> Result<(), QueueError> {
        self.state.lock().await.take_in_flight(tag).map(|_| ())
    }

    async fn requeue(&self, tag: u64, message: &QueueMessage) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.take_in_flight(tag)?;
        state.enqueue(message.clone());
        Ok(())
    }

    async fn dead_letter(&self, tag: u64, message: &QueueMessage) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.take_in_flight(tag)?;
        let mut message = message.clone();
        message.status = MessageStatus::Failed;
        state.dead.push(message);
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.state.lock().await.pending.len())
    }

    async fn dead_letters(&self) -> Result<Vec<QueueMessage>, QueueError> {
        Ok(self.state.lock().await.dead.clone())
    }
}
