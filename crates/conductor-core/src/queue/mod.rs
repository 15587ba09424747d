//! Priority work queue.
//!
//! `MessageQueue` implements the delivery contract once (priority order,
//! FIFO within a tier, at-least-once with a bounded attempt budget) on top of
//! any [`QueueBackend`]. Backends only provide the storage primitives.
//!
//! - `memory`: in-process ordered set
//! - `broker`: broker-style channel with delivery tags and prefetch
//! - `conductor_infra::sqlite::queue`: durable SQLite table

pub mod backend;
pub mod broker;
pub mod delivery;
pub mod memory;
pub mod message_queue;
pub mod worker;

pub use backend::{Delivery, QueueBackend, QueueError};
pub use broker::BrokerBackend;
pub use delivery::Settlement;
pub use memory::MemoryBackend;
pub use message_queue::{FnHandler, MessageHandler, MessageQueue};
pub use worker::{QueueWorker, WorkflowSource};
