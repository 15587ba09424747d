//! Shared domain types for Conductor.
//!
//! This crate contains the data model used across the orchestration runtime:
//! workflows and steps, execution records and checkpoints, scheduled jobs,
//! queue messages, agent profiles and health, and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod agent;
pub mod config;
pub mod error;
pub mod execution;
pub mod queue;
pub mod schedule;
pub mod workflow;
