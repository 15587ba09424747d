//! Orchestration runtime and repository trait definitions for Conductor.
//!
//! This crate defines the "ports" (repository and queue backend traits) that
//! the infrastructure layer implements, plus everything that runs on top of
//! them: the execution engine, agent routing and health, the cron scheduler,
//! and the work queue contract. It depends only on `conductor-types` -- never
//! on `conductor-infra` or any database crate.

pub mod engine;
pub mod queue;
pub mod repository;
pub mod routing;
pub mod schedule;
pub mod store;
