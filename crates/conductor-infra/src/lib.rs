//! Infrastructure layer for Conductor.
//!
//! Implements the ports defined in `conductor-core`: the SQLite state store
//! and durable queue backend, the TOML config loader, the JSON-lines
//! execution logger, and a filesystem workflow source.

pub mod config;
pub mod logger;
pub mod sqlite;
pub mod workflow_source;
