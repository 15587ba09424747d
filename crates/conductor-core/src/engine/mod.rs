//! Workflow execution engine.
//!
//! - `executor`: the run driver (`WorkflowEngine`) and step executor port
//! - `context`: per-run mutable state
//! - `checkpoint`: durable run/step transitions over a `StateStore`
//! - `retry`: retry and failover attempt planning
//! - `template` / `expression`: input resolution and step conditions
//! - `registry` / `logger`: collaborator ports consumed by the engine

pub mod checkpoint;
pub mod context;
pub mod executor;
pub mod expression;
pub mod logger;
pub mod registry;
pub mod retry;
pub mod template;

pub use context::ExecutionContext;
pub use executor::{
    ExecuteOptions, ExecutionResult, ExecutorContext, ExecutorError, StepError, StepExecutor,
    StepResult, WorkflowEngine,
};
pub use registry::{InMemorySdkRegistry, SdkRegistry};
