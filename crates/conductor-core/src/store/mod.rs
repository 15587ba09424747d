//! In-process implementations of the repository ports.

pub mod memory;

pub use memory::InMemoryStateStore;
