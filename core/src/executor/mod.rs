//! Dependency graph and batch scheduling primitives.
//!
//! # Architecture
//!
//! ```text
//! Vec<Task>
//!   ↓
//! DependencyGraph::from_tasks()  → duplicate / missing / cycle checks
//!   ↓
//! DependencyGraph::levels()      → phases (plan builder)
//! DependencyGraph::critical_path()
//!   ↓
//! compute_batches()              → Vec<Vec<String>> per phase
//!   ↓
//! execute_batch_parallel()       → joined outcomes (orchestrator)
//! ```

pub mod backoff;
mod graph;
mod scheduler;

pub use backoff::{backoff, Sleeper, TokioSleeper, MIN_RETRY_DELAY};
pub use graph::{CriticalPath, DependencyGraph};
pub use scheduler::{compute_batches, execute_batch_parallel};
