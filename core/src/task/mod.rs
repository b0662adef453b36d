//! Task model: the atomic unit of work and its status lifecycle.

pub mod transitions;
pub mod types;

pub use transitions::{TaskTransition, TransitionCause};
pub use types::{Task, TaskResult, TaskRuntime, TaskStatus, TaskType};
