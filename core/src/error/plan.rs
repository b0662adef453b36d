use thiserror::Error;

use crate::task::TaskType;

/// Structural errors raised while building a plan.
///
/// None of these are retried: a plan that fails here is never executed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("no tasks to plan")]
    NoTasks,

    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),

    #[error("dependency not found: task '{task_id}' depends on '{missing_dep}'")]
    DependencyNotFound { task_id: String, missing_dep: String },

    #[error("circular dependency detected at task '{task_id}': {}", cycle.join(" -> "))]
    CircularDependency { task_id: String, cycle: Vec<String> },

    #[error("dependency unsatisfied: task '{task_id}' waits on '{dependency}'")]
    DependencyUnsatisfied { task_id: String, dependency: String },

    #[error("task '{task_id}' has type '{task_type}' but no handler supports it")]
    UnsupportedTaskType { task_id: String, task_type: TaskType },
}

impl PlanError {
    /// Task id the error is about, when there is one.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::NoTasks => None,
            Self::DuplicateTaskId(id) => Some(id),
            Self::DependencyNotFound { task_id, .. }
            | Self::CircularDependency { task_id, .. }
            | Self::DependencyUnsatisfied { task_id, .. }
            | Self::UnsupportedTaskType { task_id, .. } => Some(task_id),
        }
    }
}
