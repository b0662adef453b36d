use thiserror::Error;

use crate::plan::PlanStatus;
use crate::task::TaskStatus;

/// Errors raised by a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(String),

    #[error("key '{key}' is owned by '{holder}'")]
    OwnerMismatch { key: String, holder: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors raised by the state & recovery manager.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("no persisted state for plan '{0}'")]
    NotFound(String),

    #[error(
        "state corruption in '{key}': {reason}{}",
        last_good_checkpoint
            .as_ref()
            .map(|c| format!(" (last good checkpoint: {c})"))
            .unwrap_or_default()
    )]
    StateCorruption {
        key: String,
        reason: String,
        last_good_checkpoint: Option<String>,
    },

    #[error("plan '{plan_id}' cannot be resumed (status {status:?})")]
    NotResumable { plan_id: String, status: PlanStatus },

    #[error("invalid plan transition from {from:?} to {to:?}")]
    InvalidPlanTransition { from: PlanStatus, to: PlanStatus },

    #[error("invalid transition of task '{task_id}' from {from:?} to {to:?}")]
    InvalidTaskTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("unknown task '{task_id}' in plan '{plan_id}'")]
    TaskNotFound { plan_id: String, task_id: String },

    #[error("unknown checkpoint '{checkpoint_id}' in plan '{plan_id}'")]
    CheckpointNotFound {
        plan_id: String,
        checkpoint_id: String,
    },

    #[error("no snapshot for checkpoint '{checkpoint_id}' of plan '{plan_id}'")]
    SnapshotNotFound {
        plan_id: String,
        checkpoint_id: String,
    },

    #[error("failed to encode state: {0}")]
    Encode(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl StateError {
    /// Checkpoint an operator can roll back to, if the error carries one.
    pub fn recovery_hint(&self) -> Option<&str> {
        match self {
            Self::StateCorruption {
                last_good_checkpoint,
                ..
            } => last_good_checkpoint.as_deref(),
            _ => None,
        }
    }
}
