use thiserror::Error;

use super::{PlanError, StateError, StorageError};
use crate::plan::PlanStatus;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("plan '{plan_id}' is {status:?}, expected one of {expected}")]
    InvalidPlanState {
        plan_id: String,
        status: PlanStatus,
        expected: &'static str,
    },

    #[error("plan '{0}' has no checkpoint awaiting a decision")]
    NoPendingCheckpoint(String),

    #[error("checkpoint requested a modification but no plan modifier is configured")]
    ModifierUnavailable,

    #[error("collaborator error: {0}")]
    Collaborator(#[from] anyhow::Error),
}

impl From<StorageError> for OrchestratorError {
    fn from(err: StorageError) -> Self {
        Self::State(StateError::Storage(err))
    }
}
