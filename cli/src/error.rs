use conductor_core::api::{OrchestratorError, PlanError, StateError, StorageError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("task file error: {0}")]
    TaskFile(String),
    #[error("plan rejected: {0}")]
    Plan(#[from] PlanError),
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("orchestration failed: {0}")]
    Orchestrator(#[from] OrchestratorError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl CliError {
    fn state(&self) -> Option<&StateError> {
        match self {
            Self::State(e) => Some(e),
            Self::Orchestrator(OrchestratorError::State(e)) => Some(e),
            _ => None,
        }
    }

    /// Operator follow-up printed under the error, when one applies.
    pub fn hint(&self) -> Option<String> {
        let state = self.state()?;
        match state {
            StateError::StateCorruption { key, .. } => {
                let plan_id = key.strip_prefix("plan/").unwrap_or(key);
                Some(match state.recovery_hint() {
                    Some(cp) => format!("roll back with: conductor rollback {plan_id} {cp}"),
                    None => "no checkpoint snapshot to roll back to".to_string(),
                })
            }
            StateError::Storage(StorageError::OwnerMismatch { key, holder }) => {
                let plan_id = key.strip_prefix("plan/").unwrap_or(key);
                Some(format!(
                    "plan is held by '{holder}'; if that process is gone run: conductor unlock {plan_id}"
                ))
            }
            _ => None,
        }
    }
}

// 0: completed
// 2: plan failed
// 3: plan cancelled
// 11: config error
// 12: task file unreadable or malformed
// 13: plan rejected (structure, unsupported type)
// 14: plan or snapshot not found
// 15: persisted state corrupt
// 16: plan leased by another owner
// 17: plan not resumable or not in the expected state
// 20: io / storage error
// 50: internal/uncategorized
pub const EXIT_FAILED: i32 = 2;
pub const EXIT_CANCELLED: i32 = 3;

pub fn exit_code_for_error(e: &CliError) -> i32 {
    if let Some(state) = e.state() {
        return exit_code_for_state(state);
    }
    match e {
        CliError::Config(_) => 11,
        CliError::TaskFile(_) => 12,
        CliError::Plan(_) | CliError::Orchestrator(OrchestratorError::Plan(_)) => 13,
        CliError::Orchestrator(OrchestratorError::InvalidPlanState { .. })
        | CliError::Orchestrator(OrchestratorError::NoPendingCheckpoint(_)) => 17,
        CliError::Io(_) => 20,
        CliError::State(_) | CliError::Orchestrator(_) | CliError::Anyhow(_) => 50,
    }
}

fn exit_code_for_state(e: &StateError) -> i32 {
    match e {
        StateError::NotFound(_)
        | StateError::CheckpointNotFound { .. }
        | StateError::SnapshotNotFound { .. }
        | StateError::TaskNotFound { .. } => 14,
        StateError::StateCorruption { .. } => 15,
        StateError::Storage(StorageError::OwnerMismatch { .. }) => 16,
        StateError::NotResumable { .. }
        | StateError::InvalidPlanTransition { .. }
        | StateError::InvalidTaskTransition { .. } => 17,
        StateError::Storage(_) => 20,
        StateError::Encode(_) => 50,
    }
}
