use serde::Serialize;

use super::traits::ErrorCategory;
use crate::plan::PlanStatus;

/// Progress notifications for observers (progress bars, logs).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    PlanStarted {
        plan_id: String,
        total_tasks: usize,
    },
    BatchStarted {
        plan_id: String,
        phase_id: String,
        task_ids: Vec<String>,
    },
    TaskStarted {
        plan_id: String,
        task_id: String,
        attempt: u32,
    },
    TaskCompleted {
        plan_id: String,
        task_id: String,
        duration_ms: u64,
    },
    TaskFailed {
        plan_id: String,
        task_id: String,
        error: String,
        category: Option<ErrorCategory>,
    },
    TaskRetrying {
        plan_id: String,
        task_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    TaskSkipped {
        plan_id: String,
        task_id: String,
    },
    RolledBack {
        plan_id: String,
        checkpoint_id: String,
    },
    CheckpointReached {
        plan_id: String,
        checkpoint_id: String,
    },
    CheckpointResolved {
        plan_id: String,
        checkpoint_id: String,
        decision: String,
    },
    PlanFinished {
        plan_id: String,
        status: PlanStatus,
    },
}

impl OrchestratorEvent {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskRetrying { task_id, .. }
            | Self::TaskSkipped { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}
