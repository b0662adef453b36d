//! Persisted state records and the events the manager broadcasts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::{ExecutionPlan, PlanStatus};
use crate::task::{TaskRuntime, TaskStatus};

/// Counters over the task statuses of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
}

impl Progress {
    pub fn of(plan: &ExecutionPlan) -> Self {
        Self {
            total: plan.tasks.len(),
            completed: plan.count(TaskStatus::Completed),
            failed: plan.count(TaskStatus::Failed),
            skipped: plan.count(TaskStatus::Skipped),
            pending: plan.count(TaskStatus::Pending),
        }
    }

    /// Finished share in `[0, 1]`; skipped tasks count as finished.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.completed + self.skipped) as f64 / self.total as f64
    }
}

/// Runtime twin of an [`ExecutionPlan`]: the unit that is persisted,
/// snapshotted and rolled back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub plan_id: String,
    pub status: PlanStatus,
    pub progress: Progress,
    pub tasks: BTreeMap<String, TaskRuntime>,
    #[serde(default)]
    pub completed_task_ids: Vec<String>,
    #[serde(default)]
    pub current_task_id: Option<String>,
    #[serde(default)]
    pub last_checkpoint_id: Option<String>,
    #[serde(default)]
    pub recovery_attempts: u32,
    #[serde(default)]
    pub can_resume: bool,
    #[serde(default)]
    pub resume_from_task: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    pub fn from_plan(plan: &ExecutionPlan) -> Self {
        let mut state = Self {
            plan_id: plan.id.clone(),
            status: plan.status,
            progress: Progress::default(),
            tasks: BTreeMap::new(),
            completed_task_ids: Vec::new(),
            current_task_id: None,
            last_checkpoint_id: None,
            recovery_attempts: 0,
            can_resume: false,
            resume_from_task: None,
            updated_at: plan.updated_at,
        };
        state.sync_from(plan);
        state
    }

    /// Copy every plan-derived field, `can_resume` included. Recovery
    /// bookkeeping (attempts, last checkpoint, resume point) is left alone.
    pub fn sync_from(&mut self, plan: &ExecutionPlan) {
        self.status = plan.status;
        self.can_resume = matches!(
            plan.status,
            PlanStatus::Approved | PlanStatus::Executing | PlanStatus::Paused | PlanStatus::Failed
        );
        self.progress = Progress::of(plan);
        self.tasks = plan
            .tasks
            .iter()
            .map(|(id, t)| (id.clone(), t.runtime()))
            .collect();
        self.completed_task_ids = plan.completed_task_ids.clone();
        self.current_task_id = plan.current_task_id.clone();
        self.updated_at = plan.updated_at;
    }
}

/// What is stored under `plan/<plan_id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub plan: ExecutionPlan,
    pub state: ExecutionState,
}

impl PlanRecord {
    pub fn new(plan: ExecutionPlan) -> Self {
        let state = ExecutionState::from_plan(&plan);
        Self { plan, state }
    }

    pub fn plan_id(&self) -> &str {
        &self.plan.id
    }

    pub fn sync(&mut self) {
        self.state.sync_from(&self.plan);
    }

    /// Task runtimes in the persisted state win over whatever the plan
    /// document carries; they are written together but the state is the
    /// record of truth.
    pub fn apply_state_to_plan(&mut self) {
        for (id, runtime) in &self.state.tasks {
            if let Some(task) = self.plan.tasks.get_mut(id) {
                task.apply_runtime(runtime);
            }
        }
        self.plan.status = self.state.status;
        self.plan.completed_task_ids = self.state.completed_task_ids.clone();
        self.plan.current_task_id = self.state.current_task_id.clone();
    }
}

/// Notifications sent after the manager changed persisted state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    Saved {
        plan_id: String,
        status: PlanStatus,
        progress: Progress,
        timestamp: DateTime<Utc>,
    },
    SnapshotTaken {
        plan_id: String,
        checkpoint_id: String,
        timestamp: DateTime<Utc>,
    },
    Resumed {
        plan_id: String,
        from_task: Option<String>,
        timestamp: DateTime<Utc>,
    },
    RolledBack {
        plan_id: String,
        checkpoint_id: String,
        timestamp: DateTime<Utc>,
    },
    TaskSkipped {
        plan_id: String,
        task_id: String,
        timestamp: DateTime<Utc>,
    },
    Restarted {
        plan_id: String,
        timestamp: DateTime<Utc>,
    },
    CleanedUp {
        plan_id: String,
        timestamp: DateTime<Utc>,
    },
    Released {
        plan_id: String,
        forced: bool,
        timestamp: DateTime<Utc>,
    },
}

impl StateEvent {
    pub fn plan_id(&self) -> &str {
        match self {
            Self::Saved { plan_id, .. }
            | Self::SnapshotTaken { plan_id, .. }
            | Self::Resumed { plan_id, .. }
            | Self::RolledBack { plan_id, .. }
            | Self::TaskSkipped { plan_id, .. }
            | Self::Restarted { plan_id, .. }
            | Self::CleanedUp { plan_id, .. }
            | Self::Released { plan_id, .. } => plan_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Saved { timestamp, .. }
            | Self::SnapshotTaken { timestamp, .. }
            | Self::Resumed { timestamp, .. }
            | Self::RolledBack { timestamp, .. }
            | Self::TaskSkipped { timestamp, .. }
            | Self::Restarted { timestamp, .. }
            | Self::CleanedUp { timestamp, .. }
            | Self::Released { timestamp, .. } => *timestamp,
        }
    }
}
