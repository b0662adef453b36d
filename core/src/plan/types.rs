use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::{CriticalPath, DependencyGraph};
use crate::task::{Task, TaskResult, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Pending,
    Approved,
    Executing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn from_task_count(count: usize) -> Self {
        match count {
            0..=3 => Self::Simple,
            4..=10 => Self::Medium,
            _ => Self::Complex,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Contiguous slice of the plan sharing one dependency level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub name: String,
    pub index: usize,
    pub task_ids: Vec<String>,
    pub checkpoint: bool,
    pub estimated_secs: u64,
}

/// Where a checkpoint sits in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointBinding {
    /// Before any task is dispatched.
    BeforeStart,
    /// After the last batch of the phase; `task_id` is the phase's last task,
    /// the task after which execution stops.
    EndOfPhase { phase_id: String, task_id: String },
}

impl CheckpointBinding {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::BeforeStart => None,
            Self::EndOfPhase { task_id, .. } => Some(task_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointReason {
    /// A task of the phase carried `checkpoint = true`.
    Explicit,
    /// Synthesised in front of a high-risk task.
    HighRisk { task_id: String, reason: String },
}

/// Named pause point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub name: String,
    pub binding: CheckpointBinding,
    pub reasons: Vec<CheckpointReason>,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub approved: Option<bool>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn is_resolved(&self) -> bool {
        self.approved.is_some()
    }

    /// Clears a previous decision so the checkpoint is presented again.
    pub fn reopen(&mut self) {
        self.approved = None;
        self.feedback = None;
        self.resolved_at = None;
    }
}

/// Ordered, checkpointed collection of tasks for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: String,
    pub request: String,
    /// Task arena keyed by id.
    pub tasks: HashMap<String, Task>,
    /// Plan order: phases concatenated, priority order inside each phase.
    pub order: Vec<String>,
    pub graph: DependencyGraph,
    pub critical_path: CriticalPath,
    pub phases: Vec<Phase>,
    pub checkpoints: Vec<Checkpoint>,
    pub estimated_secs: u64,
    pub estimated_cost: f64,
    pub complexity: Complexity,
    pub risk: RiskLevel,
    pub status: PlanStatus,
    #[serde(default)]
    pub current_task_id: Option<String>,
    #[serde(default)]
    pub completed_task_ids: Vec<String>,
    #[serde(default)]
    pub results: HashMap<String, TaskResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(task_id)
    }

    /// Tasks in plan order.
    pub fn ordered_tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn position(&self, task_id: &str) -> Option<usize> {
        self.order.iter().position(|id| id == task_id)
    }

    pub fn checkpoint(&self, checkpoint_id: &str) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.id == checkpoint_id)
    }

    pub fn checkpoint_mut(&mut self, checkpoint_id: &str) -> Option<&mut Checkpoint> {
        self.checkpoints.iter_mut().find(|c| c.id == checkpoint_id)
    }

    pub fn phase(&self, phase_id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == phase_id)
    }

    pub fn phase_of(&self, task_id: &str) -> Option<&Phase> {
        self.phases
            .iter()
            .find(|p| p.task_ids.iter().any(|id| id == task_id))
    }

    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.get(task_id).map(|t| t.status)
    }

    /// Ids of tasks that unblock their dependents.
    pub fn satisfied_ids(&self) -> HashSet<String> {
        self.tasks
            .values()
            .filter(|t| t.status.satisfies_dependents())
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// First unresolved checkpoint whose position has been reached.
    pub fn due_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints
            .iter()
            .filter(|c| !c.is_resolved())
            .find(|c| self.checkpoint_reached(c))
    }

    pub fn checkpoint_reached(&self, checkpoint: &Checkpoint) -> bool {
        match &checkpoint.binding {
            CheckpointBinding::BeforeStart => true,
            CheckpointBinding::EndOfPhase { phase_id, .. } => self.phase(phase_id).is_some_and(|p| {
                p.task_ids
                    .iter()
                    .all(|id| self.status_of(id).is_some_and(TaskStatus::satisfies_dependents))
            }),
        }
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            plan_id: self.id.clone(),
            request: self.request.clone(),
            status: self.status,
            total_tasks: self.tasks.len(),
            completed: self.count(TaskStatus::Completed),
            failed: self.count(TaskStatus::Failed),
            skipped: self.count(TaskStatus::Skipped),
            phases: self.phases.len(),
            checkpoints: self.checkpoints.len(),
            estimated_secs: self.estimated_secs,
            estimated_cost: self.estimated_cost,
            complexity: self.complexity,
            risk: self.risk,
        }
    }
}

/// Read-only digest handed to the approval surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub plan_id: String,
    pub request: String,
    pub status: PlanStatus,
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub phases: usize,
    pub checkpoints: usize,
    pub estimated_secs: u64,
    pub estimated_cost: f64,
    pub complexity: Complexity,
    pub risk: RiskLevel,
}
