//! Plan status transition rules.

use chrono::{DateTime, Utc};

use super::types::{ExecutionPlan, PlanStatus};
use crate::error::StateError;
use crate::task::{TaskStatus, TaskTransition, TransitionCause};

pub struct PlanTransition;

impl PlanTransition {
    pub fn is_valid(from: PlanStatus, to: PlanStatus, cause: TransitionCause) -> bool {
        use PlanStatus::*;

        match cause {
            TransitionCause::Advance | TransitionCause::Retry => matches!(
                (from, to),
                (Pending, Approved)
                    | (Approved, Executing)
                    | (Executing, Paused)
                    | (Paused, Executing)
                    | (Executing, Completed)
                    | (Executing, Failed)
                    | (Executing, Cancelled)
                    | (Paused, Cancelled)
                    | (Paused, Failed)
            ),
            // Cancelled plans are never resumed directly; they go through a rollback first.
            TransitionCause::Resume => {
                to == Executing && matches!(from, Approved | Executing | Paused | Failed)
            }
            TransitionCause::Rollback | TransitionCause::Restart => {
                to == Paused && !matches!(from, Pending | Approved)
            }
        }
    }
}

impl ExecutionPlan {
    /// Move the plan to `to`, rejecting transitions the cause does not allow.
    pub fn transition_to(
        &mut self,
        to: PlanStatus,
        cause: TransitionCause,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let from = self.status;
        if from == to {
            return Ok(());
        }
        if !PlanTransition::is_valid(from, to, cause) {
            return Err(StateError::InvalidPlanTransition { from, to });
        }
        tracing::debug!(plan_id = %self.id, ?from, ?to, ?cause, "plan transition");
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Move one task to `to`, keeping timestamps, error, results and the
    /// completion list consistent with the new status.
    pub fn transition_task(
        &mut self,
        task_id: &str,
        to: TaskStatus,
        cause: TransitionCause,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let plan_id = self.id.clone();
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StateError::TaskNotFound {
                plan_id: plan_id.clone(),
                task_id: task_id.to_string(),
            })?;

        let from = task.status;
        if !TaskTransition::is_valid(from, to, cause) {
            return Err(StateError::InvalidTaskTransition {
                task_id: task_id.to_string(),
                from,
                to,
            });
        }

        task.status = to;
        match to {
            TaskStatus::Pending => {
                task.started_at = None;
                task.completed_at = None;
                task.error = None;
                if matches!(cause, TransitionCause::Rollback | TransitionCause::Restart) {
                    task.retry_count = 0;
                }
            }
            TaskStatus::Ready => {}
            TaskStatus::Executing => task.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Skipped => {
                task.completed_at = Some(now);
                task.error = None;
            }
            TaskStatus::Failed => task.completed_at = Some(now),
        }

        match to {
            TaskStatus::Completed => self.completed_task_ids.push(task_id.to_string()),
            TaskStatus::Pending => {
                self.completed_task_ids.retain(|id| id != task_id);
                self.results.remove(task_id);
            }
            _ => {}
        }

        tracing::debug!(
            plan_id = %plan_id,
            task_id,
            from = TaskTransition::describe(from),
            to = TaskTransition::describe(to),
            "task transition"
        );
        self.updated_at = now;
        Ok(())
    }
}
