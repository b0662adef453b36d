//! Recovery operations on an in-memory plan record.
//!
//! The manager wraps these with load/save; the orchestrator calls them
//! directly on the record it already holds.

use chrono::{DateTime, Utc};

use super::snapshot::CheckpointSnapshot;
use super::types::PlanRecord;
use crate::error::StateError;
use crate::plan::PlanStatus;
use crate::task::{TaskStatus, TransitionCause};

/// Resume an interrupted, paused or failed plan.
///
/// The resume point and every task caught in flight go back to `pending`.
/// Returns the task execution restarts from, if one was recorded.
pub fn apply_resume(record: &mut PlanRecord, now: DateTime<Utc>) -> Result<Option<String>, StateError> {
    if !record.state.can_resume {
        return Err(StateError::NotResumable {
            plan_id: record.plan.id.clone(),
            status: record.plan.status,
        });
    }

    let from_task = record.state.resume_from_task.take();
    let stale: Vec<String> = record
        .plan
        .ordered_tasks()
        .filter(|t| {
            matches!(
                t.status,
                TaskStatus::Ready | TaskStatus::Executing | TaskStatus::Failed
            )
        })
        .map(|t| t.id.clone())
        .collect();

    for task_id in &stale {
        record
            .plan
            .transition_task(task_id, TaskStatus::Pending, TransitionCause::Resume, now)?;
    }
    if let Some(task) = from_task.as_deref().and_then(|id| record.plan.task_mut(id)) {
        task.retry_count = 0;
    }

    record
        .plan
        .transition_to(PlanStatus::Executing, TransitionCause::Resume, now)?;
    record.plan.current_task_id = None;
    record.sync();

    tracing::info!(
        plan_id = %record.plan.id,
        from_task = from_task.as_deref().unwrap_or("-"),
        reset = stale.len(),
        "plan resumed"
    );
    Ok(from_task)
}

/// Restore the task statuses captured by `snapshot` and pause the plan at
/// that checkpoint again.
pub fn apply_rollback(
    record: &mut PlanRecord,
    snapshot: &CheckpointSnapshot,
    now: DateTime<Utc>,
) -> Result<(), StateError> {
    let plan_id = record.plan.id.clone();
    if record.plan.checkpoint(&snapshot.checkpoint_id).is_none() {
        return Err(StateError::CheckpointNotFound {
            plan_id,
            checkpoint_id: snapshot.checkpoint_id.clone(),
        });
    }

    let ids: Vec<String> = record.plan.order.clone();
    for task_id in &ids {
        let kept = snapshot
            .state
            .tasks
            .get(task_id)
            .filter(|rt| rt.status.satisfies_dependents());

        match kept {
            Some(runtime) => {
                if let Some(task) = record.plan.task_mut(task_id) {
                    task.apply_runtime(runtime);
                }
            }
            None if record.plan.status_of(task_id) != Some(TaskStatus::Pending) => {
                record.plan.transition_task(
                    task_id,
                    TaskStatus::Pending,
                    TransitionCause::Rollback,
                    now,
                )?;
            }
            None => {}
        }
    }

    let satisfied = record.plan.satisfied_ids();
    record.plan.results = snapshot
        .results
        .iter()
        .filter(|(id, _)| satisfied.contains(*id))
        .map(|(id, r)| (id.clone(), r.clone()))
        .collect();
    record.plan.completed_task_ids = snapshot
        .state
        .completed_task_ids
        .iter()
        .filter(|id| record.plan.status_of(id) == Some(TaskStatus::Completed))
        .cloned()
        .collect();
    record.plan.current_task_id = None;

    // The target checkpoint is asked again; checkpoints past it are no longer reached.
    let reopen: Vec<String> = record
        .plan
        .checkpoints
        .iter()
        .filter(|c| c.id == snapshot.checkpoint_id || !record.plan.checkpoint_reached(c))
        .map(|c| c.id.clone())
        .collect();
    for checkpoint in record
        .plan
        .checkpoints
        .iter_mut()
        .filter(|c| reopen.contains(&c.id))
    {
        checkpoint.reopen();
    }

    record
        .plan
        .transition_to(PlanStatus::Paused, TransitionCause::Rollback, now)?;
    record.plan.updated_at = now;
    record.state.last_checkpoint_id = Some(snapshot.checkpoint_id.clone());
    record.state.resume_from_task = None;
    record.sync();

    tracing::warn!(
        plan_id = %plan_id,
        checkpoint_id = %snapshot.checkpoint_id,
        "plan rolled back"
    );
    Ok(())
}

/// Operator skip of a failed or not yet started task.
pub fn apply_skip(record: &mut PlanRecord, task_id: &str, now: DateTime<Utc>) -> Result<(), StateError> {
    let status = record
        .plan
        .status_of(task_id)
        .ok_or_else(|| StateError::TaskNotFound {
            plan_id: record.plan.id.clone(),
            task_id: task_id.to_string(),
        })?;
    if status == TaskStatus::Executing {
        return Err(StateError::InvalidTaskTransition {
            task_id: task_id.to_string(),
            from: status,
            to: TaskStatus::Skipped,
        });
    }

    record
        .plan
        .transition_task(task_id, TaskStatus::Skipped, TransitionCause::Advance, now)?;
    if record.state.resume_from_task.as_deref() == Some(task_id) {
        record.state.resume_from_task = record
            .plan
            .ordered_tasks()
            .find(|t| t.status == TaskStatus::Failed)
            .map(|t| t.id.clone());
    }
    record.sync();

    tracing::warn!(plan_id = %record.plan.id, task_id, "task skipped by operator");
    Ok(())
}

/// Every task back to `pending`; the plan waits paused for a resume.
pub fn apply_restart(record: &mut PlanRecord, now: DateTime<Utc>) -> Result<(), StateError> {
    let ids: Vec<String> = record.plan.order.clone();
    for task_id in &ids {
        if record.plan.status_of(task_id) != Some(TaskStatus::Pending) {
            record.plan.transition_task(
                task_id,
                TaskStatus::Pending,
                TransitionCause::Restart,
                now,
            )?;
        }
    }
    record.plan.results.clear();
    record.plan.completed_task_ids.clear();
    record.plan.current_task_id = None;
    for checkpoint in &mut record.plan.checkpoints {
        checkpoint.reopen();
    }

    if !matches!(record.plan.status, PlanStatus::Pending | PlanStatus::Approved) {
        record
            .plan
            .transition_to(PlanStatus::Paused, TransitionCause::Restart, now)?;
    }
    record.state.recovery_attempts = 0;
    record.state.resume_from_task = None;
    record.state.last_checkpoint_id = None;
    record.sync();

    tracing::info!(plan_id = %record.plan.id, "plan restarted");
    Ok(())
}
