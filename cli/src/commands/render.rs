//! Text renderings of plans and stored state.

use std::fmt::Write as _;

use conductor_core::api::{
    CheckpointBinding, CheckpointSnapshot, DriveOutcome, ExecutionPlan, PlanRecord,
};

pub fn plan(plan: &ExecutionPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "plan {}", plan.id);
    let _ = writeln!(out, "request: {}", plan.request);
    let _ = writeln!(
        out,
        "tasks: {}  phases: {}  checkpoints: {}  estimated: {}s  cost: {:.2}  complexity: {:?}  risk: {:?}",
        plan.tasks.len(),
        plan.phases.len(),
        plan.checkpoints.len(),
        plan.estimated_secs,
        plan.estimated_cost,
        plan.complexity,
        plan.risk,
    );
    let _ = writeln!(
        out,
        "critical path ({}s): {}",
        plan.critical_path.total_secs,
        plan.critical_path.path.join(" -> ")
    );

    for phase in &plan.phases {
        let _ = writeln!(
            out,
            "\n{} {} (~{}s){}",
            phase.id,
            phase.name,
            phase.estimated_secs,
            if phase.checkpoint { " [checkpoint]" } else { "" }
        );
        for id in &phase.task_ids {
            let Some(task) = plan.task(id) else { continue };
            let _ = write!(
                out,
                "  {:<16} {:<16} {:?}  {}",
                task.id,
                task.task_type.as_str(),
                task.status,
                task.action
            );
            if !task.dependencies.is_empty() {
                let _ = write!(out, "  (after {})", task.dependencies.join(", "));
            }
            out.push('\n');
        }
    }

    if !plan.checkpoints.is_empty() {
        out.push_str("\ncheckpoints:\n");
        for cp in &plan.checkpoints {
            let position = match &cp.binding {
                CheckpointBinding::BeforeStart => "before start".to_string(),
                CheckpointBinding::EndOfPhase { phase_id, .. } => format!("end of {phase_id}"),
            };
            let decision = match cp.approved {
                Some(true) => "approved",
                Some(false) => "rejected",
                None => "open",
            };
            let _ = writeln!(out, "  {:<14} {position:<18} {decision}", cp.id);
        }
    }
    out
}

pub fn record(record: &PlanRecord, snapshots: &[CheckpointSnapshot]) -> String {
    let state = &record.state;
    let mut out = plan(&record.plan);
    let _ = writeln!(
        out,
        "\nstatus: {:?}  done: {}/{}  failed: {}  skipped: {}  updated: {}",
        state.status,
        state.progress.completed,
        state.progress.total,
        state.progress.failed,
        state.progress.skipped,
        state.updated_at.to_rfc3339(),
    );
    let _ = writeln!(
        out,
        "resumable: {}  resume from: {}  last checkpoint: {}  rollbacks: {}",
        state.can_resume,
        state.resume_from_task.as_deref().unwrap_or("-"),
        state.last_checkpoint_id.as_deref().unwrap_or("-"),
        state.recovery_attempts,
    );
    for task in record.plan.ordered_tasks() {
        if let Some(error) = &task.error {
            let _ = writeln!(out, "  {} error: {error}", task.id);
        }
    }
    if !snapshots.is_empty() {
        out.push_str("snapshots:\n");
        for snap in snapshots {
            let _ = writeln!(
                out,
                "  {:<14} {}  ({} done)",
                snap.checkpoint_id,
                snap.taken_at.to_rfc3339(),
                snap.state.progress.completed
            );
        }
    }
    out
}

pub fn summary_line(record: &PlanRecord) -> String {
    let state = &record.state;
    format!(
        "{}  {:<10} {}/{}  {}  {}",
        record.plan.id,
        format!("{:?}", state.status),
        state.progress.completed,
        state.progress.total,
        state.updated_at.to_rfc3339(),
        record.plan.request
    )
}

pub fn outcome(plan_id: &str, outcome: &DriveOutcome, record: &PlanRecord) -> String {
    let state = &record.state;
    let mut out = String::new();
    match outcome {
        DriveOutcome::Completed => {
            let _ = writeln!(
                out,
                "plan {plan_id} completed: {}/{} tasks, {} skipped",
                state.progress.completed, state.progress.total, state.progress.skipped
            );
        }
        DriveOutcome::Cancelled => {
            let _ = writeln!(
                out,
                "plan {plan_id} cancelled after {}/{} tasks",
                state.progress.completed, state.progress.total
            );
        }
        DriveOutcome::Failed { task_id, reason } => {
            let _ = writeln!(
                out,
                "plan {plan_id} failed{}: {reason}",
                task_id
                    .as_deref()
                    .map(|t| format!(" at task {t}"))
                    .unwrap_or_default()
            );
            if state.can_resume {
                let _ = writeln!(out, "  resume with: conductor resume {plan_id}");
            }
        }
        DriveOutcome::AwaitingApproval(cp) => {
            let _ = writeln!(out, "plan {plan_id} paused at checkpoint {}", cp.id);
            let _ = writeln!(out, "  resume with: conductor resume {plan_id}");
        }
    }
    if !matches!(outcome, DriveOutcome::Completed) {
        if let Some(cp) = &state.last_checkpoint_id {
            let _ = writeln!(out, "  roll back with: conductor rollback {plan_id} {cp}");
        }
    }
    out
}
