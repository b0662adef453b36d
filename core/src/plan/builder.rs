use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use super::risk::RiskRules;
use super::types::{
    Checkpoint, CheckpointBinding, CheckpointReason, Complexity, ExecutionPlan, Phase, PlanStatus,
    RiskLevel,
};
use crate::context::RunContext;
use crate::error::PlanError;
use crate::executor::DependencyGraph;
use crate::task::{Task, TaskType};

const START_CHECKPOINT_ID: &str = "cp-start";

/// Turns a validated task list into an [`ExecutionPlan`].
///
/// Building is deterministic: the same tasks always produce the same phases,
/// priorities and checkpoints. Only the plan id and timestamps vary.
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    rules: RiskRules,
    supported: Option<HashSet<TaskType>>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_risk_rules(mut self, rules: RiskRules) -> Self {
        self.rules = rules;
        self
    }

    /// Reject task types nothing can execute, at build time instead of run time.
    pub fn with_supported_types<I: IntoIterator<Item = TaskType>>(mut self, types: I) -> Self {
        self.supported = Some(types.into_iter().collect());
        self
    }

    pub fn build(
        &self,
        request: &str,
        tasks: Vec<Task>,
        ctx: &RunContext,
    ) -> Result<ExecutionPlan, PlanError> {
        let tasks = tasks
            .into_iter()
            .map(|mut t| {
                t.reset();
                t
            })
            .collect();
        let plan = self.assemble(Uuid::new_v4().to_string(), request, tasks, ctx)?;

        tracing::info!(
            plan_id = %plan.id,
            tasks = plan.tasks.len(),
            phases = plan.phases.len(),
            checkpoints = plan.checkpoints.len(),
            estimated_secs = plan.estimated_secs,
            risk = ?plan.risk,
            "plan built"
        );
        Ok(plan)
    }

    /// Re-plan a modified task list for an existing plan.
    ///
    /// Unchanged tasks keep their runtime state and results, resolved
    /// checkpoints that still exist keep their decision.
    pub fn rebuild(
        &self,
        previous: &ExecutionPlan,
        tasks: Vec<Task>,
        ctx: &RunContext,
    ) -> Result<ExecutionPlan, PlanError> {
        let tasks: Vec<Task> = tasks
            .into_iter()
            .map(|mut task| {
                match previous.task(&task.id) {
                    Some(old) if same_definition(old, &task) => task.apply_runtime(&old.runtime()),
                    _ => task.reset(),
                }
                task
            })
            .collect();

        let mut plan = self.assemble(previous.id.clone(), &previous.request, tasks, ctx)?;
        plan.status = previous.status;
        plan.created_at = previous.created_at;

        for checkpoint in &mut plan.checkpoints {
            if let Some(old) = previous.checkpoint(&checkpoint.id) {
                checkpoint.approved = old.approved;
                checkpoint.feedback = old.feedback.clone();
                checkpoint.resolved_at = old.resolved_at;
            }
        }

        plan.results = previous
            .results
            .iter()
            .filter(|(id, _)| plan.status_of(id) == previous.status_of(id))
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        plan.completed_task_ids = previous
            .completed_task_ids
            .iter()
            .filter(|id| plan.results.contains_key(*id))
            .cloned()
            .collect();

        tracing::info!(plan_id = %plan.id, tasks = plan.tasks.len(), "plan rebuilt");
        Ok(plan)
    }

    fn assemble(
        &self,
        id: String,
        request: &str,
        mut tasks: Vec<Task>,
        ctx: &RunContext,
    ) -> Result<ExecutionPlan, PlanError> {
        if tasks.is_empty() {
            return Err(PlanError::NoTasks);
        }

        if let Some(supported) = &self.supported {
            if let Some(task) = tasks.iter().find(|t| !supported.contains(&t.task_type)) {
                return Err(PlanError::UnsupportedTaskType {
                    task_id: task.id.clone(),
                    task_type: task.task_type,
                });
            }
        }

        let graph = DependencyGraph::from_tasks(&tasks)?;

        let remaining = graph.remaining_secs();
        for task in &mut tasks {
            task.priority = remaining.get(&task.id).copied().unwrap_or(0) as i64;
        }

        let position: HashMap<String, usize> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        let arena: HashMap<String, Task> =
            tasks.into_iter().map(|t| (t.id.clone(), t)).collect();

        let phases = build_phases(&graph, &arena, &position);
        let order: Vec<String> = phases
            .iter()
            .flat_map(|p| p.task_ids.iter().cloned())
            .collect();
        let checkpoints = self.build_checkpoints(&phases, &arena);

        let critical_path = graph.critical_path();
        let estimated_cost = order
            .iter()
            .filter_map(|id| arena.get(id).and_then(|t| t.estimated_cost))
            .sum();

        let high_risk = arena.values().any(|t| self.rules.is_high_risk(t));
        let risk = if high_risk {
            RiskLevel::High
        } else if arena.len() > 10 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let now = ctx.now();
        Ok(ExecutionPlan {
            id,
            request: request.to_string(),
            complexity: Complexity::from_task_count(arena.len()),
            risk,
            estimated_secs: critical_path.total_secs,
            estimated_cost,
            tasks: arena,
            order,
            graph,
            critical_path,
            phases,
            checkpoints,
            status: PlanStatus::Pending,
            current_task_id: None,
            completed_task_ids: Vec::new(),
            results: HashMap::new(),
            created_at: now,
            updated_at: now,
        })
    }

    fn build_checkpoints(&self, phases: &[Phase], arena: &HashMap<String, Task>) -> Vec<Checkpoint> {
        let mut checkpoints: Vec<Checkpoint> = Vec::new();

        for phase in phases {
            if phase.checkpoint {
                let checkpoint = phase_checkpoint(phase);
                merge_checkpoint(&mut checkpoints, checkpoint, CheckpointReason::Explicit, None);
            }

            for task_id in &phase.task_ids {
                let Some(assessment) = arena.get(task_id).and_then(|t| self.rules.assess(t))
                else {
                    continue;
                };
                // Pause right after the nearest preceding task: the end of the
                // previous phase, or before anything runs for phase 0.
                let checkpoint = match phase.index.checked_sub(1).map(|i| &phases[i]) {
                    Some(previous) => phase_checkpoint(previous),
                    None => Checkpoint {
                        id: START_CHECKPOINT_ID.to_string(),
                        name: "Before start".to_string(),
                        binding: CheckpointBinding::BeforeStart,
                        reasons: Vec::new(),
                        questions: Vec::new(),
                        approved: None,
                        feedback: None,
                        resolved_at: None,
                    },
                };
                merge_checkpoint(
                    &mut checkpoints,
                    checkpoint,
                    CheckpointReason::HighRisk {
                        task_id: assessment.task_id,
                        reason: assessment.reason,
                    },
                    Some(assessment.question),
                );
            }
        }

        // Evaluation order: before-start first, then by phase.
        checkpoints.sort_by_key(|c| match &c.binding {
            CheckpointBinding::BeforeStart => 0,
            CheckpointBinding::EndOfPhase { phase_id, .. } => phases
                .iter()
                .position(|p| &p.id == phase_id)
                .map(|i| i + 1)
                .unwrap_or(usize::MAX),
        });
        checkpoints
    }
}

fn phase_checkpoint(phase: &Phase) -> Checkpoint {
    Checkpoint {
        id: format!("cp-{}", phase.id),
        name: format!("After {}", phase.name),
        binding: CheckpointBinding::EndOfPhase {
            phase_id: phase.id.clone(),
            task_id: phase.task_ids.last().cloned().unwrap_or_default(),
        },
        reasons: Vec::new(),
        questions: Vec::new(),
        approved: None,
        feedback: None,
        resolved_at: None,
    }
}

fn merge_checkpoint(
    checkpoints: &mut Vec<Checkpoint>,
    candidate: Checkpoint,
    reason: CheckpointReason,
    question: Option<String>,
) {
    let idx = match checkpoints.iter().position(|c| c.id == candidate.id) {
        Some(idx) => idx,
        None => {
            checkpoints.push(candidate);
            checkpoints.len() - 1
        }
    };
    let checkpoint = &mut checkpoints[idx];
    if !checkpoint.reasons.contains(&reason) {
        checkpoint.reasons.push(reason);
    }
    if let Some(q) = question {
        if !checkpoint.questions.contains(&q) {
            checkpoint.questions.push(q);
        }
    }
}

fn build_phases(
    graph: &DependencyGraph,
    arena: &HashMap<String, Task>,
    position: &HashMap<String, usize>,
) -> Vec<Phase> {
    graph
        .levels()
        .into_iter()
        .enumerate()
        .map(|(index, mut ids)| {
            ids.sort_by_key(|id| {
                let priority = arena.get(id).map(|t| t.priority).unwrap_or(0);
                (std::cmp::Reverse(priority), position.get(id).copied())
            });
            let members: Vec<&Task> = ids.iter().filter_map(|id| arena.get(id)).collect();

            Phase {
                id: format!("phase-{index}"),
                name: phase_theme(&members).to_string(),
                index,
                checkpoint: members.iter().any(|t| t.checkpoint),
                estimated_secs: phase_critical_secs(&members),
                task_ids: ids,
            }
        })
        .collect()
}

/// Longest chain inside the phase; members are in dependency order.
fn phase_critical_secs(members: &[&Task]) -> u64 {
    let mut finish: HashMap<&str, u64> = HashMap::new();
    for task in members {
        let start = task
            .dependencies
            .iter()
            .filter_map(|d| finish.get(d.as_str()).copied())
            .max()
            .unwrap_or(0);
        finish.insert(&task.id, start + task.estimated_secs);
    }
    finish.values().copied().max().unwrap_or(0)
}

fn phase_theme(members: &[&Task]) -> &'static str {
    let mut counts: HashMap<TaskType, usize> = HashMap::new();
    for task in members {
        *counts.entry(task.task_type).or_default() += 1;
    }
    let dominant = TaskType::ALL
        .into_iter()
        .max_by_key(|t| (counts.get(t).copied().unwrap_or(0), std::cmp::Reverse(*t)));

    match dominant {
        Some(TaskType::Filesystem) => "scaffolding",
        Some(TaskType::CodeGeneration) => "implementation",
        Some(TaskType::Execution)
            if members
                .iter()
                .any(|t| t.action.to_lowercase().contains("test")) =>
        {
            "testing"
        }
        Some(TaskType::Execution) => "execution",
        Some(TaskType::Database) => "data",
        Some(TaskType::Analysis) => "analysis",
        Some(TaskType::ToolCall) | None => "integration",
    }
}

fn same_definition(a: &Task, b: &Task) -> bool {
    a.name == b.name
        && a.task_type == b.task_type
        && a.action == b.action
        && a.dependencies == b.dependencies
        && a.parameters == b.parameters
        && a.estimated_secs == b.estimated_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use pretty_assertions::assert_eq;

    fn ctx() -> RunContext {
        RunContext::new("req-1")
    }

    fn t(id: &str, ty: TaskType, action: &str, secs: u64, deps: &[&str]) -> Task {
        Task::new(id, id, ty, action)
            .estimated(secs)
            .depends_on(deps.iter().copied())
    }

    fn sample() -> Vec<Task> {
        vec![
            t("scaffold", TaskType::Filesystem, "mkdir", 10, &[]),
            t("config", TaskType::Filesystem, "write", 5, &[]),
            t("impl", TaskType::CodeGeneration, "generate", 60, &["scaffold", "config"])
                .with_checkpoint(),
            t("test", TaskType::Execution, "run tests", 30, &["impl"]),
        ]
    }

    #[test]
    fn phases_follow_dependency_levels() {
        let plan = PlanBuilder::new().build("build it", sample(), &ctx()).unwrap();

        let phases: Vec<(&str, Vec<&str>)> = plan
            .phases
            .iter()
            .map(|p| (p.name.as_str(), p.task_ids.iter().map(String::as_str).collect()))
            .collect();
        assert_eq!(
            phases,
            vec![
                ("scaffolding", vec!["scaffold", "config"]),
                ("implementation", vec!["impl"]),
                ("testing", vec!["test"]),
            ]
        );
        assert_eq!(plan.order, vec!["scaffold", "config", "impl", "test"]);
        assert_eq!(plan.estimated_secs, 100);
        assert_eq!(plan.complexity, Complexity::Medium);
        assert_eq!(plan.risk, RiskLevel::Low);
        assert!(plan.tasks.values().all(|t| t.status == TaskStatus::Pending));
    }

    #[test]
    fn priority_is_remaining_critical_path() {
        let plan = PlanBuilder::new().build("", sample(), &ctx()).unwrap();
        assert_eq!(plan.task("scaffold").unwrap().priority, 100);
        assert_eq!(plan.task("config").unwrap().priority, 95);
        assert_eq!(plan.task("test").unwrap().priority, 30);
    }

    #[test]
    fn explicit_checkpoint_marks_the_phase() {
        let plan = PlanBuilder::new().build("", sample(), &ctx()).unwrap();
        assert!(plan.phases[1].checkpoint);
        assert_eq!(plan.checkpoints.len(), 1);
        assert_eq!(plan.checkpoints[0].id, "cp-phase-1");
        assert_eq!(plan.checkpoints[0].binding.task_id(), Some("impl"));
    }

    #[test]
    fn high_risk_task_gets_a_checkpoint_before_it() {
        let mut tasks = sample();
        tasks.push(t("cleanup", TaskType::Filesystem, "delete tmp", 1, &["test"]));
        tasks.push(t("drop", TaskType::Database, "drop table", 1, &[]));

        let plan = PlanBuilder::new().build("", tasks, &ctx()).unwrap();
        assert_eq!(plan.risk, RiskLevel::High);

        let ids: Vec<&str> = plan.checkpoints.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["cp-start", "cp-phase-1", "cp-phase-2"]);

        let before_cleanup = plan.checkpoint("cp-phase-2").unwrap();
        assert_eq!(before_cleanup.binding.task_id(), Some("test"));
        assert!(matches!(
            &before_cleanup.reasons[0],
            CheckpointReason::HighRisk { task_id, .. } if task_id == "cleanup"
        ));
        assert_eq!(before_cleanup.questions.len(), 1);
        assert_eq!(plan.checkpoint("cp-start").unwrap().binding, CheckpointBinding::BeforeStart);
    }

    #[test]
    fn building_twice_is_idempotent() {
        let builder = PlanBuilder::new();
        let a = builder.build("", sample(), &ctx()).unwrap();
        let b = builder.build("", sample(), &ctx()).unwrap();
        assert_eq!(a.phases, b.phases);
        assert_eq!(a.checkpoints, b.checkpoints);
        assert_eq!(a.order, b.order);
    }

    #[test]
    fn unsupported_types_fail_at_build_time() {
        let builder = PlanBuilder::new().with_supported_types([TaskType::Filesystem]);
        let err = builder.build("", sample(), &ctx()).unwrap_err();
        assert_eq!(
            err,
            PlanError::UnsupportedTaskType {
                task_id: "impl".into(),
                task_type: TaskType::CodeGeneration
            }
        );
    }

    #[test]
    fn empty_and_cyclic_inputs_are_rejected() {
        assert_eq!(
            PlanBuilder::new().build("", Vec::new(), &ctx()).unwrap_err(),
            PlanError::NoTasks
        );
        let cyclic = vec![
            t("X", TaskType::Execution, "run", 1, &["Y"]),
            t("Y", TaskType::Execution, "run", 1, &["X"]),
        ];
        assert!(matches!(
            PlanBuilder::new().build("", cyclic, &ctx()),
            Err(PlanError::CircularDependency { .. })
        ));
    }

    #[test]
    fn rebuild_keeps_unchanged_progress() {
        let builder = PlanBuilder::new();
        let mut plan = builder.build("", sample(), &ctx()).unwrap();
        plan.task_mut("scaffold").unwrap().status = TaskStatus::Completed;
        plan.completed_task_ids.push("scaffold".into());
        plan.checkpoints[0].approved = Some(true);

        let mut tasks = sample();
        tasks[1].action = "write --force".into();
        let rebuilt = builder.rebuild(&plan, tasks, &ctx()).unwrap();

        assert_eq!(rebuilt.id, plan.id);
        assert_eq!(rebuilt.status_of("scaffold"), Some(TaskStatus::Completed));
        assert_eq!(rebuilt.status_of("config"), Some(TaskStatus::Pending));
        assert_eq!(rebuilt.checkpoints[0].approved, Some(true));
    }
}
