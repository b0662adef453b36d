mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{CancelDuringWait, FixedModifier, Harness};
use conductor_core::api::{
    ApprovalDecision, DriveOutcome, Orchestrator, OrchestratorEvent, OrchestratorSettings,
    PlanBuilder, PlanError, PlanStatus, RetryConfig, Task, TaskStatus, TaskType, ToolError,
};
use pretty_assertions::assert_eq;

fn settings(base_delay_ms: u64) -> OrchestratorSettings {
    OrchestratorSettings {
        max_parallel: 4,
        max_recovery_attempts: 3,
        retry: RetryConfig {
            base_delay_ms,
            multiplier: 2.0,
            max_delay_ms: 10_000,
        },
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

#[tokio::test]
async fn independent_tasks_share_a_batch() {
    let h = Harness::new();
    let tasks = vec![
        Task::new("A", "write schema", TaskType::Filesystem, "write schema.sql").estimated(60),
        Task::new("B", "write models", TaskType::Filesystem, "write models.rs").estimated(90),
        Task::new("C", "generate api", TaskType::CodeGeneration, "generate handlers")
            .depends_on(["A", "B"])
            .estimated(60),
    ];
    let plan = PlanBuilder::new().build("build api", tasks, &h.ctx).unwrap();
    assert_eq!(plan.critical_path.total_secs, 150);
    assert_eq!(plan.critical_path.path, vec!["B".to_string(), "C".to_string()]);

    let orch = Orchestrator::builder(plan, h.state.clone(), h.collaborators(None), h.ctx.clone())
        .settings(settings(10))
        .sleeper(h.sleeper.clone())
        .build();
    let mut rx = orch.subscribe();

    assert_eq!(orch.run().await.unwrap(), DriveOutcome::Completed);

    let batches: Vec<HashSet<String>> = drain(&mut rx)
        .into_iter()
        .filter_map(|ev| match ev {
            OrchestratorEvent::BatchStarted { task_ids, .. } => {
                Some(task_ids.into_iter().collect())
            }
            _ => None,
        })
        .collect();
    let expected: Vec<HashSet<String>> = vec![
        ["A", "B"].iter().map(|s| s.to_string()).collect(),
        ["C"].iter().map(|s| s.to_string()).collect(),
    ];
    assert_eq!(batches, expected);

    let record = orch.record().await;
    assert_eq!(record.plan.status, PlanStatus::Completed);
    assert_eq!(record.state.progress.completed, 3);
    assert_eq!(record.plan.completed_task_ids.last().map(String::as_str), Some("C"));
    assert!(h.approval.seen().is_empty());
}

#[tokio::test]
async fn cycle_is_rejected_before_any_task_runs() {
    let h = Harness::new();
    let tasks = vec![
        Task::new("X", "x", TaskType::Analysis, "inspect x").depends_on(["Y"]),
        Task::new("Y", "y", TaskType::Analysis, "inspect y").depends_on(["X"]),
    ];
    let err = PlanBuilder::new().build("loop", tasks, &h.ctx).unwrap_err();
    match err {
        PlanError::CircularDependency { task_id, cycle } => {
            assert!(task_id == "X" || task_id == "Y");
            assert!(cycle.contains(&"X".to_string()) && cycle.contains(&"Y".to_string()));
        }
        other => panic!("expected a cycle error, got {other:?}"),
    }
    assert!(h.executor.executed().is_empty());
}

#[tokio::test]
async fn network_failure_is_retried_after_backoff() {
    let h = Harness::new();
    h.executor
        .fail_next("D", ToolError::with_kind("connection reset by peer", "network"));
    let tasks = vec![Task::new("D", "fetch deps", TaskType::ToolCall, "http_get").estimated(5)];
    let plan = PlanBuilder::new().build("fetch", tasks, &h.ctx).unwrap();

    let orch = Orchestrator::builder(plan, h.state.clone(), h.collaborators(None), h.ctx.clone())
        .settings(settings(250))
        .sleeper(h.sleeper.clone())
        .build();
    let mut rx = orch.subscribe();

    assert_eq!(orch.run().await.unwrap(), DriveOutcome::Completed);
    assert_eq!(h.sleeper.waits(), vec![Duration::from_millis(250)]);
    assert_eq!(h.executor.executed(), vec!["D".to_string(), "D".to_string()]);

    let record = orch.record().await;
    let result = &record.plan.results["D"];
    assert_eq!(result.attempts, 2);
    assert_eq!(result.tool.as_deref(), Some("http_get"));
    assert_eq!(record.plan.task("D").unwrap().retry_count, 1);

    let retried = drain(&mut rx).into_iter().any(|ev| {
        matches!(ev, OrchestratorEvent::TaskRetrying { attempt: 2, delay_ms, .. } if delay_ms > 0)
    });
    assert!(retried);
}

#[tokio::test]
async fn exhausted_retries_fail_the_plan() {
    let h = Harness::new();
    for _ in 0..3 {
        h.executor
            .fail_next("D", ToolError::with_kind("connection refused", "network"));
    }
    let tasks = vec![
        Task::new("D", "fetch", TaskType::ToolCall, "http_get").with_max_retries(2),
        Task::new("E", "use", TaskType::Analysis, "summarize").depends_on(["D"]),
    ];
    let plan = PlanBuilder::new().build("fetch", tasks, &h.ctx).unwrap();
    let orch = Orchestrator::builder(plan, h.state.clone(), h.collaborators(None), h.ctx.clone())
        .settings(settings(100))
        .sleeper(h.sleeper.clone())
        .build();

    let outcome = orch.run().await.unwrap();
    assert!(matches!(outcome, DriveOutcome::Failed { task_id: Some(ref id), .. } if id == "D"));
    assert_eq!(
        h.sleeper.waits(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );

    let record = orch.record().await;
    assert_eq!(record.plan.status, PlanStatus::Failed);
    assert_eq!(record.plan.status_of("E"), Some(TaskStatus::Pending));
    assert_eq!(record.state.resume_from_task.as_deref(), Some("D"));
    assert!(record.state.can_resume);
}

#[tokio::test]
async fn cancel_at_checkpoint_stops_later_phases() {
    let h = Harness::new();
    h.approval.then(ApprovalDecision::Cancel {
        reason: Some("wrong branch".into()),
    });
    let tasks = vec![
        Task::new("p1", "scaffold", TaskType::Filesystem, "create dirs").with_checkpoint(),
        Task::new("p2", "implement", TaskType::CodeGeneration, "write code").depends_on(["p1"]),
    ];
    let plan = PlanBuilder::new().build("two phases", tasks, &h.ctx).unwrap();
    let orch = Orchestrator::builder(plan, h.state.clone(), h.collaborators(None), h.ctx.clone())
        .sleeper(h.sleeper.clone())
        .build();

    assert_eq!(orch.run().await.unwrap(), DriveOutcome::Cancelled);
    assert_eq!(h.executor.executed(), vec!["p1".to_string()]);
    assert_eq!(h.approval.seen(), vec!["cp-phase-0".to_string()]);

    let record = orch.record().await;
    assert_eq!(record.plan.status, PlanStatus::Cancelled);
    assert_eq!(record.plan.status_of("p2"), Some(TaskStatus::Pending));
    let checkpoint = record.plan.checkpoint("cp-phase-0").unwrap();
    assert_eq!(checkpoint.approved, Some(false));
    assert_eq!(checkpoint.feedback.as_deref(), Some("wrong branch"));

    let persisted = h.state.load(&record.plan.id).await.unwrap();
    assert_eq!(persisted.plan.status, PlanStatus::Cancelled);
    assert!(!persisted.state.can_resume);
}

#[tokio::test]
async fn cancel_during_retry_backoff_starts_no_new_attempt() {
    let h = Harness::new();
    h.executor
        .fail_next("A", ToolError::with_kind("connection reset by peer", "network"));
    let tasks = vec![
        Task::new("A", "fetch", TaskType::ToolCall, "http_get"),
        Task::new("B", "use", TaskType::Analysis, "summarize").depends_on(["A"]),
    ];
    let plan = PlanBuilder::new().build("fetch", tasks, &h.ctx).unwrap();
    let interrupt = Arc::new(CancelDuringWait::default());
    let orch = Orchestrator::builder(plan, h.state.clone(), h.collaborators(None), h.ctx.clone())
        .settings(settings(50))
        .sleeper(interrupt.clone())
        .build();
    interrupt.arm(&orch);

    assert_eq!(orch.run().await.unwrap(), DriveOutcome::Cancelled);
    assert_eq!(h.executor.executed(), vec!["A".to_string()]);

    let record = orch.record().await;
    assert_eq!(record.plan.status, PlanStatus::Cancelled);
    assert_eq!(record.plan.status_of("A"), Some(TaskStatus::Pending));
    assert_eq!(record.plan.task("A").unwrap().retry_count, 1);
    assert_eq!(record.plan.status_of("B"), Some(TaskStatus::Pending));
    assert!(!record.plan.results.contains_key("A"));

    let persisted = h.state.load(&record.plan.id).await.unwrap();
    assert_eq!(persisted.plan.status, PlanStatus::Cancelled);
    assert_eq!(persisted.plan.status_of("A"), Some(TaskStatus::Pending));
}

#[tokio::test]
async fn cancel_while_awaiting_approval_ends_cancelled() {
    let h = Harness::new();
    let tasks = vec![
        Task::new("p1", "scaffold", TaskType::Filesystem, "create dirs").with_checkpoint(),
        Task::new("p2", "implement", TaskType::CodeGeneration, "write code").depends_on(["p1"]),
    ];
    let plan = PlanBuilder::new().build("two phases", tasks, &h.ctx).unwrap();
    let interrupt = Arc::new(CancelDuringWait::default());
    let mut collaborators = h.collaborators(None);
    collaborators.approval = interrupt.clone();
    let orch = Orchestrator::builder(plan, h.state.clone(), collaborators, h.ctx.clone())
        .sleeper(h.sleeper.clone())
        .build();
    interrupt.arm(&orch);

    assert_eq!(orch.run().await.unwrap(), DriveOutcome::Cancelled);
    assert_eq!(h.executor.executed(), vec!["p1".to_string()]);

    let record = orch.record().await;
    assert_eq!(record.plan.status, PlanStatus::Cancelled);
    assert_eq!(record.plan.status_of("p2"), Some(TaskStatus::Pending));
    assert!(!record.plan.checkpoint("cp-phase-0").unwrap().is_resolved());
}

#[tokio::test]
async fn high_risk_task_pauses_before_start() {
    let h = Harness::new();
    let tasks = vec![Task::new("wipe", "wipe cache", TaskType::Execution, "delete cache dir")];
    let plan = PlanBuilder::new().build("cleanup", tasks, &h.ctx).unwrap();
    let orch = Orchestrator::builder(plan, h.state.clone(), h.collaborators(None), h.ctx.clone())
        .build();

    match orch.drive().await.unwrap() {
        DriveOutcome::AwaitingApproval(cp) => {
            assert_eq!(cp.id, "cp-start");
            assert!(!cp.questions.is_empty());
        }
        other => panic!("expected a pause, got {other:?}"),
    }
    assert!(h.executor.executed().is_empty());

    orch.resolve_checkpoint(ApprovalDecision::proceed())
        .await
        .unwrap();
    assert_eq!(orch.drive().await.unwrap(), DriveOutcome::Completed);
    assert_eq!(h.executor.executed(), vec!["wipe".to_string()]);
}

#[tokio::test]
async fn resolving_without_a_pause_is_rejected() {
    let h = Harness::new();
    let tasks = vec![Task::new("a", "a", TaskType::Analysis, "look")];
    let plan = PlanBuilder::new().build("noop", tasks, &h.ctx).unwrap();
    let orch = Orchestrator::builder(plan, h.state.clone(), h.collaborators(None), h.ctx.clone())
        .build();

    assert!(orch
        .resolve_checkpoint(ApprovalDecision::proceed())
        .await
        .is_err());
}

#[tokio::test]
async fn modify_rebuilds_the_plan_and_keeps_progress() {
    let h = Harness::new();
    h.approval.then(ApprovalDecision::Modify {
        feedback: "also write docs".into(),
    });
    let a = Task::new("a", "scaffold", TaskType::Filesystem, "create dirs").with_checkpoint();
    let b = Task::new("b", "implement", TaskType::CodeGeneration, "write code").depends_on(["a"]);
    let docs = Task::new("docs", "document", TaskType::Filesystem, "write README").depends_on(["a"]);

    let modifier = Arc::new(FixedModifier(vec![a.clone(), b.clone(), docs]));
    let plan = PlanBuilder::new().build("with docs", vec![a, b], &h.ctx).unwrap();
    let plan_id = plan.id.clone();
    let orch = Orchestrator::builder(
        plan,
        h.state.clone(),
        h.collaborators(Some(modifier)),
        h.ctx.clone(),
    )
    .build();

    assert_eq!(orch.run().await.unwrap(), DriveOutcome::Completed);

    let executed = h.executor.executed();
    assert_eq!(executed.len(), 3);
    assert_eq!(executed[0], "a");
    assert!(executed.contains(&"docs".to_string()));

    let record = orch.record().await;
    assert_eq!(record.plan.id, plan_id);
    assert_eq!(record.plan.tasks.len(), 3);
    assert_eq!(
        record.plan.checkpoint("cp-phase-0").unwrap().feedback.as_deref(),
        Some("also write docs")
    );
}

#[tokio::test]
async fn modify_without_modifier_is_an_error() {
    let h = Harness::new();
    h.approval.then(ApprovalDecision::Modify {
        feedback: "change it".into(),
    });
    let tasks = vec![Task::new("a", "a", TaskType::Filesystem, "touch a").with_checkpoint()];
    let plan = PlanBuilder::new().build("one", tasks, &h.ctx).unwrap();
    let orch = Orchestrator::builder(plan, h.state.clone(), h.collaborators(None), h.ctx.clone())
        .build();

    assert!(orch.run().await.is_err());
    assert_eq!(orch.record().await.plan.status, PlanStatus::Paused);
}

#[tokio::test]
async fn single_slot_runs_every_task() {
    let h = Harness::new();
    let tasks: Vec<Task> = (0..6)
        .map(|i| Task::new(format!("t{i}"), "t", TaskType::Analysis, "inspect"))
        .collect();
    let plan = PlanBuilder::new().build("wide", tasks, &h.ctx).unwrap();
    let mut s = settings(1);
    s.max_parallel = 1;
    let orch = Orchestrator::builder(plan, h.state.clone(), h.collaborators(None), h.ctx.clone())
        .settings(s)
        .build();

    assert_eq!(orch.run().await.unwrap(), DriveOutcome::Completed);
    assert_eq!(h.executor.executed().len(), 6);
}

#[tokio::test]
async fn slow_task_times_out() {
    use async_trait::async_trait;
    use conductor_core::api::{RunContext, ToolExecutor, ToolOutput, ToolSelection};

    struct Slow;

    #[async_trait]
    impl ToolExecutor for Slow {
        async fn execute(
            &self,
            _task: &Task,
            _selection: Option<&ToolSelection>,
            _ctx: &RunContext,
        ) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolOutput::default())
        }
    }

    let h = Harness::new();
    let mut collaborators = h.collaborators(None);
    collaborators.executor = Arc::new(Slow);
    let mut task = Task::new("slow", "slow", TaskType::Execution, "sleep 5").with_timeout(1);
    task.retryable = false;
    let plan = PlanBuilder::new().build("slow", vec![task], &h.ctx).unwrap();
    let orch = Orchestrator::builder(plan, h.state.clone(), collaborators, h.ctx.clone()).build();

    let outcome = orch.run().await.unwrap();
    assert!(matches!(outcome, DriveOutcome::Failed { .. }));
    let record = orch.record().await;
    assert!(record.plan.task("slow").unwrap().error.as_deref().unwrap().contains("timeout"));
}
