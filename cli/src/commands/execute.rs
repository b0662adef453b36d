use std::sync::Arc;

use conductor_core::api::{
    AppConfig, AppContext, Collaborators, ContextManager, DriveOutcome, ExecutionPlan, Message,
    Orchestrator, OrchestratorSettings, PlanBuilder, RunContext, StateManager,
};
use conductor_plugins::factory;
use conductor_plugins::services::PluginCollaboratorsFactory;
use indicatif::{MultiProgress, ProgressDrawTarget};
use tokio::sync::broadcast::error::RecvError;

use super::cli::{ExecArgs, PlanArgs, ResumeArgs, RunArgs};
use super::{owner_id, print_json, render, run_context};
use crate::approval::ConsoleApproval;
use crate::error::{CliError, EXIT_CANCELLED, EXIT_FAILED};
use crate::progress::ProgressMonitor;
use crate::tasks_file::TasksFile;

pub fn apply_exec_flags(cfg: &AppConfig, flags: &ExecArgs) -> AppConfig {
    let mut cfg = cfg.clone();
    if flags.auto_approve {
        cfg.approval.auto_approve = true;
    }
    if flags.dry_run {
        cfg.executor.dry_run = true;
    }
    if let Some(n) = flags.max_parallel {
        cfg.orchestrator.max_parallel = n.max(1);
    }
    cfg
}

pub async fn plan(args: PlanArgs, cfg: AppConfig, json: bool) -> Result<i32, CliError> {
    let file = TasksFile::load(&args.tasks_file)?;
    let executor = factory::build_executor(&cfg)?;
    let builder = PlanBuilder::new().with_supported_types(executor.supported_types());
    let plan = builder.build(&file.request, file.tasks, &run_context("plan"))?;

    if json {
        print_json(&plan)?;
    } else {
        print!("{}", render::plan(&plan));
    }
    Ok(0)
}

pub async fn run(args: RunArgs, cfg: AppConfig, json: bool) -> Result<i32, CliError> {
    let file = TasksFile::load(&args.tasks_file)?;
    let session = Session::open(&cfg, &args.exec, json).await?;
    let ctx = run_context("run");

    let builder = session.plan_builder();
    let plan = builder.build(&file.request, file.tasks, &ctx)?;
    let ctx = session
        .remember_request(&args.conversation, &file.request, &plan, ctx)
        .await?;
    let orchestrator = Orchestrator::builder(
        plan,
        session.state.clone(),
        session.collaborators.clone(),
        ctx,
    )
    .plan_builder(builder)
    .settings(OrchestratorSettings::from_config(&session.cfg))
    .build();

    session.drive(orchestrator).await
}

pub async fn resume(args: ResumeArgs, cfg: AppConfig, json: bool) -> Result<i32, CliError> {
    let session = Session::open(&cfg, &args.exec, json).await?;
    let record = session.state.resume(&args.plan_id).await?;
    tracing::info!(
        plan_id = %args.plan_id,
        resume_from = record.state.resume_from_task.as_deref().unwrap_or("-"),
        "resuming plan"
    );

    let orchestrator = Orchestrator::for_record(
        record,
        session.state.clone(),
        session.collaborators.clone(),
        run_context("resume"),
    )
    .plan_builder(session.plan_builder())
    .settings(OrchestratorSettings::from_config(&session.cfg))
    .build();

    session.drive(orchestrator).await
}

/// Everything one executing command needs, built from config plus flags.
struct Session {
    cfg: AppConfig,
    collaborators: Collaborators,
    state: StateManager,
    multi: MultiProgress,
    progress: bool,
    json: bool,
}

impl Session {
    async fn open(base: &AppConfig, flags: &ExecArgs, json: bool) -> Result<Self, CliError> {
        let progress = !flags.no_progress && !json && atty::is(atty::Stream::Stderr);
        let multi = if progress {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let mut services = PluginCollaboratorsFactory::default();
        if atty::is(atty::Stream::Stdin) {
            services =
                services.with_interactive_approval(Arc::new(ConsoleApproval::new(multi.clone())));
        }
        let app = AppContext::new(apply_exec_flags(base, flags), Some(Arc::new(services)));
        let collaborators = app.build_collaborators().await?;
        let state = StateManager::new(collaborators.storage.clone(), owner_id(app.cfg()));

        Ok(Self {
            cfg: app.cfg().clone(),
            collaborators,
            state,
            multi,
            progress,
            json,
        })
    }

    /// Record the request and its plan as a conversation turn and hand the
    /// resulting context to the run.
    async fn remember_request(
        &self,
        conversation_id: &str,
        request: &str,
        plan: &ExecutionPlan,
        ctx: RunContext,
    ) -> Result<RunContext, CliError> {
        let storage = self.collaborators.storage.as_ref();
        let mut memory = ContextManager::load(storage, conversation_id, self.cfg.context.clone())
            .await?
            .unwrap_or_else(|| ContextManager::new(conversation_id, self.cfg.context.clone()));

        let summary = plan.summary();
        memory.record_turn(
            vec![
                Message::user(request),
                Message::assistant(format!(
                    "Planned {} tasks in {} phases with {} checkpoints, risk {:?}.",
                    summary.total_tasks, summary.phases, summary.checkpoints, summary.risk
                )),
            ],
            Some(plan.id.clone()),
            &ctx,
        );
        memory.save(storage).await?;

        let view = memory.default_view();
        tracing::debug!(
            conversation_id,
            tokens = view.tokens,
            stages = view.stages_applied,
            "conversation context attached"
        );
        Ok(ctx.with_conversation(view))
    }

    fn plan_builder(&self) -> PlanBuilder {
        PlanBuilder::new().with_supported_types(self.collaborators.executor.supported_types())
    }

    async fn drive(&self, orchestrator: Orchestrator) -> Result<i32, CliError> {
        let plan_id = orchestrator.plan_id().await;

        let mut monitor = ProgressMonitor::new(self.multi.clone(), self.progress);
        let mut events = orchestrator.subscribe();
        let observer = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => monitor.observe(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "progress events dropped")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let interrupted = orchestrator.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, finishing in-flight tasks");
                if let Err(err) = interrupted.cancel().await {
                    tracing::warn!(error = %err, "cancel on interrupt failed");
                }
            }
        });

        let result = orchestrator.run().await;
        let record = orchestrator.record().await;

        interrupt.abort();
        let _ = interrupt.await;
        drop(orchestrator);
        let _ = observer.await;

        if let Err(err) = self.state.release(&plan_id).await {
            tracing::warn!(plan_id = %plan_id, error = %err, "lease release failed");
        }

        let outcome = result?;
        if self.json {
            print_json(&serde_json::json!({
                "plan_id": plan_id,
                "outcome": outcome_label(&outcome),
                "state": record.state,
                "results": record.plan.results,
            }))?;
        } else {
            print!("{}", render::outcome(&plan_id, &outcome, &record));
        }
        Ok(exit_code_for_outcome(&outcome))
    }
}

fn outcome_label(outcome: &DriveOutcome) -> &'static str {
    match outcome {
        DriveOutcome::Completed => "completed",
        DriveOutcome::Cancelled => "cancelled",
        DriveOutcome::Failed { .. } => "failed",
        DriveOutcome::AwaitingApproval(_) => "paused",
    }
}

pub fn exit_code_for_outcome(outcome: &DriveOutcome) -> i32 {
    match outcome {
        DriveOutcome::Completed | DriveOutcome::AwaitingApproval(_) => 0,
        DriveOutcome::Failed { .. } => EXIT_FAILED,
        DriveOutcome::Cancelled => EXIT_CANCELLED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::api::StorageKind;
    use pretty_assertions::assert_eq;

    fn file_config(dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.storage.kind = StorageKind::File;
        cfg.storage.directory = Some(dir.join("state").to_string_lossy().to_string());
        cfg.executor.workdir = Some(dir.to_string_lossy().to_string());
        cfg
    }

    #[test]
    fn flags_override_config() {
        let flags = ExecArgs {
            auto_approve: true,
            dry_run: true,
            max_parallel: Some(0),
            no_progress: true,
        };
        let cfg = apply_exec_flags(&AppConfig::default(), &flags);
        assert!(cfg.approval.auto_approve);
        assert!(cfg.executor.dry_run);
        assert_eq!(cfg.orchestrator.max_parallel, 1);
    }

    #[tokio::test]
    async fn dry_run_completes_and_releases_the_lease() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = dir.path().join("tasks.json");
        std::fs::write(
            &tasks,
            r#"{"request": "demo", "tasks": [
                {"id": "gen", "name": "Generate", "type": "code-generation", "action": "scaffold"},
                {"id": "db", "name": "Migrate", "type": "database", "action": "migrate",
                 "dependencies": ["gen"], "checkpoint": true}
            ]}"#,
        )
        .unwrap();
        let cfg = file_config(dir.path());
        let exec = ExecArgs {
            auto_approve: true,
            dry_run: true,
            no_progress: true,
            ..ExecArgs::default()
        };

        let code = run(
            RunArgs {
                tasks_file: tasks,
                conversation: "demo-chat".into(),
                exec,
            },
            cfg.clone(),
            true,
        )
        .await
        .unwrap();
        assert_eq!(code, 0);

        let storage = factory::build_storage(&cfg).await.unwrap();
        let other = StateManager::new(storage, "someone-else");
        let plans = other.list_plans().await.unwrap();
        assert_eq!(plans.len(), 1);
        let mut record = other.load(&plans[0]).await.unwrap();
        assert_eq!(record.state.progress.completed, 2);
        other.save(&mut record).await.unwrap();

        let storage = factory::build_storage(&cfg).await.unwrap();
        let memory = ContextManager::load(storage.as_ref(), "demo-chat", cfg.context.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(memory.turns().len(), 1);
        assert_eq!(memory.turns()[0].plan_id.as_deref(), Some(plans[0].as_str()));
        assert!(memory.default_view().text.contains("demo"));
    }

    #[tokio::test]
    async fn failing_shell_task_exits_with_failed_code() {
        if cfg!(windows) {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let tasks = dir.path().join("tasks.toml");
        std::fs::write(
            &tasks,
            r#"
request = "broken build"

[[tasks]]
id = "build"
name = "Build"
type = "execution"
action = "exit 3"
retryable = false
"#,
        )
        .unwrap();
        let exec = ExecArgs {
            auto_approve: true,
            no_progress: true,
            ..ExecArgs::default()
        };

        let code = run(
            RunArgs {
                tasks_file: tasks,
                conversation: "default".into(),
                exec,
            },
            file_config(dir.path()),
            true,
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_FAILED);
    }
}
