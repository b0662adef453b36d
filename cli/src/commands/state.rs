use conductor_core::api::{AppConfig, StateManager};
use conductor_plugins::factory;

use super::cli::{CleanupArgs, PlanIdArgs, RollbackArgs, SkipArgs, StatusArgs};
use super::{owner_id, print_json, render};
use crate::error::CliError;

async fn open_state(cfg: &AppConfig) -> Result<StateManager, CliError> {
    let storage = factory::build_storage(cfg).await?;
    Ok(StateManager::new(storage, owner_id(cfg)))
}

pub async fn rollback(args: RollbackArgs, cfg: AppConfig, json: bool) -> Result<i32, CliError> {
    let state = open_state(&cfg).await?;
    let record = state
        .rollback_to_checkpoint(&args.plan_id, &args.checkpoint_id)
        .await?;
    state.release(&args.plan_id).await?;

    if json {
        print_json(&record.state)?;
    } else {
        println!(
            "plan {} rolled back to {} ({}/{} tasks done); continue with: conductor resume {}",
            args.plan_id,
            args.checkpoint_id,
            record.state.progress.completed,
            record.state.progress.total,
            args.plan_id
        );
    }
    Ok(0)
}

pub async fn skip(args: SkipArgs, cfg: AppConfig, json: bool) -> Result<i32, CliError> {
    let state = open_state(&cfg).await?;
    let record = state.skip(&args.plan_id, &args.task_id).await?;
    state.release(&args.plan_id).await?;

    if json {
        print_json(&record.state)?;
    } else {
        println!("task {} of plan {} skipped", args.task_id, args.plan_id);
    }
    Ok(0)
}

pub async fn restart(args: PlanIdArgs, cfg: AppConfig, json: bool) -> Result<i32, CliError> {
    let state = open_state(&cfg).await?;
    let record = state.restart(&args.plan_id).await?;
    state.release(&args.plan_id).await?;

    if json {
        print_json(&record.state)?;
    } else {
        println!(
            "plan {} reset to {} pending task(s); run it with: conductor resume {}",
            args.plan_id, record.state.progress.pending, args.plan_id
        );
    }
    Ok(0)
}

pub async fn status(args: StatusArgs, cfg: AppConfig, json: bool) -> Result<i32, CliError> {
    let state = open_state(&cfg).await?;

    let Some(plan_id) = args.plan_id else {
        let mut records = Vec::new();
        for plan_id in state.list_plans().await? {
            match state.load(&plan_id).await {
                Ok(record) => records.push(record),
                Err(err) => tracing::warn!(plan_id = %plan_id, error = %err, "unreadable plan"),
            }
        }
        records.sort_by_key(|r| std::cmp::Reverse(r.state.updated_at));

        if json {
            let states: Vec<_> = records.iter().map(|r| &r.state).collect();
            print_json(&states)?;
        } else if records.is_empty() {
            println!("no stored plans");
        } else {
            for record in &records {
                println!("{}", render::summary_line(record));
            }
        }
        return Ok(0);
    };

    let record = state.load(&plan_id).await?;
    let snapshots = state.list_snapshots(&plan_id).await?;
    if json {
        print_json(&serde_json::json!({
            "plan": record.plan,
            "state": record.state,
            "snapshots": snapshots.iter().map(|s| &s.checkpoint_id).collect::<Vec<_>>(),
        }))?;
    } else {
        print!("{}", render::record(&record, &snapshots));
    }
    Ok(0)
}

pub async fn cleanup(args: CleanupArgs, cfg: AppConfig, json: bool) -> Result<i32, CliError> {
    let state = open_state(&cfg).await?;
    let removed = state
        .cleanup(chrono::Duration::hours(args.older_than_hours))
        .await?;

    if json {
        print_json(&removed)?;
    } else {
        println!("removed {} plan(s)", removed.len());
        for plan_id in &removed {
            println!("  {plan_id}");
        }
    }
    Ok(0)
}

pub async fn unlock(args: PlanIdArgs, cfg: AppConfig, json: bool) -> Result<i32, CliError> {
    let state = open_state(&cfg).await?;
    // Fails with NotFound for unknown plans instead of silently succeeding.
    state.load(&args.plan_id).await?;
    let released = state.force_release(&args.plan_id).await?;

    if json {
        print_json(&serde_json::json!({ "plan_id": args.plan_id, "released": released }))?;
    } else if released {
        println!("lease on plan {} released", args.plan_id);
    } else {
        println!("plan {} was not leased", args.plan_id);
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::api::{
        PlanBuilder, PlanRecord, RunContext, StateError, StorageKind, Task, TaskType,
    };

    fn file_config(dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.storage.kind = StorageKind::File;
        cfg.storage.directory = Some(dir.to_string_lossy().to_string());
        cfg
    }

    async fn seed(cfg: &AppConfig, owner: &str) -> String {
        let tasks = vec![
            Task::new("a", "A", TaskType::Execution, "echo a"),
            Task::new("b", "B", TaskType::Execution, "echo b").depends_on(["a"]),
        ];
        let plan = PlanBuilder::new()
            .build("seeded", tasks, &RunContext::new("req"))
            .unwrap();
        let storage = factory::build_storage(cfg).await.unwrap();
        let state = StateManager::new(storage, owner);
        let mut record = PlanRecord::new(plan);
        state.save(&mut record).await.unwrap();
        record.plan.id
    }

    #[tokio::test]
    async fn unlock_frees_a_plan_held_by_a_dead_owner() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = file_config(dir.path());
        let plan_id = seed(&cfg, "crashed-run").await;

        let err = skip(
            SkipArgs {
                plan_id: plan_id.clone(),
                task_id: "a".into(),
            },
            cfg.clone(),
            true,
        )
        .await
        .unwrap_err();
        assert_eq!(crate::error::exit_code_for_error(&err), 16);

        let code = unlock(PlanIdArgs { plan_id: plan_id.clone() }, cfg.clone(), true)
            .await
            .unwrap();
        assert_eq!(code, 0);

        skip(
            SkipArgs {
                plan_id: plan_id.clone(),
                task_id: "a".into(),
            },
            cfg.clone(),
            true,
        )
        .await
        .unwrap();

        let record = open_state(&cfg).await.unwrap().load(&plan_id).await.unwrap();
        assert_eq!(record.state.progress.skipped, 1);
    }

    #[tokio::test]
    async fn status_of_unknown_plan_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = file_config(dir.path());
        let err = status(
            StatusArgs {
                plan_id: Some("missing".into()),
            },
            cfg.clone(),
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CliError::State(StateError::NotFound(_))));

        seed(&cfg, "w").await;
        assert_eq!(
            status(StatusArgs { plan_id: None }, cfg.clone(), false)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn cleanup_keeps_unfinished_plans() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = file_config(dir.path());
        let plan_id = seed(&cfg, "w").await;

        cleanup(CleanupArgs { older_than_hours: 0 }, cfg.clone(), true)
            .await
            .unwrap();
        let plans = open_state(&cfg).await.unwrap().list_plans().await.unwrap();
        assert_eq!(plans, vec![plan_id]);
    }
}
