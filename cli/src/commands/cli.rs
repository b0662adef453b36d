use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "conductor", version, about = "Plan, run and recover task orchestrations")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of ~/.conductor/config.toml / ./config.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PlanArgs {
    /// JSON or TOML file with `request` and `tasks`.
    pub tasks_file: PathBuf,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ExecArgs {
    /// Continue through every checkpoint without asking.
    #[arg(long)]
    pub auto_approve: bool,

    /// Log what each task would do instead of doing it.
    #[arg(long)]
    pub dry_run: bool,

    /// Upper bound on tasks running at once.
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Hide progress bars.
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// JSON or TOML file with `request` and `tasks`.
    pub tasks_file: PathBuf,

    /// Conversation the request belongs to. Its stored context is handed to
    /// tool selection and the request is recorded as a new turn.
    #[arg(long, default_value = "default")]
    pub conversation: String,

    #[command(flatten)]
    pub exec: ExecArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ResumeArgs {
    pub plan_id: String,

    #[command(flatten)]
    pub exec: ExecArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RollbackArgs {
    pub plan_id: String,
    pub checkpoint_id: String,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SkipArgs {
    pub plan_id: String,
    pub task_id: String,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StatusArgs {
    /// Plan to show; lists every stored plan when omitted.
    pub plan_id: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CleanupArgs {
    /// Remove finished plans not updated for this many hours.
    #[arg(long, default_value_t = 24 * 7, value_parser = clap::value_parser!(i64).range(0..))]
    pub older_than_hours: i64,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PlanIdArgs {
    pub plan_id: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and print a plan without executing it.
    Plan(PlanArgs),
    /// Build a plan and execute it.
    Run(RunArgs),
    /// Continue a paused, failed or interrupted plan.
    Resume(ResumeArgs),
    /// Restore a plan to a checkpoint snapshot; `resume` continues from there.
    Rollback(RollbackArgs),
    /// Mark a pending or failed task skipped so its dependents can run.
    Skip(SkipArgs),
    /// Reset every task of a plan to pending.
    Restart(PlanIdArgs),
    /// Show stored plan state.
    Status(StatusArgs),
    /// Delete old finished plans and their snapshots.
    Cleanup(CleanupArgs),
    /// Drop the lease on a plan left behind by a crashed process.
    Unlock(PlanIdArgs),
}
