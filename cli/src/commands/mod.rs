pub mod cli;
mod execute;
mod render;
mod state;

pub use execute::{plan, resume, run};
pub use state::{cleanup, restart, rollback, skip, status, unlock};

use conductor_core::api::{AppConfig, RunContext};

/// Lease owner for plan writes. Without a configured id every process is its
/// own owner, so a crashed run has to be unlocked explicitly.
fn owner_id(cfg: &AppConfig) -> String {
    cfg.storage
        .owner_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("conductor-{}", uuid::Uuid::new_v4()))
}

fn run_context(command: &str) -> RunContext {
    let ctx = RunContext::new(uuid::Uuid::new_v4().to_string()).with_label("command", command);
    match std::env::var("USER").or_else(|_| std::env::var("USERNAME")) {
        Ok(user) if !user.trim().is_empty() => ctx.with_user(user),
        _ => ctx,
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
