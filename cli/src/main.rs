use clap::Parser;
mod approval;
mod commands;
mod error;
mod progress;
mod tasks_file;
use commands::cli;
use conductor_core::api::{AppConfig, LoggingConfig};
use error::{exit_code_for_error, CliError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            if let Some(hint) = e.hint() {
                eprintln!("hint: {hint}");
            }
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, CliError> {
    let args = cli::Args::parse();
    let cfg = load_config(&args).map_err(|e| CliError::Config(format!("{e:#}")))?;
    init_tracing(&cfg.logging).map_err(CliError::Config)?;

    tracing::debug!(
        storage = ?cfg.storage.kind,
        max_parallel = cfg.orchestrator.max_parallel,
        "config loaded"
    );
    dispatch(args.command, cfg, args.json).await
}

fn load_config(args: &cli::Args) -> anyhow::Result<AppConfig> {
    match &args.config {
        Some(path) => {
            let mut cfg = conductor_core::api::load_from_path(path)?;
            conductor_core::config::apply_env_overrides(&mut cfg, |name| std::env::var(name).ok())?;
            Ok(cfg)
        }
        None => conductor_core::api::load_default(),
    }
}

async fn dispatch(cmd: cli::Commands, cfg: AppConfig, json: bool) -> Result<i32, CliError> {
    match cmd {
        cli::Commands::Plan(args) => commands::plan(args, cfg, json).await,
        cli::Commands::Run(args) => commands::run(args, cfg, json).await,
        cli::Commands::Resume(args) => commands::resume(args, cfg, json).await,
        cli::Commands::Rollback(args) => commands::rollback(args, cfg, json).await,
        cli::Commands::Skip(args) => commands::skip(args, cfg, json).await,
        cli::Commands::Restart(args) => commands::restart(args, cfg, json).await,
        cli::Commands::Status(args) => commands::status(args, cfg, json).await,
        cli::Commands::Cleanup(args) => commands::cleanup(args, cfg, json).await,
        cli::Commands::Unlock(args) => commands::unlock(args, cfg, json).await,
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("conductor"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("conductor.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| e.to_string())?;

    Ok(())
}
