use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub decision: DecisionConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "conductor_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrently executing tasks inside one batch.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Rollbacks allowed per plan before a failure becomes terminal.
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
}

fn default_max_parallel() -> usize {
    num_cpus::get()
}

fn default_max_recovery_attempts() -> u32 {
    10
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            max_recovery_attempts: default_max_recovery_attempts(),
        }
    }
}

/// Backoff parameters for task retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,

    /// Root directory of the file backend. Defaults to `~/.conductor/state`.
    #[serde(default)]
    pub directory: Option<String>,

    /// Lease owner id for plan writes. A random id is used when unset.
    #[serde(default)]
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    #[serde(default = "default_working_turns")]
    pub working_turns: usize,

    /// Turns younger than this (and not working) are short-term.
    #[serde(default = "default_short_term_turns")]
    pub short_term_turns: usize,

    /// Turns younger than this (and not short-term) are medium-term; older
    /// turns are archived into long-term facts.
    #[serde(default = "default_medium_term_turns")]
    pub medium_term_turns: usize,

    #[serde(default = "default_short_term_retention")]
    pub short_term_retention: f64,

    #[serde(default = "default_medium_term_retention")]
    pub medium_term_retention: f64,

    #[serde(default = "default_long_term_retention")]
    pub long_term_retention: f64,
}

fn default_token_budget() -> usize {
    8_000
}

fn default_working_turns() -> usize {
    2
}

fn default_short_term_turns() -> usize {
    10
}

fn default_medium_term_turns() -> usize {
    50
}

fn default_short_term_retention() -> f64 {
    1.0
}

fn default_medium_term_retention() -> f64 {
    0.8
}

fn default_long_term_retention() -> f64 {
    0.7
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            working_turns: default_working_turns(),
            short_term_turns: default_short_term_turns(),
            medium_term_turns: default_medium_term_turns(),
            short_term_retention: default_short_term_retention(),
            medium_term_retention: default_medium_term_retention(),
            long_term_retention: default_long_term_retention(),
        }
    }
}

/// Thresholds of the heuristic decision service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Fixed wait before retrying a rate-limited call.
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,

    /// Skip tasks whose input was rejected instead of failing the plan.
    #[serde(default)]
    pub skip_on_validation: bool,

    /// Roll back to the last checkpoint on resource exhaustion.
    #[serde(default = "default_rollback_on_resource")]
    pub rollback_on_resource: bool,

    /// Confidence reported when a task names its tool explicitly.
    #[serde(default = "default_explicit_tool_confidence")]
    pub explicit_tool_confidence: f64,
}

fn default_rate_limit_delay_ms() -> u64 {
    5_000
}

fn default_rollback_on_resource() -> bool {
    true
}

fn default_explicit_tool_confidence() -> f64 {
    0.95
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
            skip_on_validation: false,
            rollback_on_resource: default_rollback_on_resource(),
            explicit_tool_confidence: default_explicit_tool_confidence(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Continue through every checkpoint without prompting.
    #[serde(default)]
    pub auto_approve: bool,
}

/// Built-in task handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Working directory for shell commands and root of filesystem tasks.
    /// Defaults to the current directory.
    #[serde(default)]
    pub workdir: Option<String>,

    /// Report what each task would do without running it.
    #[serde(default)]
    pub dry_run: bool,

    /// Shell used for execution tasks.
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_shell() -> String {
    if cfg!(windows) {
        "cmd".to_string()
    } else {
        "sh".to_string()
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workdir: None,
            dry_run: false,
            shell: default_shell(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.storage.kind, StorageKind::File);
        assert_eq!(cfg.context.medium_term_turns, 50);
        assert!(cfg.orchestrator.max_parallel >= 1);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [retry]
            base_delay_ms = 100

            [storage]
            kind = "memory"

            [approval]
            auto_approve = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.retry.base_delay_ms, 100);
        assert_eq!(cfg.retry.max_delay_ms, 30_000);
        assert_eq!(cfg.storage.kind, StorageKind::Memory);
        assert!(cfg.approval.auto_approve);
        assert_eq!(cfg.orchestrator.max_recovery_attempts, 10);
    }
}
