//! Collaborator seams: tools, decisions, approval and plan modification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::ToolError;
use crate::plan::{Checkpoint, ExecutionPlan, PlanSummary};
use crate::task::{Task, TaskType};

/// Tool chosen for a `tool-call` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSelection {
    pub tool: String,
    pub confidence: f64,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

/// What a tool returned for a successful attempt.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    pub output: serde_json::Value,
    /// Name of the tool that ran, when the executor knows it.
    #[serde(default)]
    pub tool: Option<String>,
}

impl ToolOutput {
    pub fn new(output: serde_json::Value) -> Self {
        Self { output, tool: None }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimit,
    Authentication,
    Permission,
    Validation,
    Resource,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub recoverable: bool,
}

/// How a failed task is handled. Exactly one is applied per failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Back to `pending` after a delay; `None` uses the configured backoff.
    Retry { delay_ms: Option<u64> },
    /// Restore a checkpoint snapshot; `None` means the last one taken.
    Rollback { checkpoint_id: Option<String> },
    Skip,
    Fail { reason: String },
}

/// Outcome of presenting a checkpoint to the approval surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Continue { feedback: Option<String> },
    Cancel { reason: Option<String> },
    Modify { feedback: String },
}

impl ApprovalDecision {
    pub fn proceed() -> Self {
        Self::Continue { feedback: None }
    }

    pub fn cancel() -> Self {
        Self::Cancel { reason: None }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Continue { .. } => "continue",
            Self::Cancel { .. } => "cancel",
            Self::Modify { .. } => "modify",
        }
    }
}

/// Performs the concrete action of a task.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Task types this executor has handlers for.
    fn supported_types(&self) -> Vec<TaskType> {
        TaskType::ALL.to_vec()
    }

    async fn execute(
        &self,
        task: &Task,
        selection: Option<&ToolSelection>,
        ctx: &RunContext,
    ) -> Result<ToolOutput, ToolError>;
}

/// Scoring heuristics behind tool choice and recovery.
#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn select_tool(&self, task: &Task, ctx: &RunContext) -> anyhow::Result<ToolSelection>;

    async fn classify_error(&self, task: &Task, error: &ToolError) -> ErrorClassification;

    /// `attempt` is the number of the attempt that just failed, starting at 1.
    async fn select_recovery_strategy(
        &self,
        task: &Task,
        classification: &ErrorClassification,
        attempt: u32,
    ) -> RecoveryStrategy;
}

/// User-facing approval surface for checkpoints.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request_approval(
        &self,
        checkpoint: &Checkpoint,
        plan: &PlanSummary,
    ) -> anyhow::Result<ApprovalDecision>;
}

/// Produces a revised task list when a checkpoint asks for changes.
#[async_trait]
pub trait PlanModifier: Send + Sync {
    async fn modify(
        &self,
        plan: &ExecutionPlan,
        feedback: &str,
        ctx: &RunContext,
    ) -> anyhow::Result<Vec<Task>>;
}
