use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of task kinds. Each kind maps to one handler in the tool registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    CodeGeneration,
    Filesystem,
    Database,
    Execution,
    Analysis,
    ToolCall,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        TaskType::CodeGeneration,
        TaskType::Filesystem,
        TaskType::Database,
        TaskType::Execution,
        TaskType::Analysis,
        TaskType::ToolCall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CodeGeneration => "code-generation",
            Self::Filesystem => "filesystem",
            Self::Database => "database",
            Self::Execution => "execution",
            Self::Analysis => "analysis",
            Self::ToolCall => "tool-call",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown task type: {s}"))
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Ready,
    Executing,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Completed and skipped tasks unblock their dependents.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

/// Atomic unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub action: String,
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Computed by the plan builder; any input value is overwritten.
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub estimated_secs: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub estimated_cost: Option<f64>,

    #[serde(default)]
    pub checkpoint: bool,
    #[serde(default = "default_retryable")]
    pub retryable: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_count: u32,

    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,

    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_retryable() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        task_type: TaskType,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            task_type,
            action: action.into(),
            dependencies: Vec::new(),
            priority: 0,
            estimated_secs: 0,
            timeout_secs: None,
            estimated_cost: None,
            checkpoint: false,
            retryable: default_retryable(),
            max_retries: default_max_retries(),
            retry_count: 0,
            tags: Vec::new(),
            parameters: serde_json::Value::Null,
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn estimated(mut self, secs: u64) -> Self {
        self.estimated_secs = secs;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_checkpoint(mut self) -> Self {
        self.checkpoint = true;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Runtime fields only, as captured into persisted state.
    pub fn runtime(&self) -> TaskRuntime {
        TaskRuntime {
            status: self.status,
            retry_count: self.retry_count,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
        }
    }

    pub fn apply_runtime(&mut self, runtime: &TaskRuntime) {
        self.status = runtime.status;
        self.retry_count = runtime.retry_count;
        self.started_at = runtime.started_at;
        self.completed_at = runtime.completed_at;
        self.error = runtime.error.clone();
    }

    /// Back to a clean pending task (timestamps and error cleared).
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.retry_count = 0;
        self.started_at = None;
        self.completed_at = None;
        self.error = None;
    }
}

/// Mutable part of a task, persisted in the execution state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskRuntime {
    pub status: TaskStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    #[serde(default)]
    pub output: serde_json::Value,
    pub duration_ms: u64,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    #[serde(default)]
    pub tool: Option<String>,
    pub completed_at: DateTime<Utc>,
}
