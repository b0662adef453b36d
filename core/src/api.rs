//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `conductor_core::api` instead of reaching into internal modules.

pub use crate::config::{
    load_default, load_from_path, AppConfig, ApprovalConfig, ContextConfig, DecisionConfig,
    ExecutorConfig, LoggingConfig, OrchestratorConfig, RetryConfig, StorageConfig, StorageKind,
};
pub use crate::context::{
    AppContext, Clock, Collaborators, CollaboratorsFactory, ManualClock, RunContext, SystemClock,
};
pub use crate::error::{OrchestratorError, PlanError, StateError, StorageError, ToolError};
pub use crate::executor::{backoff, DependencyGraph, Sleeper, TokioSleeper};
pub use crate::memory::{ContextManager, ContextView, Message, Role};
pub use crate::orchestrator::{
    ApprovalDecision, ApprovalHandler, DecisionService, DriveOutcome, ErrorCategory,
    ErrorClassification, Orchestrator, OrchestratorEvent, OrchestratorSettings, PlanModifier,
    RecoveryStrategy, Severity, ToolExecutor, ToolOutput, ToolSelection,
};
pub use crate::plan::{
    Checkpoint, CheckpointBinding, CheckpointReason, ExecutionPlan, Phase, PlanBuilder, PlanStatus,
    PlanSummary, RiskRules,
};
pub use crate::state::{
    CheckpointSnapshot, ExecutionState, MemoryStorage, PlanRecord, StateEvent, StateManager,
    Storage,
};
pub use crate::task::{Task, TaskResult, TaskStatus, TaskType};
