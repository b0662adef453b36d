//! Orchestrator: drives an [`ExecutionPlan`](crate::plan::ExecutionPlan)
//! phase by phase, batch by batch, through retries, checkpoints and
//! recovery.
//!
//! ```text
//! drive()
//!   ├─ prepare()        pending/approved/paused -> executing, due checkpoint -> pause
//!   ├─ run_phase()      compute_batches -> execute_batch_parallel(run_task)
//!   │     └─ run_task   ready -> executing -> completed | failed -> recovery
//!   └─ finish()/abort()
//! resolve_checkpoint(decision)   continue | cancel | modify
//! ```

mod engine;
pub mod events;
pub mod traits;

pub use engine::{DriveOutcome, Orchestrator, OrchestratorBuilder, OrchestratorSettings};
pub use events::OrchestratorEvent;
pub use traits::{
    ApprovalDecision, ApprovalHandler, DecisionService, ErrorCategory, ErrorClassification,
    PlanModifier, RecoveryStrategy, Severity, ToolExecutor, ToolOutput, ToolSelection,
};
