//! Execution plans: phases, checkpoints, estimates and the builder producing them.

pub mod builder;
pub mod risk;
pub mod transitions;
pub mod types;

pub use builder::PlanBuilder;
pub use risk::{RiskAssessment, RiskRules};
pub use transitions::PlanTransition;
pub use types::{
    Checkpoint, CheckpointBinding, CheckpointReason, Complexity, ExecutionPlan, Phase, PlanStatus,
    PlanSummary, RiskLevel,
};
