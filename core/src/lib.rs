//! Core of the conductor task orchestration engine.
//!
//! ```text
//! tasks ─► plan::PlanBuilder ─► ExecutionPlan
//!                                   │
//!          orchestrator::Orchestrator (phases ─► executor batches)
//!                                   │
//!          state::StateManager ─► Storage (plan/, checkpoint/, conversation/)
//! ```

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod memory;
pub mod orchestrator;
pub mod plan;
pub mod state;
pub mod task;
