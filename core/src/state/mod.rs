//! State & recovery: persisted plan records, checkpoint snapshots and the
//! operations that resume, roll back, skip, restart and clean them up.
//!
//! Every write goes through [`StateManager`], which holds a lease on the
//! plan key so only one process writes a plan at a time.

pub mod manager;
pub mod recovery;
pub mod snapshot;
pub mod storage;
pub mod types;

pub use manager::StateManager;
pub use recovery::{apply_restart, apply_resume, apply_rollback, apply_skip};
pub use snapshot::CheckpointSnapshot;
pub use storage::{MemoryStorage, Storage};
pub use types::{ExecutionState, PlanRecord, Progress, StateEvent};
