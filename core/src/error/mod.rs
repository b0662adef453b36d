#[allow(clippy::module_inception)]
pub mod error;
pub mod plan;
pub mod state;
pub mod tool;

pub use error::OrchestratorError;
pub use plan::PlanError;
pub use state::{StateError, StorageError};
pub use tool::ToolError;
