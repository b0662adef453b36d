mod load;
mod types;

pub use load::{apply_env_overrides, get_conductor_data_dir, load_default, load_from_path};
pub use types::{
    AppConfig, ApprovalConfig, ContextConfig, DecisionConfig, ExecutorConfig, LoggingConfig,
    OrchestratorConfig, RetryConfig, StorageConfig, StorageKind,
};
