use std::sync::Arc;

use anyhow::Result;

use conductor_core::api::{
    AppConfig, ApprovalHandler, DecisionService, MemoryStorage, Storage, StorageKind,
    ToolExecutor,
};

use crate::approval::{AutoApproval, DenyApproval};
use crate::decision::HeuristicDecisionService;
use crate::executor::HandlerRegistry;
use crate::storage::FileStorage;

pub async fn build_storage(cfg: &AppConfig) -> Result<Arc<dyn Storage>> {
    match cfg.storage.kind {
        StorageKind::Memory => Ok(Arc::new(MemoryStorage::new())),
        StorageKind::File => {
            let dir = cfg
                .storage
                .directory
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("storage.directory is required for file storage"))?;
            Ok(Arc::new(FileStorage::open(dir).await?))
        }
    }
}

pub fn build_decision(cfg: &AppConfig) -> Arc<dyn DecisionService> {
    Arc::new(HeuristicDecisionService::new(cfg.decision.clone()))
}

pub fn build_executor(cfg: &AppConfig) -> Result<Arc<dyn ToolExecutor>> {
    Ok(Arc::new(HandlerRegistry::from_config(&cfg.executor)?))
}

/// `interactive` is used unless auto approval is configured; without either,
/// checkpoints cancel the plan.
pub fn build_approval(
    cfg: &AppConfig,
    interactive: Option<Arc<dyn ApprovalHandler>>,
) -> Arc<dyn ApprovalHandler> {
    if cfg.approval.auto_approve {
        return Arc::new(AutoApproval);
    }
    interactive.unwrap_or_else(|| Arc::new(DenyApproval))
}
