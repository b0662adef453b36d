//! CollaboratorsFactory implementation: builds storage, decision service,
//! handlers and approval from configuration for the CLI.
use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::api::{AppConfig, ApprovalHandler, Collaborators, CollaboratorsFactory};

use crate::factory;

#[derive(Default)]
pub struct PluginCollaboratorsFactory {
    interactive: Option<Arc<dyn ApprovalHandler>>,
}

impl PluginCollaboratorsFactory {
    /// Use `approval` at checkpoints unless the config auto-approves.
    pub fn with_interactive_approval(mut self, approval: Arc<dyn ApprovalHandler>) -> Self {
        self.interactive = Some(approval);
        self
    }
}

#[async_trait]
impl CollaboratorsFactory for PluginCollaboratorsFactory {
    async fn build(&self, cfg: &AppConfig) -> anyhow::Result<Collaborators> {
        let storage = factory::build_storage(cfg).await?;
        let executor = factory::build_executor(cfg)?;
        Ok(Collaborators {
            executor,
            decision: factory::build_decision(cfg),
            approval: factory::build_approval(cfg, self.interactive.clone()),
            modifier: None,
            storage,
        })
    }
}
