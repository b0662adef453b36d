//! Handler lookup table keyed by task type, exposed to the engine as a
//! [`ToolExecutor`].

mod dry_run;
mod fs;
mod shell;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::api::{
    ExecutorConfig, RunContext, Task, TaskType, ToolError, ToolExecutor, ToolOutput, ToolSelection,
};

pub use dry_run::DryRunHandler;
pub use fs::FilesystemHandler;
pub use shell::ShellHandler;

/// Performs one kind of task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(
        &self,
        task: &Task,
        selection: Option<&ToolSelection>,
        ctx: &RunContext,
    ) -> Result<ToolOutput, ToolError>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, task_type: TaskType, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_type, handler);
        self
    }

    /// Filesystem, execution and tool-call tasks run for real; with `dry_run`
    /// every type is accepted and only described.
    pub fn from_config(cfg: &ExecutorConfig) -> anyhow::Result<Self> {
        if cfg.dry_run {
            let dry: Arc<dyn TaskHandler> = Arc::new(DryRunHandler);
            return Ok(TaskType::ALL
                .into_iter()
                .fold(Self::new(), |r, t| r.register(t, dry.clone())));
        }

        let workdir = match cfg.workdir.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()?,
        };
        let shell: Arc<dyn TaskHandler> =
            Arc::new(ShellHandler::new(cfg.shell.clone(), workdir.clone()));
        Ok(Self::new()
            .register(TaskType::Filesystem, Arc::new(FilesystemHandler::new(workdir)))
            .register(TaskType::Execution, shell.clone())
            .register(TaskType::ToolCall, shell))
    }
}

#[async_trait]
impl ToolExecutor for HandlerRegistry {
    fn supported_types(&self) -> Vec<TaskType> {
        self.handlers.keys().copied().collect()
    }

    async fn execute(
        &self,
        task: &Task,
        selection: Option<&ToolSelection>,
        ctx: &RunContext,
    ) -> Result<ToolOutput, ToolError> {
        let handler = self
            .handlers
            .get(&task.task_type)
            .ok_or_else(|| ToolError::Unsupported(task.task_type.to_string()))?;
        tracing::debug!(
            task_id = %task.id,
            handler = handler.name(),
            request_id = ctx.request_id(),
            "dispatching task"
        );
        let output = handler.handle(task, selection, ctx).await?;
        Ok(match output.tool {
            Some(_) => output,
            None => output.with_tool(handler.name()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_type_is_unsupported() {
        let registry = HandlerRegistry::new().register(TaskType::Analysis, Arc::new(DryRunHandler));
        assert_eq!(registry.supported_types(), vec![TaskType::Analysis]);

        let ctx = RunContext::new("r");
        let task = Task::new("db", "migrate", TaskType::Database, "migrate up");
        let err = registry.execute(&task, None, &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::Unsupported(ref t) if t == "database"));

        let task = Task::new("a", "look", TaskType::Analysis, "summarize logs");
        let out = registry.execute(&task, None, &ctx).await.unwrap();
        assert_eq!(out.tool.as_deref(), Some("dry-run"));
    }

    #[test]
    fn dry_run_accepts_every_type() {
        let registry = HandlerRegistry::from_config(&ExecutorConfig {
            dry_run: true,
            ..ExecutorConfig::default()
        })
        .unwrap();
        assert_eq!(registry.supported_types().len(), TaskType::ALL.len());
    }
}
