use async_trait::async_trait;
use conductor_core::api::{RunContext, Task, ToolError, ToolOutput, ToolSelection};
use serde_json::json;

use super::TaskHandler;

/// Describes the task instead of performing it.
pub struct DryRunHandler;

#[async_trait]
impl TaskHandler for DryRunHandler {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn handle(
        &self,
        task: &Task,
        selection: Option<&ToolSelection>,
        _ctx: &RunContext,
    ) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::new(json!({
            "dry_run": true,
            "task_type": task.task_type,
            "action": task.action,
            "tool": selection.map(|s| s.tool.clone()),
        })))
    }
}
