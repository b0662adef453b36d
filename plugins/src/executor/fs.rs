use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use conductor_core::api::{RunContext, Task, ToolError, ToolOutput, ToolSelection};
use serde_json::{json, Value};

use super::TaskHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsOp {
    Write,
    Append,
    Mkdir,
    Remove,
    Read,
    Copy,
}

impl FsOp {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "write" | "create" => Some(Self::Write),
            "append" => Some(Self::Append),
            "mkdir" => Some(Self::Mkdir),
            "remove" | "delete" | "rm" => Some(Self::Remove),
            "read" | "cat" => Some(Self::Read),
            "copy" | "cp" => Some(Self::Copy),
            _ => None,
        }
    }
}

/// File operations confined to a root directory.
///
/// The operation and paths come from `parameters` (`op`, `path`, `to`,
/// `content`) or, when absent, from the action: `<op> <path> [<to>]`.
pub struct FilesystemHandler {
    root: PathBuf,
}

impl FilesystemHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, rel: &str) -> Result<PathBuf, ToolError> {
        let rel_path = Path::new(rel);
        let escapes = rel_path.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if rel.trim().is_empty() || escapes {
            return Err(ToolError::InvalidInput(format!(
                "path '{rel}' must be relative and stay inside the working directory"
            )));
        }
        Ok(self.root.join(rel_path))
    }
}

fn param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

#[async_trait]
impl TaskHandler for FilesystemHandler {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn handle(
        &self,
        task: &Task,
        _selection: Option<&ToolSelection>,
        _ctx: &RunContext,
    ) -> Result<ToolOutput, ToolError> {
        let mut words = task.action.split_whitespace();
        let op_word = param(&task.parameters, "op").or_else(|| words.next());
        let op = op_word
            .and_then(FsOp::parse)
            .ok_or_else(|| {
                ToolError::InvalidInput(format!(
                    "unknown filesystem operation in task '{}'",
                    task.id
                ))
            })?;
        let path_arg = param(&task.parameters, "path")
            .or_else(|| words.next())
            .ok_or_else(|| ToolError::InvalidInput(format!("task '{}' names no path", task.id)))?;
        let path = self.resolve(path_arg)?;
        let content = param(&task.parameters, "content").unwrap_or_default();

        let detail = match op {
            FsOp::Write | FsOp::Append => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                if op == FsOp::Append {
                    use tokio::io::AsyncWriteExt;
                    let mut file = tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .await?;
                    file.write_all(content.as_bytes()).await?;
                    file.flush().await?;
                } else {
                    tokio::fs::write(&path, content).await?;
                }
                json!({ "bytes": content.len() })
            }
            FsOp::Mkdir => {
                tokio::fs::create_dir_all(&path).await?;
                json!({})
            }
            FsOp::Remove => {
                let meta = tokio::fs::metadata(&path).await?;
                if meta.is_dir() {
                    tokio::fs::remove_dir_all(&path).await?;
                } else {
                    tokio::fs::remove_file(&path).await?;
                }
                json!({})
            }
            FsOp::Read => {
                let text = tokio::fs::read_to_string(&path).await?;
                json!({ "content": text })
            }
            FsOp::Copy => {
                let to_arg = param(&task.parameters, "to")
                    .or_else(|| words.next())
                    .ok_or_else(|| {
                        ToolError::InvalidInput(format!("task '{}' names no copy target", task.id))
                    })?;
                let to = self.resolve(to_arg)?;
                if let Some(parent) = to.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let bytes = tokio::fs::copy(&path, &to).await?;
                json!({ "bytes": bytes, "to": to_arg })
            }
        };

        let mut output = json!({ "op": format!("{op:?}").to_lowercase(), "path": path_arg });
        if let (Some(out), Some(extra)) = (output.as_object_mut(), detail.as_object()) {
            out.extend(extra.clone());
        }
        Ok(ToolOutput::new(output))
    }
}
