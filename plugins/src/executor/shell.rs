use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use conductor_core::api::{RunContext, Task, ToolError, ToolOutput, ToolSelection};
use serde_json::json;
use tokio::process::Command;

use super::TaskHandler;

const MAX_CAPTURE_BYTES: usize = 64 * 1024;
const ERROR_TAIL_LINES: usize = 20;

/// Runs the task action as a shell command line.
///
/// Parameters: `cwd` (relative to the working directory) and `env` (object of
/// string values).
pub struct ShellHandler {
    shell: String,
    workdir: PathBuf,
}

impl ShellHandler {
    pub fn new(shell: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            workdir: workdir.into(),
        }
    }

    fn command(&self, task: &Task) -> Result<Command, ToolError> {
        if task.action.trim().is_empty() {
            return Err(ToolError::InvalidInput(format!(
                "task '{}' has an empty command",
                task.id
            )));
        }
        let flag = if self.shell.eq_ignore_ascii_case("cmd") {
            "/C"
        } else {
            "-c"
        };

        let mut cwd = self.workdir.clone();
        if let Some(sub) = task.parameters.get("cwd").and_then(|v| v.as_str()) {
            cwd.push(sub);
        }

        let mut cmd = Command::new(&self.shell);
        cmd.arg(flag)
            .arg(&task.action)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(env) = task.parameters.get("env").and_then(|v| v.as_object()) {
            for (k, v) in env {
                if let Some(v) = v.as_str() {
                    cmd.env(k, v);
                }
            }
        }
        Ok(cmd)
    }
}

fn capture(bytes: &[u8]) -> String {
    let end = bytes.len().min(MAX_CAPTURE_BYTES);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(ERROR_TAIL_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl TaskHandler for ShellHandler {
    fn name(&self) -> &str {
        "shell"
    }

    async fn handle(
        &self,
        task: &Task,
        _selection: Option<&ToolSelection>,
        _ctx: &RunContext,
    ) -> Result<ToolOutput, ToolError> {
        let output = self.command(task)?.output().await?;
        let stdout = capture(&output.stdout);
        let stderr = capture(&output.stderr);
        let code = output.status.code();

        if !output.status.success() {
            let detail = tail(if stderr.trim().is_empty() { &stdout } else { &stderr });
            let message = format!(
                "command exited with {}: {detail}",
                code.map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string())
            );
            // 126/127: not executable / not found.
            return Err(match code {
                Some(126) => ToolError::with_kind(message, "permission"),
                Some(127) => ToolError::with_kind(message, "validation"),
                _ => ToolError::execution(message),
            });
        }

        Ok(ToolOutput::new(json!({
            "exit_code": code,
            "stdout": stdout,
            "stderr": stderr,
        })))
    }
}
