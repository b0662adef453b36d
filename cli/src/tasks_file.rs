use std::path::Path;

use conductor_core::api::Task;
use serde::Deserialize;

use crate::error::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toml,
}

impl Format {
    /// `.toml` files are TOML, everything else is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// Request plus the task list to plan for it.
#[derive(Debug, Clone, Deserialize)]
pub struct TasksFile {
    pub request: String,
    pub tasks: Vec<Task>,
}

impl TasksFile {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CliError::TaskFile(format!("read {}: {e}", path.display())))?;
        Self::parse(&text, Format::from_path(path))
            .map_err(|e| CliError::TaskFile(format!("{}: {e}", path.display())))
    }

    pub fn parse(text: &str, format: Format) -> anyhow::Result<Self> {
        let file: Self = match format {
            Format::Json => serde_json::from_str(text)?,
            Format::Toml => toml::from_str(text)?,
        };
        if file.request.trim().is_empty() {
            anyhow::bail!("request must not be empty");
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::api::TaskType;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_json_tasks() {
        let text = r#"{
            "request": "ship the release",
            "tasks": [
                {"id": "build", "name": "Build", "type": "execution", "action": "cargo build"},
                {"id": "tag", "name": "Tag", "type": "execution", "action": "git tag v1",
                 "dependencies": ["build"], "checkpoint": true}
            ]
        }"#;
        let file = TasksFile::parse(text, Format::Json).unwrap();
        assert_eq!(file.request, "ship the release");
        assert_eq!(file.tasks.len(), 2);
        assert_eq!(file.tasks[1].dependencies, vec!["build".to_string()]);
        assert!(file.tasks[1].checkpoint);
    }

    #[test]
    fn parses_toml_tasks_with_parameters() {
        let text = r#"
request = "scaffold docs"

[[tasks]]
id = "dir"
name = "Docs dir"
type = "filesystem"
action = "mkdir docs"

[[tasks]]
id = "index"
name = "Index page"
type = "filesystem"
action = "write"
dependencies = ["dir"]
estimated_secs = 5

[tasks.parameters]
path = "docs/index.md"
content = "hello"
"#;
        let file = TasksFile::parse(text, Format::Toml).unwrap();
        assert_eq!(file.tasks[0].task_type, TaskType::Filesystem);
        assert_eq!(file.tasks[1].estimated_secs, 5);
        assert_eq!(file.tasks[1].parameters["path"], "docs/index.md");
    }

    #[test]
    fn rejects_unknown_types_and_empty_requests() {
        let bad_type = r#"{"request":"r","tasks":[{"id":"a","name":"a","type":"teleport","action":"x"}]}"#;
        assert!(TasksFile::parse(bad_type, Format::Json).is_err());
        assert!(TasksFile::parse(r#"{"request":"  ","tasks":[]}"#, Format::Json).is_err());
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.toml");
        std::fs::write(&path, "request = ").unwrap();
        let err = TasksFile::load(&path).unwrap_err();
        assert!(matches!(err, CliError::TaskFile(ref m) if m.contains("tasks.toml")));
        assert_eq!(Format::from_path(Path::new("plan.JSON")), Format::Json);
    }
}
