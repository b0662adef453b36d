use std::time::Duration;

use thiserror::Error;

/// Failure reported by a tool executor for one task attempt.
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no handler for {0}")]
    Unsupported(String),

    #[error("execution failed: {message}")]
    Execution {
        message: String,
        /// Optional hint from the tool (e.g. "network", "rate-limit").
        kind: Option<String>,
    },
}

impl ToolError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            kind: None,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            kind: Some(kind.into()),
        }
    }

    pub fn kind_hint(&self) -> Option<&str> {
        match self {
            Self::Timeout(_) => Some("timeout"),
            Self::InvalidInput(_) => Some("validation"),
            Self::Unsupported(_) => Some("validation"),
            Self::Execution { kind, .. } => kind.as_deref(),
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => "permission",
            std::io::ErrorKind::NotFound | std::io::ErrorKind::InvalidInput => "validation",
            std::io::ErrorKind::TimedOut => "timeout",
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => "network",
            _ => "resource",
        };
        Self::with_kind(err.to_string(), kind)
    }
}
