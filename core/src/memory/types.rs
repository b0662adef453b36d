use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// One exchange in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Position in the conversation, starting at 1.
    pub index: u64,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub plan_id: Option<String>,
    pub tokens: usize,
    #[serde(default)]
    pub key_facts: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Working,
    ShortTerm,
    MediumTerm,
    LongTerm,
}

/// Aggregate statistics kept in long-term memory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub turns: u64,
    pub tokens: u64,
    pub plans: BTreeSet<String>,
}

/// Session-level memory: survives every compression stage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LongTermMemory {
    #[serde(default)]
    pub project_context: Option<String>,
    #[serde(default)]
    pub preferences: Vec<String>,
    /// Key facts of turns that aged out of the medium-term window.
    #[serde(default)]
    pub archived_facts: Vec<String>,
    #[serde(default)]
    pub stats: SessionStats,
}

/// Per-tier retained share of the original content, in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Retention {
    pub short: f64,
    pub medium: f64,
    pub long: f64,
    pub drop_medium: bool,
}

/// One escalating compression step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompressionStage {
    Medium(f64),
    Short(f64),
    DropMedium,
    Long(f64),
}

/// Stages applied in order until the budget is met.
pub const COMPRESSION_STAGES: [CompressionStage; 6] = [
    CompressionStage::Medium(0.5),
    CompressionStage::Short(0.7),
    CompressionStage::Medium(0.3),
    CompressionStage::Short(0.5),
    CompressionStage::DropMedium,
    CompressionStage::Long(0.5),
];

impl CompressionStage {
    /// Retention after this stage; ratios only ever go down.
    pub fn apply(self, r: Retention) -> Retention {
        match self {
            Self::Medium(ratio) => Retention {
                medium: r.medium.min(ratio),
                ..r
            },
            Self::Short(ratio) => Retention {
                short: r.short.min(ratio),
                ..r
            },
            Self::DropMedium => Retention {
                drop_medium: true,
                ..r
            },
            Self::Long(ratio) => Retention {
                long: r.long.min(ratio),
                ..r
            },
        }
    }
}

/// A turn as it appears in a view, already compressed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnView {
    pub index: u64,
    pub tier: Tier,
    pub messages: Vec<Message>,
    pub key_facts: Vec<String>,
}

/// Rendered, budget-checked context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextView {
    pub working: Vec<TurnView>,
    pub short_term: Vec<TurnView>,
    pub medium_term: Vec<TurnView>,
    pub long_term: LongTermMemory,
    /// Number of compression stages applied (0 = none).
    pub stages_applied: usize,
    pub tokens: usize,
    pub within_budget: bool,
    pub text: String,
}
