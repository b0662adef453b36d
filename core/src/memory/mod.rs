//! Tiered conversational memory.
//!
//! ```text
//! newest turns ─► working (verbatim)
//!              ─► short-term (lightly truncated)
//!              ─► medium-term (truncated + key facts)
//!              ─► long-term (project context, preferences, archived facts, stats)
//! ```

mod extract;
mod helpers;
mod manager;
mod render;
mod types;

pub use extract::FactExtractor;
pub use helpers::estimate_tokens;
pub use manager::ContextManager;
pub use render::render_context;
pub use types::{
    CompressionStage, ContextView, ConversationTurn, LongTermMemory, Message, Retention, Role,
    SessionStats, Tier, TurnView, COMPRESSION_STAGES,
};
