use serde::{Deserialize, Serialize};

use super::extract::FactExtractor;
use super::helpers::{estimate_tokens, take_ratio, truncate_ratio};
use super::render::render_context;
use super::types::{
    ContextView, ConversationTurn, LongTermMemory, Message, Retention, Tier, TurnView,
    COMPRESSION_STAGES,
};
use crate::config::ContextConfig;
use crate::context::RunContext;
use crate::error::StateError;
use crate::state::storage::{conversation_key, Storage};

#[derive(Debug, Serialize, Deserialize)]
struct ConversationRecord {
    conversation_id: String,
    turns: Vec<ConversationTurn>,
    long_term: LongTermMemory,
}

/// Bounded conversational memory with staged compression.
///
/// Turns are stored once; tiers are assigned on read by age. Turns older
/// than the medium-term window are folded into long-term memory as facts.
#[derive(Debug, Clone)]
pub struct ContextManager {
    conversation_id: String,
    cfg: ContextConfig,
    turns: Vec<ConversationTurn>,
    long_term: LongTermMemory,
    extractor: FactExtractor,
}

impl ContextManager {
    pub fn new(conversation_id: impl Into<String>, cfg: ContextConfig) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            cfg,
            turns: Vec::new(),
            long_term: LongTermMemory::default(),
            extractor: FactExtractor::default(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn long_term(&self) -> &LongTermMemory {
        &self.long_term
    }

    pub fn set_project_context(&mut self, context: impl Into<String>) {
        self.long_term.project_context = Some(context.into());
    }

    pub fn add_preference(&mut self, preference: impl Into<String>) {
        let preference = preference.into();
        if !self.long_term.preferences.contains(&preference) {
            self.long_term.preferences.push(preference);
        }
    }

    /// Append a turn, extracting its key facts and any stated preferences.
    pub fn record_turn(
        &mut self,
        messages: Vec<Message>,
        plan_id: Option<String>,
        ctx: &RunContext,
    ) -> &ConversationTurn {
        let tokens = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        let key_facts = self.extractor.key_facts(&messages);
        for preference in self.extractor.preferences(&messages) {
            self.add_preference(preference);
        }

        let stats = &mut self.long_term.stats;
        stats.turns += 1;
        stats.tokens += tokens as u64;
        if let Some(plan_id) = &plan_id {
            stats.plans.insert(plan_id.clone());
        }

        let index = stats.turns;
        self.turns.push(ConversationTurn {
            index,
            messages,
            plan_id,
            tokens,
            key_facts,
            timestamp: ctx.now(),
        });
        self.archive_aged_turns();

        tracing::debug!(
            conversation_id = %self.conversation_id,
            turn = index,
            tokens,
            "turn recorded"
        );
        &self.turns[self.turns.len() - 1]
    }

    fn archive_aged_turns(&mut self) {
        let window = self.cfg.medium_term_turns.max(self.cfg.short_term_turns);
        if self.turns.len() <= window {
            return;
        }
        let aged = self.turns.len() - window;
        for turn in self.turns.drain(..aged) {
            for fact in turn.key_facts {
                if !self.long_term.archived_facts.contains(&fact) {
                    self.long_term.archived_facts.push(fact);
                }
            }
        }
    }

    /// Tier of the turn `age` positions back from the newest (0 = newest).
    pub fn tier_of(&self, age: usize) -> Tier {
        if age < self.cfg.working_turns {
            Tier::Working
        } else if age < self.cfg.short_term_turns {
            Tier::ShortTerm
        } else if age < self.cfg.medium_term_turns {
            Tier::MediumTerm
        } else {
            Tier::LongTerm
        }
    }

    fn base_retention(&self) -> Retention {
        Retention {
            short: self.cfg.short_term_retention,
            medium: self.cfg.medium_term_retention,
            long: self.cfg.long_term_retention,
            drop_medium: false,
        }
    }

    /// Context fitted to `budget` tokens, escalating through the compression
    /// stages until it fits or the stages run out.
    pub fn view(&self, budget: usize) -> ContextView {
        let mut retention = self.base_retention();
        let mut view = self.render_with(retention, 0, budget);

        for (i, stage) in COMPRESSION_STAGES.iter().enumerate() {
            if view.within_budget {
                break;
            }
            retention = stage.apply(retention);
            view = self.render_with(retention, i + 1, budget);
        }

        if !view.within_budget {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                budget,
                tokens = view.tokens,
                "context exceeds budget after every compression stage"
            );
        }
        view
    }

    /// View with the configured token budget.
    pub fn default_view(&self) -> ContextView {
        self.view(self.cfg.token_budget)
    }

    fn render_with(&self, r: Retention, stages_applied: usize, budget: usize) -> ContextView {
        let mut working = Vec::new();
        let mut short_term = Vec::new();
        let mut medium_term = Vec::new();

        let newest = self.turns.len();
        for (pos, turn) in self.turns.iter().enumerate() {
            let tier = self.tier_of(newest - pos - 1);
            let (ratio, keep_facts) = match tier {
                Tier::Working => (1.0, false),
                Tier::ShortTerm => (r.short, false),
                Tier::MediumTerm if r.drop_medium => continue,
                Tier::MediumTerm => (r.medium, true),
                Tier::LongTerm => continue,
            };
            let view = TurnView {
                index: turn.index,
                tier,
                messages: turn
                    .messages
                    .iter()
                    .map(|m| Message::new(m.role, truncate_ratio(&m.content, ratio)))
                    .collect(),
                key_facts: if keep_facts {
                    turn.key_facts.clone()
                } else {
                    Vec::new()
                },
            };
            match tier {
                Tier::Working => working.push(view),
                Tier::ShortTerm => short_term.push(view),
                _ => medium_term.push(view),
            }
        }

        let long_term = LongTermMemory {
            project_context: self
                .long_term
                .project_context
                .as_deref()
                .map(|p| truncate_ratio(p, r.long)),
            preferences: self
                .long_term
                .preferences
                .iter()
                .map(|p| truncate_ratio(p, r.long))
                .collect(),
            archived_facts: take_ratio(&self.long_term.archived_facts, r.long),
            stats: self.long_term.stats.clone(),
        };

        let text = render_context(&long_term, &medium_term, &short_term, &working);
        let tokens = estimate_tokens(&text);
        ContextView {
            working,
            short_term,
            medium_term,
            long_term,
            stages_applied,
            tokens,
            within_budget: tokens <= budget,
            text,
        }
    }

    pub async fn save(&self, storage: &dyn Storage) -> Result<(), StateError> {
        let record = ConversationRecord {
            conversation_id: self.conversation_id.clone(),
            turns: self.turns.clone(),
            long_term: self.long_term.clone(),
        };
        let json = serde_json::to_string(&record).map_err(|e| StateError::Encode(e.to_string()))?;
        storage
            .set(&conversation_key(&self.conversation_id), json)
            .await?;
        Ok(())
    }

    pub async fn load(
        storage: &dyn Storage,
        conversation_id: &str,
        cfg: ContextConfig,
    ) -> Result<Option<Self>, StateError> {
        let key = conversation_key(conversation_id);
        let Some(json) = storage.get(&key).await? else {
            return Ok(None);
        };
        let record: ConversationRecord =
            serde_json::from_str(&json).map_err(|e| StateError::StateCorruption {
                key,
                reason: e.to_string(),
                last_good_checkpoint: None,
            })?;
        Ok(Some(Self {
            conversation_id: record.conversation_id,
            cfg,
            turns: record.turns,
            long_term: record.long_term,
            extractor: FactExtractor::default(),
        }))
    }
}
