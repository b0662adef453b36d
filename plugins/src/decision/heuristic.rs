use async_trait::async_trait;
use conductor_core::api::{
    DecisionConfig, DecisionService, ErrorCategory, ErrorClassification, RecoveryStrategy,
    RunContext, Severity, Task, ToolError, ToolSelection,
};
use regex::Regex;

/// Rule-based decision service: classifies by the tool's kind hint, falling
/// back to message patterns, and maps categories to recovery strategies.
pub struct HeuristicDecisionService {
    cfg: DecisionConfig,
    patterns: Vec<(Regex, ErrorCategory)>,
    avoid: Regex,
}

const CONTEXT_TOOL_CONFIDENCE: f64 = 0.7;
const DEFAULT_TOOL_CONFIDENCE: f64 = 0.5;

impl HeuristicDecisionService {
    pub fn new(cfg: DecisionConfig) -> Self {
        let table = [
            (r"(?i)rate.?limit|too many requests|\b429\b", ErrorCategory::RateLimit),
            (r"(?i)timed? ?out|deadline exceeded", ErrorCategory::Timeout),
            (
                r"(?i)unauthori[sz]ed|authentication|invalid token|\b401\b",
                ErrorCategory::Authentication,
            ),
            (
                r"(?i)permission denied|forbidden|access denied|\b403\b",
                ErrorCategory::Permission,
            ),
            (
                r"(?i)connection (?:refused|reset|closed)|network|unreachable|dns|\b50[234]\b",
                ErrorCategory::Network,
            ),
            (
                r"(?i)no space|disk full|out of memory|quota|too many open files",
                ErrorCategory::Resource,
            ),
            (
                r"(?i)invalid|validation|malformed|not found|missing|unsupported|no handler",
                ErrorCategory::Validation,
            ),
        ];
        let patterns = table
            .into_iter()
            .map(|(p, c)| (Regex::new(p).expect("static error pattern"), c))
            .collect();
        Self {
            cfg,
            patterns,
            avoid: Regex::new(r"(?i)\b(never use|do not use|don't use|avoid)\b")
                .expect("static avoid pattern"),
        }
    }

    /// Pick among `candidates` using the preferences of the conversation the
    /// run started from. A preference naming a tool after "never use" or
    /// "avoid" rules it out; any other preference naming it favours it.
    fn preferred_tool(&self, candidates: &[String], ctx: &RunContext) -> Option<(String, f64)> {
        let preferences = &ctx.conversation()?.long_term.preferences;
        if preferences.is_empty() {
            return None;
        }
        let mentions = |text: &str, tool: &str| {
            Regex::new(&format!(r"(?i)(^|[^\w-]){}($|[^\w-])", regex::escape(tool)))
                .map(|re| re.is_match(text))
                .unwrap_or(false)
        };

        let allowed: Vec<&String> = candidates
            .iter()
            .filter(|tool| {
                !preferences
                    .iter()
                    .any(|p| self.avoid.is_match(p) && mentions(p, tool))
            })
            .collect();
        let favoured = allowed.iter().find(|tool| {
            preferences
                .iter()
                .any(|p| !self.avoid.is_match(p) && mentions(p, tool))
        });

        match (favoured, allowed.first()) {
            (Some(tool), _) => Some(((*tool).clone(), CONTEXT_TOOL_CONFIDENCE)),
            // The default was ruled out; fall back to the first allowed one.
            (None, Some(tool)) if *tool != &candidates[0] => {
                Some(((*tool).clone(), DEFAULT_TOOL_CONFIDENCE))
            }
            _ => None,
        }
    }

    fn category_of(&self, error: &ToolError) -> ErrorCategory {
        let hinted = error.kind_hint().and_then(|hint| match hint {
            "network" => Some(ErrorCategory::Network),
            "timeout" => Some(ErrorCategory::Timeout),
            "rate-limit" | "rate_limit" => Some(ErrorCategory::RateLimit),
            "authentication" | "auth" => Some(ErrorCategory::Authentication),
            "permission" => Some(ErrorCategory::Permission),
            "validation" => Some(ErrorCategory::Validation),
            "resource" => Some(ErrorCategory::Resource),
            _ => None,
        });
        if let Some(category) = hinted {
            return category;
        }
        let message = error.to_string();
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(&message))
            .map(|(_, c)| *c)
            .unwrap_or(ErrorCategory::Unknown)
    }
}

impl Default for HeuristicDecisionService {
    fn default() -> Self {
        Self::new(DecisionConfig::default())
    }
}

#[async_trait]
impl DecisionService for HeuristicDecisionService {
    async fn select_tool(&self, task: &Task, ctx: &RunContext) -> anyhow::Result<ToolSelection> {
        let explicit = task
            .parameters
            .get("tool")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty());
        let alternatives: Vec<String> = task
            .parameters
            .get("alternatives")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        if let Some(tool) = explicit {
            return Ok(ToolSelection {
                tool: tool.to_string(),
                confidence: self.cfg.explicit_tool_confidence,
                alternatives,
            });
        }

        let tool = task
            .action
            .split_whitespace()
            .next()
            .ok_or_else(|| anyhow::anyhow!("task '{}' names no tool", task.id))?;

        let mut candidates = vec![tool.to_string()];
        candidates.extend(alternatives.iter().filter(|a| *a != tool).cloned());
        if let Some((chosen, confidence)) = self.preferred_tool(&candidates, ctx) {
            tracing::debug!(task_id = %task.id, tool = %chosen, "tool chosen from conversation preferences");
            return Ok(ToolSelection {
                alternatives: candidates.into_iter().filter(|c| *c != chosen).collect(),
                tool: chosen,
                confidence,
            });
        }

        Ok(ToolSelection {
            tool: tool.to_string(),
            confidence: DEFAULT_TOOL_CONFIDENCE,
            alternatives,
        })
    }

    async fn classify_error(&self, task: &Task, error: &ToolError) -> ErrorClassification {
        let category = self.category_of(error);
        let (severity, recoverable) = match category {
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::RateLimit => {
                (Severity::Medium, true)
            }
            ErrorCategory::Resource => (Severity::High, true),
            ErrorCategory::Authentication | ErrorCategory::Permission => (Severity::Critical, false),
            ErrorCategory::Validation => (Severity::Medium, false),
            ErrorCategory::Unknown => (Severity::Medium, true),
        };
        tracing::debug!(task_id = %task.id, ?category, ?severity, recoverable, "error classified");
        ErrorClassification {
            category,
            severity,
            recoverable,
        }
    }

    async fn select_recovery_strategy(
        &self,
        task: &Task,
        classification: &ErrorClassification,
        attempt: u32,
    ) -> RecoveryStrategy {
        match classification.category {
            ErrorCategory::RateLimit => RecoveryStrategy::Retry {
                delay_ms: Some(self.cfg.rate_limit_delay_ms.saturating_mul(attempt as u64)),
            },
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Unknown
                if attempt <= task.max_retries =>
            {
                RecoveryStrategy::Retry { delay_ms: None }
            }
            ErrorCategory::Resource if self.cfg.rollback_on_resource => {
                RecoveryStrategy::Rollback {
                    checkpoint_id: None,
                }
            }
            ErrorCategory::Validation if self.cfg.skip_on_validation => RecoveryStrategy::Skip,
            category => RecoveryStrategy::Fail {
                reason: format!(
                    "{} error after {attempt} attempt(s)",
                    serde_json::to_value(category)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_else(|| "unknown".to_string())
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::api::TaskType;
    use pretty_assertions::assert_eq;

    fn task() -> Task {
        Task::new("t", "fetch", TaskType::ToolCall, "http_get https://example.com")
    }

    #[tokio::test]
    async fn kind_hint_wins_over_message() {
        let svc = HeuristicDecisionService::default();
        let err = ToolError::with_kind("permission denied", "network");
        let c = svc.classify_error(&task(), &err).await;
        assert_eq!(c.category, ErrorCategory::Network);
        assert!(c.recoverable);
    }

    #[tokio::test]
    async fn message_patterns_classify_unhinted_errors() {
        let svc = HeuristicDecisionService::default();
        let cases = [
            ("HTTP 429 Too Many Requests", ErrorCategory::RateLimit),
            ("request timed out", ErrorCategory::Timeout),
            ("401 Unauthorized", ErrorCategory::Authentication),
            ("connection refused", ErrorCategory::Network),
            ("No space left on device", ErrorCategory::Resource),
            ("malformed payload", ErrorCategory::Validation),
            ("something odd", ErrorCategory::Unknown),
        ];
        for (message, expected) in cases {
            let c = svc
                .classify_error(&task(), &ToolError::execution(message))
                .await;
            assert_eq!(c.category, expected, "{message}");
        }
    }

    #[tokio::test]
    async fn strategies_follow_category() {
        let svc = HeuristicDecisionService::default();
        let t = task();
        let classify = |category, recoverable| ErrorClassification {
            category,
            severity: Severity::Medium,
            recoverable,
        };

        assert_eq!(
            svc.select_recovery_strategy(&t, &classify(ErrorCategory::Network, true), 1)
                .await,
            RecoveryStrategy::Retry { delay_ms: None }
        );
        assert!(matches!(
            svc.select_recovery_strategy(&t, &classify(ErrorCategory::Network, true), 4)
                .await,
            RecoveryStrategy::Fail { .. }
        ));
        assert_eq!(
            svc.select_recovery_strategy(&t, &classify(ErrorCategory::RateLimit, true), 2)
                .await,
            RecoveryStrategy::Retry {
                delay_ms: Some(10_000)
            }
        );
        assert_eq!(
            svc.select_recovery_strategy(&t, &classify(ErrorCategory::Resource, true), 1)
                .await,
            RecoveryStrategy::Rollback {
                checkpoint_id: None
            }
        );
        match svc
            .select_recovery_strategy(&t, &classify(ErrorCategory::Permission, false), 1)
            .await
        {
            RecoveryStrategy::Fail { reason } => assert!(reason.starts_with("permission")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn validation_can_skip() {
        let svc = HeuristicDecisionService::new(DecisionConfig {
            skip_on_validation: true,
            ..DecisionConfig::default()
        });
        let c = ErrorClassification {
            category: ErrorCategory::Validation,
            severity: Severity::Medium,
            recoverable: false,
        };
        assert_eq!(
            svc.select_recovery_strategy(&task(), &c, 1).await,
            RecoveryStrategy::Skip
        );
    }

    fn ctx_with_preferences(text: &str) -> RunContext {
        use conductor_core::api::{ContextConfig, ContextManager, Message};

        let base = RunContext::new("r");
        let mut memory = ContextManager::new("conv", ContextConfig::default());
        memory.record_turn(vec![Message::user(text)], None, &base);
        base.with_conversation(memory.default_view())
    }

    #[tokio::test]
    async fn conversation_preferences_steer_tool_choice() {
        let svc = HeuristicDecisionService::default();
        let t = Task::new("dl", "download", TaskType::ToolCall, "curl https://example.com")
            .with_parameters(serde_json::json!({ "alternatives": ["wget", "aria2c"] }));

        let ctx = ctx_with_preferences("Never use curl on this host. Please use wget for downloads.");
        let s = svc.select_tool(&t, &ctx).await.unwrap();
        assert_eq!(s.tool, "wget");
        assert_eq!(s.confidence, CONTEXT_TOOL_CONFIDENCE);
        assert_eq!(s.alternatives, vec!["curl".to_string(), "aria2c".to_string()]);

        let ctx = ctx_with_preferences("Don't use curl here.");
        let s = svc.select_tool(&t, &ctx).await.unwrap();
        assert_eq!(s.tool, "wget");
        assert_eq!(s.confidence, DEFAULT_TOOL_CONFIDENCE);

        let ctx = ctx_with_preferences("I like short logs.");
        assert_eq!(svc.select_tool(&t, &ctx).await.unwrap().tool, "curl");
        let plain = svc.select_tool(&t, &RunContext::new("r")).await.unwrap();
        assert_eq!(plain.tool, "curl");
        assert_eq!(plain.alternatives, vec!["wget".to_string(), "aria2c".to_string()]);
    }

    #[tokio::test]
    async fn explicit_tool_parameter_is_preferred() {
        let svc = HeuristicDecisionService::default();
        let ctx = RunContext::new("r");
        let t = task().with_parameters(serde_json::json!({
            "tool": "curl",
            "alternatives": ["wget"]
        }));
        let s = svc.select_tool(&t, &ctx).await.unwrap();
        assert_eq!(s.tool, "curl");
        assert_eq!(s.alternatives, vec!["wget".to_string()]);
        assert!(s.confidence > 0.9);

        let fallback = svc.select_tool(&task(), &ctx).await.unwrap();
        assert_eq!(fallback.tool, "http_get");

        let empty = Task::new("e", "e", TaskType::ToolCall, "  ");
        assert!(svc.select_tool(&empty, &ctx).await.is_err());
    }
}
