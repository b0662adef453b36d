use async_trait::async_trait;
use conductor_core::api::{
    ApprovalDecision, ApprovalHandler, Checkpoint, CheckpointBinding, CheckpointReason,
    PlanSummary,
};
use indicatif::MultiProgress;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Asks the operator on stdin at every checkpoint.
pub struct ConsoleApproval {
    multi: MultiProgress,
}

impl ConsoleApproval {
    pub fn new(multi: MultiProgress) -> Self {
        Self { multi }
    }
}

pub fn describe_checkpoint(checkpoint: &Checkpoint, plan: &PlanSummary) -> String {
    let mut out = String::new();
    let position = match &checkpoint.binding {
        CheckpointBinding::BeforeStart => "before the first task".to_string(),
        CheckpointBinding::EndOfPhase { phase_id, task_id } => {
            format!("after {phase_id} (last task {task_id})")
        }
    };
    out.push_str(&format!(
        "\ncheckpoint {} [{}] {position}\n",
        checkpoint.id, checkpoint.name
    ));
    out.push_str(&format!(
        "  plan {}: {}/{} done, {} failed, {} skipped, risk {:?}\n",
        plan.plan_id, plan.completed, plan.total_tasks, plan.failed, plan.skipped, plan.risk
    ));
    for reason in &checkpoint.reasons {
        match reason {
            CheckpointReason::Explicit => out.push_str("  - requested by the task list\n"),
            CheckpointReason::HighRisk { task_id, reason } => {
                out.push_str(&format!("  - high-risk task {task_id}: {reason}\n"))
            }
        }
    }
    for question in &checkpoint.questions {
        out.push_str(&format!("  ? {question}\n"));
    }
    out
}

/// `c`/`continue`/empty continues, `x`/`cancel` cancels. Anything after the
/// keyword is kept as feedback.
pub fn parse_answer(line: &str) -> Option<ApprovalDecision> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let feedback = Some(rest.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    match word.to_ascii_lowercase().as_str() {
        "" | "c" | "y" | "yes" | "continue" => Some(ApprovalDecision::Continue { feedback }),
        "x" | "n" | "no" | "cancel" => Some(ApprovalDecision::Cancel { reason: feedback }),
        _ => None,
    }
}

fn interrupted() -> ApprovalDecision {
    ApprovalDecision::Cancel {
        reason: Some("interrupted".to_string()),
    }
}

#[async_trait]
impl ApprovalHandler for ConsoleApproval {
    async fn request_approval(
        &self,
        checkpoint: &Checkpoint,
        plan: &PlanSummary,
    ) -> anyhow::Result<ApprovalDecision> {
        let text = describe_checkpoint(checkpoint, plan);
        self.multi.suspend(|| eprint!("{text}"));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            self.multi
                .suspend(|| eprint!("[c]ontinue / cancel [x] (optional note after the choice): "));
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    self.multi.suspend(|| eprintln!());
                    tracing::warn!(checkpoint_id = %checkpoint.id, "interrupted at checkpoint");
                    return Ok(interrupted());
                }
            };
            let Some(line) = line else {
                tracing::warn!(checkpoint_id = %checkpoint.id, "stdin closed at checkpoint");
                return Ok(ApprovalDecision::Cancel {
                    reason: Some("stdin closed".to_string()),
                });
            };
            match parse_answer(&line) {
                Some(decision) => return Ok(decision),
                None => self.multi.suspend(|| eprintln!("unrecognised answer: {}", line.trim())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn answers_map_to_decisions() {
        assert_eq!(parse_answer(""), Some(ApprovalDecision::proceed()));
        assert_eq!(
            parse_answer("c looks good"),
            Some(ApprovalDecision::Continue {
                feedback: Some("looks good".into())
            })
        );
        assert_eq!(
            parse_answer("CANCEL  wrong branch "),
            Some(ApprovalDecision::Cancel {
                reason: Some("wrong branch".into())
            })
        );
        assert_eq!(parse_answer("x"), Some(ApprovalDecision::cancel()));
        assert_eq!(parse_answer("maybe"), None);
    }

    #[test]
    fn interrupt_cancels_with_a_reason() {
        assert_eq!(
            interrupted(),
            ApprovalDecision::Cancel {
                reason: Some("interrupted".into())
            }
        );
    }
}
