use async_trait::async_trait;
use conductor_core::api::{ApprovalDecision, ApprovalHandler, Checkpoint, PlanSummary};

/// Continues through every checkpoint.
pub struct AutoApproval;

#[async_trait]
impl ApprovalHandler for AutoApproval {
    async fn request_approval(
        &self,
        checkpoint: &Checkpoint,
        plan: &PlanSummary,
    ) -> anyhow::Result<ApprovalDecision> {
        tracing::info!(
            plan_id = %plan.plan_id,
            checkpoint_id = %checkpoint.id,
            "checkpoint auto-approved"
        );
        Ok(ApprovalDecision::Continue {
            feedback: Some("auto-approved".to_string()),
        })
    }
}

/// Cancels at the first checkpoint. Used when no interactive surface exists
/// and auto approval is off.
pub struct DenyApproval;

#[async_trait]
impl ApprovalHandler for DenyApproval {
    async fn request_approval(
        &self,
        checkpoint: &Checkpoint,
        plan: &PlanSummary,
    ) -> anyhow::Result<ApprovalDecision> {
        tracing::warn!(
            plan_id = %plan.plan_id,
            checkpoint_id = %checkpoint.id,
            "checkpoint reached without an approval surface"
        );
        Ok(ApprovalDecision::Cancel {
            reason: Some(format!(
                "checkpoint '{}' needs approval; rerun with auto approval or interactively",
                checkpoint.id
            )),
        })
    }
}
