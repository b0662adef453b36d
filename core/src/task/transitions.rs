//! Task status transition rules.

use super::types::TaskStatus;

/// Why a transition is requested. Regressions are only legal for some causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    /// Normal forward progress.
    Advance,
    /// Recovery strategy chose to retry a failed task.
    Retry,
    /// In-flight task reset while resuming an interrupted plan.
    Resume,
    /// Rollback to a checkpoint snapshot.
    Rollback,
    /// Whole-plan restart.
    Restart,
}

pub struct TaskTransition;

impl TaskTransition {
    pub fn is_valid(from: TaskStatus, to: TaskStatus, cause: TransitionCause) -> bool {
        use TaskStatus::*;

        if from == to {
            return false;
        }

        match cause {
            TransitionCause::Advance => matches!(
                (from, to),
                (Pending, Ready)
                    | (Ready, Executing)
                    | (Executing, Completed)
                    | (Executing, Failed)
                    // skip recovery or operator skip
                    | (Failed, Skipped)
                    | (Pending, Skipped)
                    | (Ready, Skipped)
            ),
            TransitionCause::Retry => matches!((from, to), (Failed, Pending)),
            TransitionCause::Resume => {
                matches!((from, to), (Ready, Pending) | (Executing, Pending) | (Failed, Pending))
            }
            TransitionCause::Rollback | TransitionCause::Restart => {
                to == Pending && from != Pending
            }
        }
    }

    /// Readable label used in logs and the CLI.
    pub fn describe(status: TaskStatus) -> &'static str {
        match status {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Executing => "executing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn forward_lifecycle_is_valid() {
        assert!(TaskTransition::is_valid(Pending, Ready, TransitionCause::Advance));
        assert!(TaskTransition::is_valid(Ready, Executing, TransitionCause::Advance));
        assert!(TaskTransition::is_valid(Executing, Completed, TransitionCause::Advance));
        assert!(TaskTransition::is_valid(Executing, Failed, TransitionCause::Advance));
        assert!(TaskTransition::is_valid(Failed, Skipped, TransitionCause::Advance));
    }

    #[test]
    fn skipping_states_is_invalid() {
        assert!(!TaskTransition::is_valid(Pending, Executing, TransitionCause::Advance));
        assert!(!TaskTransition::is_valid(Pending, Completed, TransitionCause::Advance));
        assert!(!TaskTransition::is_valid(Completed, Failed, TransitionCause::Advance));
    }

    #[test]
    fn completed_regresses_only_on_rollback_or_restart() {
        assert!(!TaskTransition::is_valid(Completed, Pending, TransitionCause::Advance));
        assert!(!TaskTransition::is_valid(Completed, Pending, TransitionCause::Retry));
        assert!(!TaskTransition::is_valid(Completed, Pending, TransitionCause::Resume));
        assert!(TaskTransition::is_valid(Completed, Pending, TransitionCause::Rollback));
        assert!(TaskTransition::is_valid(Completed, Pending, TransitionCause::Restart));
    }

    #[test]
    fn retry_only_from_failed() {
        assert!(TaskTransition::is_valid(Failed, Pending, TransitionCause::Retry));
        assert!(!TaskTransition::is_valid(Executing, Pending, TransitionCause::Retry));
    }
}
