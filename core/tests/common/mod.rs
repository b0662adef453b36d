#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conductor_core::api::{
    ApprovalDecision, ApprovalHandler, Checkpoint, Collaborators, DecisionService, ErrorCategory,
    ErrorClassification, ExecutionPlan, MemoryStorage, Orchestrator, PlanModifier, PlanSummary,
    RecoveryStrategy, RunContext, Severity, Sleeper, StateManager, Task, ToolError,
    ToolExecutor, ToolOutput, ToolSelection,
};

/// Executor that succeeds unless a failure has been queued for the task.
#[derive(Default)]
pub struct ScriptedExecutor {
    failures: Mutex<HashMap<String, VecDeque<ToolError>>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn fail_next(&self, task_id: &str, err: ToolError) {
        self.failures
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default()
            .push_back(err);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        task: &Task,
        selection: Option<&ToolSelection>,
        _ctx: &RunContext,
    ) -> Result<ToolOutput, ToolError> {
        self.executed.lock().unwrap().push(task.id.clone());
        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&task.id)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(err) => Err(err),
            None => {
                let output = ToolOutput::new(serde_json::json!({ "task": task.id }));
                Ok(match selection {
                    Some(s) => output.with_tool(s.tool.clone()),
                    None => output,
                })
            }
        }
    }
}

/// Classifies by the tool's kind hint; strategies can be pinned per task.
///
/// Tracks how many tasks sit between `classify_error` and
/// `select_recovery_strategy` at once.
#[derive(Default)]
pub struct ScriptedDecision {
    strategies: Mutex<HashMap<String, RecoveryStrategy>>,
    deciding: AtomicUsize,
    max_deciding: AtomicUsize,
}

impl ScriptedDecision {
    pub fn on_failure(&self, task_id: &str, strategy: RecoveryStrategy) {
        self.strategies
            .lock()
            .unwrap()
            .insert(task_id.to_string(), strategy);
    }

    pub fn max_concurrent_decisions(&self) -> usize {
        self.max_deciding.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionService for ScriptedDecision {
    async fn select_tool(&self, task: &Task, _ctx: &RunContext) -> anyhow::Result<ToolSelection> {
        Ok(ToolSelection {
            tool: task.action.clone(),
            confidence: 1.0,
            alternatives: Vec::new(),
        })
    }

    async fn classify_error(&self, _task: &Task, error: &ToolError) -> ErrorClassification {
        let now = self.deciding.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_deciding.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let category = match error.kind_hint() {
            Some("network") => ErrorCategory::Network,
            Some("timeout") => ErrorCategory::Timeout,
            Some("resource") => ErrorCategory::Resource,
            Some("validation") => ErrorCategory::Validation,
            _ => ErrorCategory::Unknown,
        };
        ErrorClassification {
            category,
            severity: Severity::Medium,
            recoverable: category != ErrorCategory::Validation,
        }
    }

    async fn select_recovery_strategy(
        &self,
        task: &Task,
        classification: &ErrorClassification,
        _attempt: u32,
    ) -> RecoveryStrategy {
        self.deciding.fetch_sub(1, Ordering::SeqCst);
        if let Some(pinned) = self.strategies.lock().unwrap().get(&task.id) {
            return pinned.clone();
        }
        match classification.category {
            ErrorCategory::Network | ErrorCategory::Timeout => RecoveryStrategy::Retry { delay_ms: None },
            _ => RecoveryStrategy::Fail {
                reason: format!("{:?}", classification.category),
            },
        }
    }
}

/// Hands out queued decisions, continuing once the queue is empty.
#[derive(Default)]
pub struct ScriptedApproval {
    decisions: Mutex<VecDeque<ApprovalDecision>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedApproval {
    pub fn then(&self, decision: ApprovalDecision) {
        self.decisions.lock().unwrap().push_back(decision);
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApprovalHandler for ScriptedApproval {
    async fn request_approval(
        &self,
        checkpoint: &Checkpoint,
        _plan: &PlanSummary,
    ) -> anyhow::Result<ApprovalDecision> {
        self.seen.lock().unwrap().push(checkpoint.id.clone());
        Ok(self
            .decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(ApprovalDecision::proceed))
    }
}

/// Returns a fixed task list whatever the feedback.
pub struct FixedModifier(pub Vec<Task>);

#[async_trait]
impl PlanModifier for FixedModifier {
    async fn modify(
        &self,
        _plan: &ExecutionPlan,
        _feedback: &str,
        _ctx: &RunContext,
    ) -> anyhow::Result<Vec<Task>> {
        Ok(self.0.clone())
    }
}

/// Records requested waits without sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

/// Cancels the armed orchestrator from inside the wait it is plugged into,
/// like an interrupt landing during a retry backoff or an approval prompt.
#[derive(Default)]
pub struct CancelDuringWait {
    target: Mutex<Option<Orchestrator>>,
}

impl CancelDuringWait {
    pub fn arm(&self, orchestrator: &Orchestrator) {
        *self.target.lock().unwrap() = Some(orchestrator.clone());
    }

    async fn fire(&self) {
        let target = self.target.lock().unwrap().take();
        if let Some(orchestrator) = target {
            orchestrator.cancel().await.unwrap();
        }
    }
}

#[async_trait]
impl Sleeper for CancelDuringWait {
    async fn sleep(&self, _duration: Duration) {
        self.fire().await;
    }
}

#[async_trait]
impl ApprovalHandler for CancelDuringWait {
    async fn request_approval(
        &self,
        _checkpoint: &Checkpoint,
        _plan: &PlanSummary,
    ) -> anyhow::Result<ApprovalDecision> {
        self.fire().await;
        // The operator answers after the interrupt already landed.
        Ok(ApprovalDecision::proceed())
    }
}

pub struct Harness {
    pub executor: Arc<ScriptedExecutor>,
    pub decision: Arc<ScriptedDecision>,
    pub approval: Arc<ScriptedApproval>,
    pub sleeper: Arc<RecordingSleeper>,
    pub storage: Arc<MemoryStorage>,
    pub state: StateManager,
    pub ctx: RunContext,
}

impl Harness {
    pub fn new() -> Self {
        let storage = Arc::new(MemoryStorage::new());
        Self {
            executor: Arc::new(ScriptedExecutor::default()),
            decision: Arc::new(ScriptedDecision::default()),
            approval: Arc::new(ScriptedApproval::default()),
            sleeper: Arc::new(RecordingSleeper::default()),
            state: StateManager::new(storage.clone(), "test-owner"),
            storage,
            ctx: RunContext::new("req-test"),
        }
    }

    pub fn collaborators(&self, modifier: Option<Arc<dyn PlanModifier>>) -> Collaborators {
        Collaborators {
            executor: self.executor.clone(),
            decision: self.decision.clone(),
            approval: self.approval.clone(),
            modifier,
            storage: self.storage.clone(),
        }
    }
}
