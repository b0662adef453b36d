use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex};

use super::events::OrchestratorEvent;
use super::traits::{ApprovalDecision, ErrorClassification, RecoveryStrategy, ToolSelection};
use crate::config::{AppConfig, RetryConfig};
use crate::context::{Collaborators, RunContext};
use crate::error::{OrchestratorError, StateError, ToolError};
use crate::executor::{
    compute_batches, execute_batch_parallel, Sleeper, TokioSleeper, MIN_RETRY_DELAY,
};
use crate::plan::{Checkpoint, ExecutionPlan, PlanBuilder, PlanStatus, PlanSummary};
use crate::state::{apply_rollback, PlanRecord, StateManager};
use crate::task::{Task, TaskResult, TaskStatus, TaskType, TransitionCause};

/// Why `drive` stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum DriveOutcome {
    Completed,
    Cancelled,
    Failed {
        task_id: Option<String>,
        reason: String,
    },
    /// Paused at a checkpoint; call `resolve_checkpoint` to go on.
    AwaitingApproval(Checkpoint),
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_parallel: usize,
    /// Rollbacks allowed over the life of a plan.
    pub max_recovery_attempts: u32,
    pub retry: RetryConfig,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_parallel: num_cpus::get(),
            max_recovery_attempts: 10,
            retry: RetryConfig::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_parallel: cfg.orchestrator.max_parallel.max(1),
            max_recovery_attempts: cfg.orchestrator.max_recovery_attempts,
            retry: cfg.retry.clone(),
        }
    }
}

/// Terminal result of one task inside a batch.
#[derive(Debug)]
enum TaskOutcome {
    Completed,
    Skipped,
    /// The plan left `executing` before the attempt started; the task stays pending.
    NotDispatched,
    Failed { task_id: String, reason: String },
    RollbackRequested { task_id: String, checkpoint_id: String },
}

enum PhaseOutcome {
    Done,
    Interrupted,
    Aborted { task_id: String, reason: String },
}

/// Drives one plan to a terminal status.
///
/// `drive` runs batches until an external event is needed and reports why
/// it stopped; `resolve_checkpoint` feeds the event back in. `run` loops the
/// two with the approval collaborator.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    record: Mutex<PlanRecord>,
    state: StateManager,
    collaborators: Collaborators,
    builder: PlanBuilder,
    sleeper: Arc<dyn Sleeper>,
    ctx: RunContext,
    settings: OrchestratorSettings,
    /// Serialises recovery decisions of concurrently failing tasks.
    recovery_lock: Mutex<()>,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

pub struct OrchestratorBuilder {
    record: PlanRecord,
    state: StateManager,
    collaborators: Collaborators,
    ctx: RunContext,
    builder: PlanBuilder,
    sleeper: Arc<dyn Sleeper>,
    settings: OrchestratorSettings,
}

impl OrchestratorBuilder {
    pub fn plan_builder(mut self, builder: PlanBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Orchestrator {
        let (event_tx, _) = broadcast::channel(1024);
        Orchestrator {
            inner: Arc::new(OrchestratorInner {
                record: Mutex::new(self.record),
                state: self.state,
                collaborators: self.collaborators,
                builder: self.builder,
                sleeper: self.sleeper,
                ctx: self.ctx,
                settings: self.settings,
                recovery_lock: Mutex::new(()),
                event_tx,
            }),
        }
    }
}

impl Orchestrator {
    pub fn builder(
        plan: ExecutionPlan,
        state: StateManager,
        collaborators: Collaborators,
        ctx: RunContext,
    ) -> OrchestratorBuilder {
        Self::for_record(PlanRecord::new(plan), state, collaborators, ctx)
    }

    /// Continue a plan loaded from storage (after `resume` or `rollback`).
    pub fn for_record(
        record: PlanRecord,
        state: StateManager,
        collaborators: Collaborators,
        ctx: RunContext,
    ) -> OrchestratorBuilder {
        let builder = PlanBuilder::new()
            .with_supported_types(collaborators.executor.supported_types());
        OrchestratorBuilder {
            record,
            state,
            collaborators,
            ctx,
            builder,
            sleeper: Arc::new(TokioSleeper),
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.event_tx.subscribe()
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    pub async fn plan_id(&self) -> String {
        self.inner.record.lock().await.plan.id.clone()
    }

    pub async fn summary(&self) -> PlanSummary {
        self.inner.record.lock().await.plan.summary()
    }

    pub async fn record(&self) -> PlanRecord {
        self.inner.record.lock().await.clone()
    }

    /// Run to a terminal outcome, asking the approval collaborator at every
    /// checkpoint.
    pub async fn run(&self) -> Result<DriveOutcome, OrchestratorError> {
        loop {
            match self.drive().await? {
                DriveOutcome::AwaitingApproval(checkpoint) => {
                    let summary = self.summary().await;
                    let decision = self
                        .inner
                        .collaborators
                        .approval
                        .request_approval(&checkpoint, &summary)
                        .await?;
                    match self.resolve_checkpoint(decision).await {
                        Ok(()) => {}
                        // Cancelled while the operator was deciding; `drive` reports it.
                        Err(OrchestratorError::InvalidPlanState {
                            status: PlanStatus::Cancelled,
                            ..
                        }) => {}
                        Err(err) => return Err(err),
                    }
                }
                outcome => return Ok(outcome),
            }
        }
    }

    /// Advance the plan until it finishes or needs a checkpoint decision.
    pub async fn drive(&self) -> Result<DriveOutcome, OrchestratorError> {
        loop {
            if let Some(outcome) = self.prepare().await? {
                return Ok(outcome);
            }

            let next_phase = {
                let rec = self.inner.record.lock().await;
                rec.plan
                    .phases
                    .iter()
                    .find(|p| {
                        p.task_ids.iter().any(|id| {
                            !rec.plan
                                .status_of(id)
                                .is_some_and(TaskStatus::satisfies_dependents)
                        })
                    })
                    .map(|p| p.id.clone())
            };

            let Some(phase_id) = next_phase else {
                return self.finish().await;
            };

            match self.run_phase(&phase_id).await? {
                PhaseOutcome::Done | PhaseOutcome::Interrupted => continue,
                PhaseOutcome::Aborted { task_id, reason } => {
                    return self.abort(Some(task_id), reason).await;
                }
            }
        }
    }

    /// Bring the plan into `executing`, or report why it cannot run now.
    async fn prepare(&self) -> Result<Option<DriveOutcome>, OrchestratorError> {
        let mut rec = self.inner.record.lock().await;
        let now = self.inner.ctx.now();

        match rec.plan.status {
            PlanStatus::Completed => return Ok(Some(DriveOutcome::Completed)),
            PlanStatus::Cancelled => return Ok(Some(DriveOutcome::Cancelled)),
            PlanStatus::Failed => {
                let task_id = rec.state.resume_from_task.clone();
                let reason = task_id
                    .as_deref()
                    .and_then(|id| rec.plan.task(id))
                    .and_then(|t| t.error.clone())
                    .unwrap_or_else(|| "plan failed".to_string());
                return Ok(Some(DriveOutcome::Failed { task_id, reason }));
            }
            PlanStatus::Pending => {
                rec.plan
                    .transition_to(PlanStatus::Approved, TransitionCause::Advance, now)?;
                rec.plan
                    .transition_to(PlanStatus::Executing, TransitionCause::Advance, now)?;
                self.inner.state.save(&mut rec).await?;
                tracing::info!(
                    plan_id = %rec.plan.id,
                    tasks = rec.plan.tasks.len(),
                    request_id = self.inner.ctx.request_id(),
                    "plan execution started"
                );
                self.emit(OrchestratorEvent::PlanStarted {
                    plan_id: rec.plan.id.clone(),
                    total_tasks: rec.plan.tasks.len(),
                });
            }
            PlanStatus::Approved => {
                rec.plan
                    .transition_to(PlanStatus::Executing, TransitionCause::Advance, now)?;
                self.inner.state.save(&mut rec).await?;
            }
            PlanStatus::Paused => {
                if let Some(checkpoint) = rec.plan.due_checkpoint().cloned() {
                    return Ok(Some(DriveOutcome::AwaitingApproval(checkpoint)));
                }
                rec.plan
                    .transition_to(PlanStatus::Executing, TransitionCause::Advance, now)?;
                self.inner.state.save(&mut rec).await?;
            }
            PlanStatus::Executing => {}
        }

        let Some(checkpoint) = rec.plan.due_checkpoint().cloned() else {
            return Ok(None);
        };

        rec.plan
            .transition_to(PlanStatus::Paused, TransitionCause::Advance, now)?;
        self.inner.state.snapshot(&mut rec, &checkpoint.id).await?;
        tracing::info!(
            plan_id = %rec.plan.id,
            checkpoint_id = %checkpoint.id,
            questions = checkpoint.questions.len(),
            "paused at checkpoint"
        );
        self.emit(OrchestratorEvent::CheckpointReached {
            plan_id: rec.plan.id.clone(),
            checkpoint_id: checkpoint.id.clone(),
        });
        Ok(Some(DriveOutcome::AwaitingApproval(checkpoint)))
    }

    async fn finish(&self) -> Result<DriveOutcome, OrchestratorError> {
        let mut rec = self.inner.record.lock().await;
        let now = self.inner.ctx.now();
        rec.plan
            .transition_to(PlanStatus::Completed, TransitionCause::Advance, now)?;
        rec.plan.current_task_id = None;
        self.inner.state.save(&mut rec).await?;

        tracing::info!(
            plan_id = %rec.plan.id,
            completed = rec.plan.count(TaskStatus::Completed),
            skipped = rec.plan.count(TaskStatus::Skipped),
            "plan completed"
        );
        self.emit(OrchestratorEvent::PlanFinished {
            plan_id: rec.plan.id.clone(),
            status: PlanStatus::Completed,
        });
        Ok(DriveOutcome::Completed)
    }

    async fn abort(
        &self,
        task_id: Option<String>,
        reason: String,
    ) -> Result<DriveOutcome, OrchestratorError> {
        let mut rec = self.inner.record.lock().await;
        if rec.plan.status == PlanStatus::Cancelled {
            return Ok(DriveOutcome::Cancelled);
        }
        let now = self.inner.ctx.now();
        rec.plan
            .transition_to(PlanStatus::Failed, TransitionCause::Advance, now)?;
        rec.plan.current_task_id = None;
        rec.state.resume_from_task = task_id.clone();
        self.inner.state.save(&mut rec).await?;

        tracing::error!(
            plan_id = %rec.plan.id,
            task_id = task_id.as_deref().unwrap_or("-"),
            reason = %reason,
            "plan aborted"
        );
        self.emit(OrchestratorEvent::PlanFinished {
            plan_id: rec.plan.id.clone(),
            status: PlanStatus::Failed,
        });
        Ok(DriveOutcome::Failed { task_id, reason })
    }

    async fn run_phase(&self, phase_id: &str) -> Result<PhaseOutcome, OrchestratorError> {
        let (plan_id, batches) = {
            let rec = self.inner.record.lock().await;
            let plan = &rec.plan;
            let satisfied = plan.satisfied_ids();
            let open: Vec<String> = plan
                .phase(phase_id)
                .map(|p| {
                    p.task_ids
                        .iter()
                        .filter(|id| !satisfied.contains(*id))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            let batches = compute_batches(&open, |id| plan.graph.dependencies(id), &satisfied)?;
            (plan.id.clone(), batches)
        };

        for batch in batches {
            if self.inner.record.lock().await.plan.status != PlanStatus::Executing {
                return Ok(PhaseOutcome::Interrupted);
            }

            tracing::debug!(plan_id = %plan_id, phase_id, tasks = ?batch, "dispatching batch");
            self.emit(OrchestratorEvent::BatchStarted {
                plan_id: plan_id.clone(),
                phase_id: phase_id.to_string(),
                task_ids: batch.clone(),
            });

            let this = self.clone();
            let outcomes = execute_batch_parallel(
                &batch,
                self.inner.settings.max_parallel,
                move |task_id: String| {
                    let this = this.clone();
                    async move { this.run_task(task_id).await }
                },
            )
            .await;

            let mut failure = None;
            let mut rollback = None;
            for outcome in outcomes {
                match outcome? {
                    TaskOutcome::Completed
                    | TaskOutcome::Skipped
                    | TaskOutcome::NotDispatched => {}
                    TaskOutcome::Failed { task_id, reason } => {
                        failure.get_or_insert((task_id, reason));
                    }
                    TaskOutcome::RollbackRequested {
                        task_id,
                        checkpoint_id,
                    } => {
                        rollback.get_or_insert((task_id, checkpoint_id));
                    }
                }
            }

            // Cancelled while the batch ran: the outcomes are already persisted.
            if self.inner.record.lock().await.plan.status != PlanStatus::Executing {
                return Ok(PhaseOutcome::Interrupted);
            }
            if let Some((task_id, reason)) = failure {
                return Ok(PhaseOutcome::Aborted { task_id, reason });
            }
            if let Some((task_id, checkpoint_id)) = rollback {
                return match self.rollback(&checkpoint_id).await {
                    Ok(()) => Ok(PhaseOutcome::Interrupted),
                    Err(OrchestratorError::State(StateError::SnapshotNotFound { .. })) => {
                        Ok(PhaseOutcome::Aborted {
                            task_id,
                            reason: format!("no snapshot for checkpoint '{checkpoint_id}'"),
                        })
                    }
                    Err(err) => Err(err),
                };
            }
        }

        Ok(PhaseOutcome::Done)
    }

    async fn rollback(&self, checkpoint_id: &str) -> Result<(), OrchestratorError> {
        let mut rec = self.inner.record.lock().await;
        let snapshot = self
            .inner
            .state
            .load_snapshot(&rec.plan.id, checkpoint_id)
            .await?;
        apply_rollback(&mut rec, &snapshot, self.inner.ctx.now())?;
        rec.state.recovery_attempts += 1;
        self.inner.state.save(&mut rec).await?;

        self.emit(OrchestratorEvent::RolledBack {
            plan_id: rec.plan.id.clone(),
            checkpoint_id: checkpoint_id.to_string(),
        });
        Ok(())
    }

    /// Run one task through its attempts until it reaches a terminal outcome.
    async fn run_task(&self, task_id: String) -> Result<TaskOutcome, OrchestratorError> {
        loop {
            let Some(task) = self.start_attempt(&task_id).await? else {
                return Ok(TaskOutcome::NotDispatched);
            };
            let attempt = task.retry_count + 1;
            let started = Instant::now();

            let result = self.execute(&task).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let err = match result {
                Ok((output, tool)) => {
                    self.complete(&task, output, tool, duration_ms, attempt).await?;
                    return Ok(TaskOutcome::Completed);
                }
                Err(err) => err,
            };

            self.fail_attempt(&task_id, &err).await?;

            let guard = self.inner.recovery_lock.lock().await;
            let decision = &self.inner.collaborators.decision;
            let classification = decision.classify_error(&task, &err).await;
            let chosen = decision
                .select_recovery_strategy(&task, &classification, attempt)
                .await;
            let strategy = self.bound_strategy(chosen, &task, &classification).await;

            self.emit(OrchestratorEvent::TaskFailed {
                plan_id: self.plan_id().await,
                task_id: task_id.clone(),
                error: err.to_string(),
                category: Some(classification.category),
            });

            match strategy {
                RecoveryStrategy::Retry { delay_ms } => {
                    let delay = delay_ms
                        .map(|ms| Duration::from_millis(ms).max(MIN_RETRY_DELAY))
                        .unwrap_or_else(|| self.inner.settings.retry.delay(attempt));
                    self.schedule_retry(&task_id, attempt, delay).await?;
                    drop(guard);
                    self.inner.sleeper.sleep(delay).await;
                }
                RecoveryStrategy::Skip => {
                    self.skip_failed(&task_id).await?;
                    return Ok(TaskOutcome::Skipped);
                }
                RecoveryStrategy::Rollback { checkpoint_id } => {
                    let target = match checkpoint_id {
                        Some(id) => Some(id),
                        None => self
                            .inner
                            .record
                            .lock()
                            .await
                            .state
                            .last_checkpoint_id
                            .clone(),
                    };
                    let Some(checkpoint_id) = target else {
                        return Ok(TaskOutcome::Failed {
                            task_id,
                            reason: "rollback requested but no checkpoint was taken".into(),
                        });
                    };
                    tracing::warn!(task_id = %task_id, checkpoint_id = %checkpoint_id, "rollback requested");
                    return Ok(TaskOutcome::RollbackRequested {
                        task_id,
                        checkpoint_id,
                    });
                }
                RecoveryStrategy::Fail { reason } => {
                    tracing::error!(task_id = %task_id, reason = %reason, "task failed without recovery");
                    return Ok(TaskOutcome::Failed { task_id, reason });
                }
            }
        }
    }

    /// Enforce retry limits and the rollback budget on a proposed strategy.
    async fn bound_strategy(
        &self,
        chosen: RecoveryStrategy,
        task: &Task,
        classification: &ErrorClassification,
    ) -> RecoveryStrategy {
        match chosen {
            RecoveryStrategy::Retry { .. } if !task.retryable || !classification.recoverable => {
                RecoveryStrategy::Fail {
                    reason: format!("{:?} error is not retryable", classification.category),
                }
            }
            RecoveryStrategy::Retry { .. } if task.retry_count >= task.max_retries => {
                RecoveryStrategy::Fail {
                    reason: format!("retries exhausted after {} attempts", task.retry_count + 1),
                }
            }
            RecoveryStrategy::Rollback { .. } => {
                let used = self.inner.record.lock().await.state.recovery_attempts;
                if used >= self.inner.settings.max_recovery_attempts {
                    RecoveryStrategy::Fail {
                        reason: format!("recovery budget of {used} rollbacks exhausted"),
                    }
                } else {
                    chosen
                }
            }
            other => other,
        }
    }

    /// Move a pending task to `executing`. Returns `None` when the plan was
    /// cancelled (or otherwise left `executing`) since the batch was dispatched.
    async fn start_attempt(&self, task_id: &str) -> Result<Option<Task>, OrchestratorError> {
        let mut rec = self.inner.record.lock().await;
        if rec.plan.status != PlanStatus::Executing {
            tracing::info!(
                plan_id = %rec.plan.id,
                task_id,
                status = ?rec.plan.status,
                "plan no longer executing, attempt not started"
            );
            return Ok(None);
        }
        let now = self.inner.ctx.now();
        rec.plan
            .transition_task(task_id, TaskStatus::Ready, TransitionCause::Advance, now)?;
        rec.plan
            .transition_task(task_id, TaskStatus::Executing, TransitionCause::Advance, now)?;
        rec.plan.current_task_id = Some(task_id.to_string());
        self.inner.state.save(&mut rec).await?;

        let task = rec
            .plan
            .task(task_id)
            .cloned()
            .ok_or_else(|| StateError::TaskNotFound {
                plan_id: rec.plan.id.clone(),
                task_id: task_id.to_string(),
            })?;
        self.emit(OrchestratorEvent::TaskStarted {
            plan_id: rec.plan.id.clone(),
            task_id: task_id.to_string(),
            attempt: task.retry_count + 1,
        });
        Ok(Some(task))
    }

    async fn execute(
        &self,
        task: &Task,
    ) -> Result<(serde_json::Value, Option<String>), ToolError> {
        let selection: Option<ToolSelection> = if task.task_type == TaskType::ToolCall {
            let selection = self
                .inner
                .collaborators
                .decision
                .select_tool(task, &self.inner.ctx)
                .await
                .map_err(|e| ToolError::Unsupported(format!("tool selection failed: {e}")))?;
            tracing::debug!(
                task_id = %task.id,
                tool = %selection.tool,
                confidence = selection.confidence,
                "tool selected"
            );
            Some(selection)
        } else {
            None
        };

        let executor = &self.inner.collaborators.executor;
        let call = executor.execute(task, selection.as_ref(), &self.inner.ctx);
        let output = match task.timeout_secs {
            Some(secs) => {
                let limit = Duration::from_secs(secs);
                tokio::time::timeout(limit, call)
                    .await
                    .map_err(|_| ToolError::Timeout(limit))??
            }
            None => call.await?,
        };

        let tool = output.tool.or_else(|| selection.map(|s| s.tool));
        Ok((output.output, tool))
    }

    async fn complete(
        &self,
        task: &Task,
        output: serde_json::Value,
        tool: Option<String>,
        duration_ms: u64,
        attempts: u32,
    ) -> Result<(), OrchestratorError> {
        let mut rec = self.inner.record.lock().await;
        let now = self.inner.ctx.now();
        rec.plan
            .transition_task(&task.id, TaskStatus::Completed, TransitionCause::Advance, now)?;
        rec.plan.results.insert(
            task.id.clone(),
            TaskResult {
                task_id: task.id.clone(),
                output,
                duration_ms,
                attempts,
                tool,
                completed_at: now,
            },
        );
        self.inner.state.save(&mut rec).await?;

        tracing::info!(plan_id = %rec.plan.id, task_id = %task.id, duration_ms, attempts, "task completed");
        self.emit(OrchestratorEvent::TaskCompleted {
            plan_id: rec.plan.id.clone(),
            task_id: task.id.clone(),
            duration_ms,
        });
        Ok(())
    }

    async fn fail_attempt(&self, task_id: &str, err: &ToolError) -> Result<(), OrchestratorError> {
        let mut rec = self.inner.record.lock().await;
        let now = self.inner.ctx.now();
        rec.plan
            .transition_task(task_id, TaskStatus::Failed, TransitionCause::Advance, now)?;
        if let Some(task) = rec.plan.task_mut(task_id) {
            task.error = Some(err.to_string());
        }
        self.inner.state.save(&mut rec).await?;
        tracing::warn!(plan_id = %rec.plan.id, task_id, error = %err, "task attempt failed");
        Ok(())
    }

    async fn schedule_retry(
        &self,
        task_id: &str,
        attempt: u32,
        delay: Duration,
    ) -> Result<(), OrchestratorError> {
        let mut rec = self.inner.record.lock().await;
        let now = self.inner.ctx.now();
        rec.plan
            .transition_task(task_id, TaskStatus::Pending, TransitionCause::Retry, now)?;
        if let Some(task) = rec.plan.task_mut(task_id) {
            task.retry_count += 1;
        }
        self.inner.state.save(&mut rec).await?;

        let delay_ms = delay.as_millis() as u64;
        tracing::warn!(plan_id = %rec.plan.id, task_id, attempt, delay_ms, "retrying task");
        self.emit(OrchestratorEvent::TaskRetrying {
            plan_id: rec.plan.id.clone(),
            task_id: task_id.to_string(),
            attempt: attempt + 1,
            delay_ms,
        });
        Ok(())
    }

    async fn skip_failed(&self, task_id: &str) -> Result<(), OrchestratorError> {
        let mut rec = self.inner.record.lock().await;
        let now = self.inner.ctx.now();
        rec.plan
            .transition_task(task_id, TaskStatus::Skipped, TransitionCause::Advance, now)?;
        self.inner.state.save(&mut rec).await?;

        tracing::warn!(plan_id = %rec.plan.id, task_id, "task skipped after failure");
        self.emit(OrchestratorEvent::TaskSkipped {
            plan_id: rec.plan.id.clone(),
            task_id: task_id.to_string(),
        });
        Ok(())
    }

    /// Apply the approval decision for the checkpoint the plan is paused at.
    pub async fn resolve_checkpoint(
        &self,
        decision: ApprovalDecision,
    ) -> Result<(), OrchestratorError> {
        let mut rec = self.inner.record.lock().await;
        let now = self.inner.ctx.now();

        if rec.plan.status != PlanStatus::Paused {
            return Err(OrchestratorError::InvalidPlanState {
                plan_id: rec.plan.id.clone(),
                status: rec.plan.status,
                expected: "paused",
            });
        }
        let checkpoint_id = rec
            .plan
            .due_checkpoint()
            .map(|c| c.id.clone())
            .ok_or_else(|| OrchestratorError::NoPendingCheckpoint(rec.plan.id.clone()))?;

        let (approved, feedback, next) = match &decision {
            ApprovalDecision::Continue { feedback } => {
                (true, feedback.clone(), PlanStatus::Executing)
            }
            ApprovalDecision::Cancel { reason } => (false, reason.clone(), PlanStatus::Cancelled),
            ApprovalDecision::Modify { feedback } => {
                (true, Some(feedback.clone()), PlanStatus::Executing)
            }
        };

        // Work on a copy so a failing modifier leaves the pause untouched.
        let mut next_plan = rec.plan.clone();
        if let Some(checkpoint) = next_plan.checkpoint_mut(&checkpoint_id) {
            checkpoint.approved = Some(approved);
            checkpoint.feedback = feedback;
            checkpoint.resolved_at = Some(now);
        }

        if let ApprovalDecision::Modify { feedback } = &decision {
            let modifier = self
                .inner
                .collaborators
                .modifier
                .as_ref()
                .ok_or(OrchestratorError::ModifierUnavailable)?;
            let tasks = modifier.modify(&next_plan, feedback, &self.inner.ctx).await?;
            let rebuilt = self.inner.builder.rebuild(&next_plan, tasks, &self.inner.ctx)?;
            tracing::info!(
                plan_id = %next_plan.id,
                tasks_before = next_plan.tasks.len(),
                tasks_after = rebuilt.tasks.len(),
                "plan modified at checkpoint"
            );
            next_plan = rebuilt;
        }

        next_plan.transition_to(next, TransitionCause::Advance, now)?;
        rec.plan = next_plan;
        self.inner.state.save(&mut rec).await?;

        tracing::info!(
            plan_id = %rec.plan.id,
            checkpoint_id = %checkpoint_id,
            decision = decision.label(),
            "checkpoint resolved"
        );
        self.emit(OrchestratorEvent::CheckpointResolved {
            plan_id: rec.plan.id.clone(),
            checkpoint_id,
            decision: decision.label().to_string(),
        });
        if next == PlanStatus::Cancelled {
            self.emit(OrchestratorEvent::PlanFinished {
                plan_id: rec.plan.id.clone(),
                status: PlanStatus::Cancelled,
            });
        }
        Ok(())
    }

    /// Stop dispatching new batches. In-flight tasks finish.
    pub async fn cancel(&self) -> Result<(), OrchestratorError> {
        let mut rec = self.inner.record.lock().await;
        let now = self.inner.ctx.now();
        rec.plan
            .transition_to(PlanStatus::Cancelled, TransitionCause::Advance, now)?;
        self.inner.state.save(&mut rec).await?;
        tracing::warn!(plan_id = %rec.plan.id, "plan cancelled");
        self.emit(OrchestratorEvent::PlanFinished {
            plan_id: rec.plan.id.clone(),
            status: PlanStatus::Cancelled,
        });
        Ok(())
    }
}
