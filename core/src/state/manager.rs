//! State & recovery manager

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::broadcast;

use super::recovery::{apply_restart, apply_resume, apply_rollback, apply_skip};
use super::snapshot::CheckpointSnapshot;
use super::storage::{checkpoint_key, checkpoint_prefix, plan_key, Storage, PLAN_PREFIX};
use super::types::{PlanRecord, StateEvent};
use crate::context::{Clock, SystemClock};
use crate::error::StateError;

/// Sole writer of persisted plan state and snapshots.
#[derive(Clone)]
pub struct StateManager {
    inner: Arc<StateManagerInner>,
}

struct StateManagerInner {
    storage: Arc<dyn Storage>,
    /// Lease owner id used for every guarded write.
    owner: String,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<StateEvent>,
}

impl StateManager {
    pub fn new(storage: Arc<dyn Storage>, owner: impl Into<String>) -> Self {
        Self::with_clock(storage, owner, Arc::new(SystemClock))
    }

    pub fn with_clock(
        storage: Arc<dyn Storage>,
        owner: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self {
            inner: Arc::new(StateManagerInner {
                storage,
                owner: owner.into(),
                clock,
                event_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.inner.storage.clone()
    }

    fn emit(&self, event: StateEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    /// Write-through save of plan and state under the plan lease.
    pub async fn save(&self, record: &mut PlanRecord) -> Result<(), StateError> {
        record.sync();
        let key = plan_key(record.plan_id());
        let json = serde_json::to_string(record).map_err(|e| StateError::Encode(e.to_string()))?;
        self.inner
            .storage
            .set_if_owner(&key, json, &self.inner.owner)
            .await?;

        tracing::debug!(
            plan_id = %record.plan.id,
            status = ?record.state.status,
            completed = record.state.progress.completed,
            "state saved"
        );
        self.emit(StateEvent::Saved {
            plan_id: record.plan.id.clone(),
            status: record.state.status,
            progress: record.state.progress,
            timestamp: self.inner.clock.now(),
        });
        Ok(())
    }

    pub async fn load(&self, plan_id: &str) -> Result<PlanRecord, StateError> {
        let key = plan_key(plan_id);
        let json = self
            .inner
            .storage
            .get(&key)
            .await?
            .ok_or_else(|| StateError::NotFound(plan_id.to_string()))?;

        match serde_json::from_str::<PlanRecord>(&json) {
            Ok(mut record) => {
                record.apply_state_to_plan();
                Ok(record)
            }
            Err(err) => {
                let last_good_checkpoint = self
                    .list_snapshots(plan_id)
                    .await
                    .ok()
                    .and_then(|snaps| snaps.last().map(|s| s.checkpoint_id.clone()));
                tracing::error!(
                    plan_id,
                    error = %err,
                    last_good_checkpoint = last_good_checkpoint.as_deref().unwrap_or("-"),
                    "persisted state is corrupt"
                );
                Err(StateError::StateCorruption {
                    key,
                    reason: err.to_string(),
                    last_good_checkpoint,
                })
            }
        }
    }

    /// Capture the record under `checkpoint_id` and remember it as the last
    /// checkpoint.
    pub async fn snapshot(
        &self,
        record: &mut PlanRecord,
        checkpoint_id: &str,
    ) -> Result<CheckpointSnapshot, StateError> {
        record.sync();
        let satisfied = record.plan.satisfied_ids();
        let results = record
            .plan
            .results
            .iter()
            .filter(|(id, _)| satisfied.contains(*id))
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        let now = self.inner.clock.now();
        let snapshot = CheckpointSnapshot::new(checkpoint_id, record.state.clone(), results, now);

        let key = checkpoint_key(record.plan_id(), checkpoint_id);
        self.inner.storage.set(&key, snapshot.to_json()?).await?;

        record.state.last_checkpoint_id = Some(checkpoint_id.to_string());
        self.save(record).await?;

        tracing::info!(plan_id = %record.plan.id, checkpoint_id, "snapshot taken");
        self.emit(StateEvent::SnapshotTaken {
            plan_id: record.plan.id.clone(),
            checkpoint_id: checkpoint_id.to_string(),
            timestamp: now,
        });
        Ok(snapshot)
    }

    pub async fn load_snapshot(
        &self,
        plan_id: &str,
        checkpoint_id: &str,
    ) -> Result<CheckpointSnapshot, StateError> {
        let key = checkpoint_key(plan_id, checkpoint_id);
        let json = self
            .inner
            .storage
            .get(&key)
            .await?
            .ok_or_else(|| StateError::SnapshotNotFound {
                plan_id: plan_id.to_string(),
                checkpoint_id: checkpoint_id.to_string(),
            })?;
        CheckpointSnapshot::from_json(&key, &json)
    }

    /// Readable snapshots of the plan, oldest first. Corrupt ones are skipped.
    pub async fn list_snapshots(&self, plan_id: &str) -> Result<Vec<CheckpointSnapshot>, StateError> {
        let mut snapshots = Vec::new();
        for key in self.inner.storage.keys(&checkpoint_prefix(plan_id)).await? {
            let Some(json) = self.inner.storage.get(&key).await? else {
                continue;
            };
            match CheckpointSnapshot::from_json(&key, &json) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) => tracing::warn!(key = %key, error = %err, "skipping unreadable snapshot"),
            }
        }
        snapshots.sort_by_key(|s| s.taken_at);
        Ok(snapshots)
    }

    pub async fn list_plans(&self) -> Result<Vec<String>, StateError> {
        Ok(self
            .inner
            .storage
            .keys(PLAN_PREFIX)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(PLAN_PREFIX).map(str::to_string))
            .collect())
    }

    pub async fn resume(&self, plan_id: &str) -> Result<PlanRecord, StateError> {
        let mut record = self.load(plan_id).await?;
        let from_task = apply_resume(&mut record, self.inner.clock.now())?;
        self.save(&mut record).await?;
        self.emit(StateEvent::Resumed {
            plan_id: plan_id.to_string(),
            from_task,
            timestamp: self.inner.clock.now(),
        });
        Ok(record)
    }

    pub async fn rollback_to_checkpoint(
        &self,
        plan_id: &str,
        checkpoint_id: &str,
    ) -> Result<PlanRecord, StateError> {
        let mut record = self.load(plan_id).await?;
        let snapshot = self.load_snapshot(plan_id, checkpoint_id).await?;
        apply_rollback(&mut record, &snapshot, self.inner.clock.now())?;
        self.save(&mut record).await?;
        self.emit(StateEvent::RolledBack {
            plan_id: plan_id.to_string(),
            checkpoint_id: checkpoint_id.to_string(),
            timestamp: self.inner.clock.now(),
        });
        Ok(record)
    }

    pub async fn skip(&self, plan_id: &str, task_id: &str) -> Result<PlanRecord, StateError> {
        let mut record = self.load(plan_id).await?;
        apply_skip(&mut record, task_id, self.inner.clock.now())?;
        self.save(&mut record).await?;
        self.emit(StateEvent::TaskSkipped {
            plan_id: plan_id.to_string(),
            task_id: task_id.to_string(),
            timestamp: self.inner.clock.now(),
        });
        Ok(record)
    }

    pub async fn restart(&self, plan_id: &str) -> Result<PlanRecord, StateError> {
        let mut record = self.load(plan_id).await?;
        apply_restart(&mut record, self.inner.clock.now())?;
        self.save(&mut record).await?;
        self.emit(StateEvent::Restarted {
            plan_id: plan_id.to_string(),
            timestamp: self.inner.clock.now(),
        });
        Ok(record)
    }

    /// Delete terminal plans (and their snapshots) not touched for `older_than`.
    pub async fn cleanup(&self, older_than: Duration) -> Result<Vec<String>, StateError> {
        let cutoff = self.inner.clock.now() - older_than;
        let mut removed = Vec::new();

        for plan_id in self.list_plans().await? {
            let record = match self.load(&plan_id).await {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(plan_id = %plan_id, error = %err, "cleanup skipped plan");
                    continue;
                }
            };
            if !record.state.status.is_terminal() || record.state.updated_at >= cutoff {
                continue;
            }

            for key in self.inner.storage.keys(&checkpoint_prefix(&plan_id)).await? {
                self.inner.storage.delete(&key).await?;
            }
            self.inner.storage.delete(&plan_key(&plan_id)).await?;

            tracing::info!(plan_id = %plan_id, "plan cleaned up");
            self.emit(StateEvent::CleanedUp {
                plan_id: plan_id.clone(),
                timestamp: self.inner.clock.now(),
            });
            removed.push(plan_id);
        }
        Ok(removed)
    }

    /// Give up this manager's lease on the plan.
    pub async fn release(&self, plan_id: &str) -> Result<bool, StateError> {
        self.release_inner(plan_id, Some(&self.inner.owner)).await
    }

    /// Drop the lease whoever holds it (operator unlock after a crash).
    pub async fn force_release(&self, plan_id: &str) -> Result<bool, StateError> {
        self.release_inner(plan_id, None).await
    }

    async fn release_inner(&self, plan_id: &str, owner: Option<&str>) -> Result<bool, StateError> {
        let released = self
            .inner
            .storage
            .release_owner(&plan_key(plan_id), owner)
            .await?;
        if released {
            self.emit(StateEvent::Released {
                plan_id: plan_id.to_string(),
                forced: owner.is_none(),
                timestamp: self.inner.clock.now(),
            });
        }
        Ok(released)
    }
}
