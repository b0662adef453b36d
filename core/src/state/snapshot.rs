//! Checkpoint snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::ExecutionState;
use crate::error::StateError;
use crate::task::TaskResult;

const SNAPSHOT_VERSION: &str = "1";

/// Execution state captured when a checkpoint pauses the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    pub plan_id: String,
    pub checkpoint_id: String,
    pub taken_at: DateTime<Utc>,
    pub state: ExecutionState,
    /// Results of the tasks that had finished at snapshot time.
    #[serde(default)]
    pub results: HashMap<String, TaskResult>,
    pub version: String,
}

impl CheckpointSnapshot {
    pub fn new(
        checkpoint_id: impl Into<String>,
        state: ExecutionState,
        results: HashMap<String, TaskResult>,
        taken_at: DateTime<Utc>,
    ) -> Self {
        Self {
            plan_id: state.plan_id.clone(),
            checkpoint_id: checkpoint_id.into(),
            taken_at,
            state,
            results,
            version: SNAPSHOT_VERSION.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, StateError> {
        serde_json::to_string_pretty(self).map_err(|e| StateError::Encode(e.to_string()))
    }

    pub fn from_json(key: &str, json: &str) -> Result<Self, StateError> {
        serde_json::from_str(json).map_err(|e| StateError::StateCorruption {
            key: key.to_string(),
            reason: e.to_string(),
            last_good_checkpoint: None,
        })
    }
}
