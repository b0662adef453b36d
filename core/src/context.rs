use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::config::AppConfig;
use crate::memory::ContextView;
use crate::orchestrator::{ApprovalHandler, DecisionService, PlanModifier, ToolExecutor};
use crate::state::Storage;

/// Source of "now" for every timestamp the engine writes.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by tests and dry runs.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|e| *e.into_inner())
    }
}

/// Immutable per-run context threaded through builders, the orchestrator
/// and every collaborator call.
#[derive(Clone)]
pub struct RunContext {
    request_id: String,
    user: Option<String>,
    clock: Arc<dyn Clock>,
    labels: BTreeMap<String, String>,
    /// Compressed conversation the run was started from, if any.
    conversation: Option<Arc<ContextView>>,
}

impl RunContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            user: None,
            clock: Arc::new(SystemClock),
            labels: BTreeMap::new(),
            conversation: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_conversation(mut self, view: ContextView) -> Self {
        self.conversation = Some(Arc::new(view));
        self
    }

    pub fn conversation(&self) -> Option<&ContextView> {
        self.conversation.as_deref()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("request_id", &self.request_id)
            .field("user", &self.user)
            .field("labels", &self.labels)
            .field(
                "conversation_tokens",
                &self.conversation.as_ref().map(|v| v.tokens),
            )
            .finish_non_exhaustive()
    }
}

/// External collaborators the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn ToolExecutor>,
    pub decision: Arc<dyn DecisionService>,
    pub approval: Arc<dyn ApprovalHandler>,
    pub modifier: Option<Arc<dyn PlanModifier>>,
    pub storage: Arc<dyn Storage>,
}

#[async_trait::async_trait]
pub trait CollaboratorsFactory: Send + Sync {
    async fn build(&self, cfg: &AppConfig) -> anyhow::Result<Collaborators>;
}

/// Configuration plus the factory turning it into collaborators.
#[derive(Clone)]
pub struct AppContext {
    cfg: AppConfig,
    factory: Option<Arc<dyn CollaboratorsFactory>>,
}

impl AppContext {
    pub fn new(cfg: AppConfig, factory: Option<Arc<dyn CollaboratorsFactory>>) -> Self {
        Self { cfg, factory }
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn with_config(&self, cfg: AppConfig) -> Self {
        Self {
            cfg,
            factory: self.factory.clone(),
        }
    }

    pub async fn build_collaborators(&self) -> anyhow::Result<Collaborators> {
        let Some(factory) = self.factory.as_ref() else {
            anyhow::bail!("collaborators factory missing (cannot build executor/storage)");
        };
        factory.build(&self.cfg).await
    }
}
