//! Shared fixtures for scheduler and manager tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use stepforge_core::{
    EventType, PersistenceStore, ReasoningOutput, Session, SessionFilter, SessionId, Step,
    StreamEvent, ToolError, ToolProvider, TrustContext,
};
use stepforge_executor::{DispatcherConfig, ToolDispatcher};
use stepforge_planner::ScriptedReasoning;
use stepforge_security::{CapabilityPolicy, GovernanceFilter};
use stepforge_supervisor::{EventLog, EventLogConfig, SqliteStore};

use crate::agent_loop::Runtime;
use crate::compaction::ExtractiveSummarizer;
use crate::session_manager::{CreateSessionRequest, SessionManager, SessionManagerConfig};

/// `echo` returns its arguments, `fail` is fatal, `refuse` is a provider-side
/// permission denial and `sleep` waits `ms` milliseconds.
pub struct TestTools;

#[async_trait]
impl ToolProvider for TestTools {
    async fn execute(&self, tool_name: &str, arguments: &Value, _timeout: Duration) -> Result<Value, ToolError> {
        match tool_name {
            "echo" => Ok(arguments.clone()),
            "fail" => Err(ToolError::fatal("bad arguments")),
            "refuse" => Err(ToolError::permission_denied("provider refused")),
            "sleep" => {
                let ms = arguments["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({ "slept_ms": ms }))
            }
            other => Err(ToolError::fatal(format!("unknown tool {other}"))),
        }
    }
}

pub struct Harness {
    pub manager: SessionManager,
    pub reasoning: Arc<ScriptedReasoning>,
    pub store: Arc<dyn PersistenceStore>,
}

pub fn harness(script: Vec<ReasoningOutput>, config: SessionManagerConfig) -> Harness {
    harness_with(ScriptedReasoning::new(script), CapabilityPolicy::default(), config)
}

pub fn harness_with(
    reasoning: ScriptedReasoning,
    policy: CapabilityPolicy,
    config: SessionManagerConfig,
) -> Harness {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    harness_on(store, reasoning, policy, config)
}

pub fn harness_on(
    store: Arc<dyn PersistenceStore>,
    reasoning: ScriptedReasoning,
    policy: CapabilityPolicy,
    config: SessionManagerConfig,
) -> Harness {
    let reasoning = Arc::new(reasoning);
    let runtime = Runtime {
        reasoning: reasoning.clone(),
        dispatcher: Arc::new(ToolDispatcher::new(Arc::new(TestTools), DispatcherConfig::default())),
        governance: Arc::new(GovernanceFilter::new(Arc::new(policy))),
        store: store.clone(),
        events: Arc::new(EventLog::new(store.clone(), EventLogConfig::default())),
        summarizer: Arc::new(ExtractiveSummarizer),
    };
    Harness {
        manager: SessionManager::new(runtime, config),
        reasoning,
        store,
    }
}

pub fn trust() -> TrustContext {
    TrustContext::new("basic").allow("agent:*").allow("tool:*")
}

pub fn request(goal: &str) -> CreateSessionRequest {
    CreateSessionRequest {
        agent_id: "researcher".into(),
        goal: goal.into(),
        context: None,
    }
}

/// Every event after `from_sequence`, through the terminal one.
pub async fn events(manager: &SessionManager, id: SessionId, from_sequence: u64) -> Vec<StreamEvent> {
    let mut sub = manager.subscribe(id, from_sequence).unwrap();
    let mut out = Vec::new();
    while let Some(event) = sub.next().await {
        out.push(event.unwrap());
    }
    out
}

pub fn event_types(events: &[StreamEvent]) -> Vec<EventType> {
    events.iter().map(|e| e.event_type).collect()
}

/// SQLite store that runs `on_save` before every session write.
pub struct HookedStore {
    inner: SqliteStore,
    on_save: Box<dyn Fn(&Session) -> anyhow::Result<()> + Send + Sync>,
}

impl HookedStore {
    pub fn new(on_save: impl Fn(&Session) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        Self {
            inner: SqliteStore::in_memory().unwrap(),
            on_save: Box::new(on_save),
        }
    }
}

impl PersistenceStore for HookedStore {
    fn save_session(&self, session: &Session) -> anyhow::Result<()> {
        (self.on_save)(session)?;
        self.inner.save_session(session)
    }

    fn load_session(&self, id: &SessionId) -> anyhow::Result<Option<Session>> {
        self.inner.load_session(id)
    }

    fn list_sessions(&self, filter: &SessionFilter) -> anyhow::Result<Vec<Session>> {
        self.inner.list_sessions(filter)
    }

    fn append_step(&self, session_id: &SessionId, step: &Step) -> anyhow::Result<()> {
        self.inner.append_step(session_id, step)
    }

    fn load_steps(&self, session_id: &SessionId) -> anyhow::Result<Vec<Step>> {
        self.inner.load_steps(session_id)
    }

    fn append_event(&self, session_id: &SessionId, event: &StreamEvent) -> anyhow::Result<()> {
        self.inner.append_event(session_id, event)
    }

    fn load_log(&self, session_id: &SessionId, from_sequence: u64) -> anyhow::Result<Vec<StreamEvent>> {
        self.inner.load_log(session_id, from_sequence)
    }

    fn last_event(&self, session_id: &SessionId) -> anyhow::Result<Option<StreamEvent>> {
        self.inner.last_event(session_id)
    }
}
