use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::{OrchestratorError, ToolError};
use crate::event::StreamEvent;
use crate::message::{ReasoningContext, ReasoningOutput};
use crate::types::{Session, SessionFilter, SessionId, Step, TrustContext};

/// The external model: one request/response call per reasoning iteration.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    async fn infer(&self, context: &ReasoningContext) -> Result<ReasoningOutput, OrchestratorError>;
}

/// Executes a single named tool. Sandboxing and resource limits live behind this trait.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ToolError>;
}

/// Outcome of a governance check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny {
        reason: String,
        retry_after: Option<Duration>,
    },
}

impl Decision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Trust-tier policy service.
pub trait GovernanceService: Send + Sync {
    fn check(&self, trust: &TrustContext, capability: &str) -> Decision;
}

/// Memory collaborator condensing older steps into text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, steps: &[Step], budget: usize) -> Result<String, OrchestratorError>;
}

/// Durable storage for sessions, steps and stream events.
///
/// Steps are keyed by `(session_id, index)` and events by
/// `(session_id, sequence)`; implementations must reject duplicates.
pub trait PersistenceStore: Send + Sync {
    fn save_session(&self, session: &Session) -> Result<()>;

    fn load_session(&self, id: &SessionId) -> Result<Option<Session>>;

    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>>;

    fn append_step(&self, session_id: &SessionId, step: &Step) -> Result<()>;

    fn load_steps(&self, session_id: &SessionId) -> Result<Vec<Step>>;

    fn append_event(&self, session_id: &SessionId, event: &StreamEvent) -> Result<()>;

    /// Events with `sequence > from_sequence`, ascending.
    fn load_log(&self, session_id: &SessionId, from_sequence: u64) -> Result<Vec<StreamEvent>>;

    /// Highest persisted event, if any.
    fn last_event(&self, session_id: &SessionId) -> Result<Option<StreamEvent>>;
}
