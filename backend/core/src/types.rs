use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, OrchestratorError};

pub type SessionId = Uuid;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    /// pending -> running -> terminal, nothing else.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        match self {
            Self::Pending => next == Self::Running,
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timed_out" => Ok(Self::TimedOut),
            other => Err(OrchestratorError::Validation(format!(
                "unknown session status '{other}'"
            ))),
        }
    }
}

/// Rate limit granted to a caller by the governance collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimit {
    /// Max tool calls allowed per window.
    pub max_calls: u32,
    pub window_secs: u64,
}

/// Caller privileges, fixed for the lifetime of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TrustContext {
    pub trust_tier: String,
    #[serde(default)]
    pub allowed_capabilities: Vec<String>,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
}

impl TrustContext {
    pub fn new(trust_tier: impl Into<String>) -> Self {
        Self {
            trust_tier: trust_tier.into(),
            allowed_capabilities: Vec::new(),
            rate_limit: None,
        }
    }

    pub fn allow(mut self, capability: impl Into<String>) -> Self {
        self.allowed_capabilities.push(capability.into());
        self
    }

    pub fn with_rate_limit(mut self, max_calls: u32, window_secs: u64) -> Self {
        self.rate_limit = Some(RateLimit {
            max_calls,
            window_secs,
        });
        self
    }
}

/// Session-level failure recorded on a terminal session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&OrchestratorError> for SessionError {
    fn from(err: &OrchestratorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// One end-to-end agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub agent_id: String,
    pub goal: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub error: Option<SessionError>,
    /// Index of the last appended step, if any.
    pub current_step: Option<u64>,
    pub cancel_requested: bool,
    /// Wall-clock rendering of the session deadline; enforcement uses a monotonic clock.
    pub deadline: Option<DateTime<Utc>>,
    pub trust: TrustContext,
}

impl Session {
    pub fn new(
        agent_id: impl Into<String>,
        goal: impl Into<String>,
        context: Option<serde_json::Value>,
        trust: TrustContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            goal: goal.into(),
            context,
            status: SessionStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            output: None,
            error: None,
            current_step: None,
            cancel_requested: false,
            deadline: None,
            trust,
        }
    }

    /// Apply a status transition, stamping start/end times.
    pub fn transition(&mut self, next: SessionStatus) -> Result<(), OrchestratorError> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestratorError::Conflict(format!(
                "session {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        let now = Utc::now();
        match next {
            SessionStatus::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.ended_at = Some(now),
            _ => {}
        }
        self.status = next;
        Ok(())
    }
}

/// Kinds of durable scheduler records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Reasoning,
    ToolCall,
    ToolResult,
    Message,
    Error,
    Done,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Message => "message",
            Self::Error => "error",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable record of scheduler activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub session_id: SessionId,
    pub index: u64,
    pub kind: StepKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Step {
    pub fn new(session_id: SessionId, index: u64, kind: StepKind, payload: serde_json::Value) -> Self {
        Self {
            session_id,
            index,
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Serialized payload size in bytes; the unit of the context budget.
    pub fn size(&self) -> usize {
        self.payload.to_string().len() + self.kind.as_str().len()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl ToolCallStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

/// Result or error of a resolved tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { value: serde_json::Value },
    Error { kind: ErrorKind, message: String },
}

/// One dispatched invocation of an external capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub batch_id: Uuid,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    /// Declared by the reasoning output; dependent calls run one at a time.
    pub independent: bool,
    pub status: ToolCallStatus,
    pub outcome: Option<ToolOutcome>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub attempts: u32,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        batch_id: Uuid,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        independent: bool,
    ) -> Self {
        Self {
            id: id.into(),
            batch_id,
            tool_name: tool_name.into(),
            arguments,
            independent,
            status: ToolCallStatus::Queued,
            outcome: None,
            started_at: None,
            duration_ms: None,
            attempts: 0,
        }
    }

    pub fn succeed(&mut self, value: serde_json::Value) {
        self.status = ToolCallStatus::Succeeded;
        self.outcome = Some(ToolOutcome::Success { value });
    }

    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.status = ToolCallStatus::Failed;
        self.outcome = Some(ToolOutcome::Error {
            kind,
            message: message.into(),
        });
    }

    pub fn time_out(&mut self, message: impl Into<String>) {
        self.status = ToolCallStatus::TimedOut;
        self.outcome = Some(ToolOutcome::Error {
            kind: ErrorKind::Timeout,
            message: message.into(),
        });
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            Some(ToolOutcome::Error { kind, .. }) => Some(*kind),
            _ => None,
        }
    }
}

/// Query filter for listing sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub agent_id: Option<String>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use SessionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Running.can_transition_to(TimedOut));
        assert!(!Running.can_transition_to(Pending));
        for terminal in [Completed, Failed, Cancelled, TimedOut] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Running));
            assert!(!terminal.can_transition_to(Failed));
        }
    }

    #[test]
    fn test_session_transition_stamps_times() {
        let mut session = Session::new("agent-1", "no-op", None, TrustContext::new("basic"));
        assert!(session.started_at.is_none());
        session.transition(SessionStatus::Running).unwrap();
        assert!(session.started_at.is_some());
        session.transition(SessionStatus::Completed).unwrap();
        assert!(session.ended_at.is_some());

        let err = session.transition(SessionStatus::Failed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("timed_out".parse::<SessionStatus>().unwrap(), SessionStatus::TimedOut);
        assert!("exploded".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_tool_call_resolution() {
        let mut call = ToolCall::new("c1", Uuid::new_v4(), "search", serde_json::json!({}), true);
        assert_eq!(call.status, ToolCallStatus::Queued);
        assert!(!call.status.is_resolved());

        call.fail(ErrorKind::ToolFatal, "bad query");
        assert!(call.status.is_resolved());
        assert_eq!(call.error_kind(), Some(ErrorKind::ToolFatal));

        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["outcome"]["outcome"], "error");
        assert_eq!(json["outcome"]["kind"], "tool_fatal_error");
    }

    #[test]
    fn test_trust_context_builder() {
        let trust = TrustContext::new("verified")
            .allow("tool:*")
            .with_rate_limit(10, 60);
        assert_eq!(trust.allowed_capabilities, vec!["tool:*".to_string()]);
        assert_eq!(trust.rate_limit.unwrap().max_calls, 10);
    }
}
