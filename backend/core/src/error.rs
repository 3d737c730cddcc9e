use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the Stepforge orchestrator.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("permission denied for '{capability}': {reason}")]
    PermissionDenied {
        capability: String,
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("transient tool error: {0}")]
    ToolTransient(String),

    #[error("fatal tool error: {0}")]
    ToolFatal(String),

    #[error("step limit exceeded after {0} reasoning iterations")]
    StepLimitExceeded(u32),

    #[error("session deadline exceeded: {0}")]
    Timeout(String),

    #[error("session cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::ToolTransient(_) => ErrorKind::ToolTransient,
            Self::ToolFatal(_) => ErrorKind::ToolFatal,
            Self::StepLimitExceeded(_) => ErrorKind::StepLimitExceeded,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Storage(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only transient tool failures are ever retried, and only by the dispatcher.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ToolTransient(_))
    }

    pub fn storage(err: impl fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

/// Wire-level error classification carried by `error` stream events and
/// failed tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[serde(rename = "validation_error")]
    Validation,
    PermissionDenied,
    #[serde(rename = "tool_transient_error")]
    ToolTransient,
    #[serde(rename = "tool_fatal_error")]
    ToolFatal,
    StepLimitExceeded,
    Timeout,
    Cancelled,
    NotFound,
    Conflict,
    #[serde(rename = "internal_error")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::PermissionDenied => "permission_denied",
            Self::ToolTransient => "tool_transient_error",
            Self::ToolFatal => "tool_fatal_error",
            Self::StepLimitExceeded => "step_limit_exceeded",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error kinds a tool collaborator may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Network failures, 5xx and similar; eligible for retry.
    Transient,
    /// Validation and other permanent failures.
    Fatal,
    /// The sandbox refused the call.
    PermissionDenied,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::PermissionDenied,
            message: message.into(),
        }
    }

    pub fn error_kind(&self) -> ErrorKind {
        match self.kind {
            ToolErrorKind::Transient => ErrorKind::ToolTransient,
            ToolErrorKind::Fatal => ErrorKind::ToolFatal,
            ToolErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            OrchestratorError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            OrchestratorError::Storage("disk".into()).kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            OrchestratorError::StepLimitExceeded(3).kind(),
            ErrorKind::StepLimitExceeded
        );
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(OrchestratorError::ToolTransient("503".into()).is_retryable());
        assert!(!OrchestratorError::ToolFatal("bad args".into()).is_retryable());
        assert!(!OrchestratorError::Internal("boom".into()).is_retryable());
    }

    #[test]
    fn test_error_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::Validation).unwrap(),
            "\"validation_error\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::ToolFatal).unwrap(),
            "\"tool_fatal_error\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::StepLimitExceeded).unwrap(),
            "\"step_limit_exceeded\""
        );
        assert_eq!(ErrorKind::Internal.to_string(), "internal_error");
    }

    #[test]
    fn test_display() {
        let err = OrchestratorError::PermissionDenied {
            capability: "tool:shell".into(),
            reason: "tier 'basic' may not use shell".into(),
            retry_after: None,
        };
        assert_eq!(
            err.to_string(),
            "permission denied for 'tool:shell': tier 'basic' may not use shell"
        );
    }
}
