//! Session step audit log.
//!
//! Every appended step is mirrored to the `session_steps` tracing target with
//! its payload redacted, so a file layer captures an NDJSON audit trail.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use stepforge_core::{Step, StepKind};

use crate::redact::redact_sensitive_data;

#[derive(Debug, Serialize)]
pub struct StepLogEntry {
    pub session_id: String,
    pub index: u64,
    pub kind: StepKind,
    pub timestamp: DateTime<Utc>,
    pub payload: String,
}

impl StepLogEntry {
    pub fn from_step(step: &Step) -> Self {
        Self {
            session_id: step.session_id.to_string(),
            index: step.index,
            kind: step.kind,
            timestamp: step.timestamp,
            payload: redact_sensitive_data(&step.payload.to_string()),
        }
    }
}

pub struct StepAuditLogger;

impl StepAuditLogger {
    /// Log a persisted step, payload redacted.
    pub fn log_step(step: &Step) {
        let entry = StepLogEntry::from_step(step);
        info!(
            target: "session_steps",
            session_id = %entry.session_id,
            index = entry.index,
            kind = %entry.kind,
            payload = %entry.payload,
            "Session step"
        );
    }
}
