//! Telemetry and structured logging components for Stepforge.
//!
//! Handles log redaction, console and NDJSON file output, and the session step audit log.

pub mod logger;
pub mod redact;
pub mod step_logger;

pub use logger::init_logger;
pub use redact::redact_sensitive_data;
pub use step_logger::{StepAuditLogger, StepLogEntry};
