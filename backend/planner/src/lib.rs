//! Reasoning collaborators for Stepforge sessions.

pub mod providers;

pub use providers::{EchoReasoning, HttpReasoningProvider};
#[cfg(any(test, feature = "testing"))]
pub use providers::ScriptedReasoning;
