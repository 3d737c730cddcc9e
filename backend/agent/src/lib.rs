//! Stepforge agent sessions
//!
//! The session lifecycle and the step scheduler that drives each session
//! through reasoning, tool batches and finalization, with bounded context,
//! cooperative cancellation and deadlines.

pub mod agent_loop;
pub mod cancellation;
pub mod compaction;
pub mod context_window;
pub mod session_manager;

#[cfg(test)]
mod testing;

pub use agent_loop::{LoopState, Runtime, SchedulerConfig, StepScheduler};
pub use cancellation::{CancelReason, CancellationController};
pub use compaction::ExtractiveSummarizer;
pub use context_window::{ContextAssembler, ContextConfig};
pub use session_manager::{CreateSessionRequest, SessionHandle, SessionManager, SessionManagerConfig};
