pub mod error;
pub mod event;
pub mod message;
pub mod traits;
pub mod types;

pub use error::{ErrorKind, OrchestratorError, ToolError, ToolErrorKind};
pub use event::{EventDraft, EventType, StreamEvent};
pub use message::{ReasoningContext, ReasoningOutput, RequestedToolCall};
pub use traits::{
    Decision, GovernanceService, PersistenceStore, ReasoningProvider, Summarizer, ToolProvider,
};
pub use types::{
    RateLimit, Session, SessionError, SessionFilter, SessionId, SessionStatus, Step, StepKind,
    ToolCall, ToolCallStatus, ToolOutcome, TrustContext,
};
