use serde::{Deserialize, Serialize};

use crate::types::StepKind;

/// One unit delivered to stream subscribers.
///
/// Wire shape: `{sequence, type, data, terminal}`. Sequence numbers are
/// per-session, start at 1 and never skip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    pub sequence: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: serde_json::Value,
    pub terminal: bool,
}

impl StreamEvent {
    /// Approximate in-memory footprint, used for subscriber buffer accounting.
    pub fn size_hint(&self) -> usize {
        self.data.to_string().len() + 32
    }
}

/// Categories of stream events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Message,
    ToolCall,
    ToolResult,
    Step,
    Error,
    Done,
}

impl EventType {
    /// `done` and `error` close the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn for_step(kind: StepKind) -> Self {
        match kind {
            StepKind::Reasoning => Self::Step,
            StepKind::ToolCall => Self::ToolCall,
            StepKind::ToolResult => Self::ToolResult,
            StepKind::Message => Self::Message,
            StepKind::Error => Self::Error,
            StepKind::Done => Self::Done,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", s)
    }
}

/// An event before the log has assigned it a sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub event_type: EventType,
    pub data: serde_json::Value,
}

impl EventDraft {
    pub fn new(event_type: EventType, data: serde_json::Value) -> Self {
        Self { event_type, data }
    }

    pub fn into_event(self, sequence: u64) -> StreamEvent {
        StreamEvent {
            sequence,
            terminal: self.event_type.is_terminal(),
            event_type: self.event_type,
            data: self.data,
        }
    }
}
