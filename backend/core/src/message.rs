use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{SessionId, Step};

/// Bounded input handed to the reasoning collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningContext {
    pub session_id: SessionId,
    pub agent_id: String,
    /// Leading goal entry, always kept verbatim.
    pub goal: String,
    #[serde(default)]
    pub request_context: Option<serde_json::Value>,
    /// Summary standing in for the truncated middle of the history.
    pub summary: Option<String>,
    /// Step indices `[start, end)` covered by `summary`.
    pub summarized_range: Option<(u64, u64)>,
    /// Most recent steps, verbatim, oldest first.
    pub steps: Vec<Step>,
    /// Reasoning iteration this context was built for (1-based).
    pub iteration: u32,
}

impl ReasoningContext {
    pub fn size(&self) -> usize {
        self.goal.len()
            + self.summary.as_ref().map_or(0, String::len)
            + self.steps.iter().map(Step::size).sum::<usize>()
    }
}

/// Parsed output of one reasoning call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReasoningOutput {
    FinalAnswer {
        output: String,
    },
    ToolCalls {
        #[serde(default)]
        thought: Option<String>,
        calls: Vec<RequestedToolCall>,
    },
}

impl ReasoningOutput {
    pub fn final_answer(output: impl Into<String>) -> Self {
        Self::FinalAnswer {
            output: output.into(),
        }
    }

    pub fn tool_calls(calls: Vec<RequestedToolCall>) -> Self {
        Self::ToolCalls {
            thought: None,
            calls,
        }
    }
}

/// A tool call as requested by the reasoning collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestedToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default = "default_true")]
    pub independent: bool,
}

fn default_true() -> bool {
    true
}

impl RequestedToolCall {
    pub fn new(tool_name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: None,
            tool_name: tool_name.into(),
            arguments,
            independent: true,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn dependent(mut self) -> Self {
        self.independent = false;
        self
    }

    pub fn call_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_final_answer() {
        let out: ReasoningOutput =
            serde_json::from_str(r#"{"type": "final_answer", "output": "done"}"#).unwrap();
        assert_eq!(out, ReasoningOutput::final_answer("done"));
    }

    #[test]
    fn test_parse_tool_calls_defaults_to_independent() {
        let out: ReasoningOutput = serde_json::from_str(
            r#"{"type": "tool_calls", "calls": [
                {"tool_name": "search", "arguments": {"q": "rust"}},
                {"id": "c2", "tool_name": "fetch", "independent": false}
            ]}"#,
        )
        .unwrap();
        let ReasoningOutput::ToolCalls { thought, calls } = out else {
            panic!("expected tool calls");
        };
        assert!(thought.is_none());
        assert!(calls[0].independent);
        assert!(!calls[1].independent);
        assert_eq!(calls[1].call_id(), "c2");
        assert!(calls[0].call_id().starts_with("call_"));
    }
}
