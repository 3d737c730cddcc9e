//! Scripted reasoning for tests, behind the `testing` feature.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use stepforge_core::{OrchestratorError, ReasoningContext, ReasoningOutput, ReasoningProvider};

/// Plays back a fixed sequence of outputs, one per call.
///
/// Once the script runs out, the last entry repeats (or, for an empty
/// script, every call fails). Every context it receives is recorded.
pub struct ScriptedReasoning {
    script: Mutex<VecDeque<Result<ReasoningOutput, OrchestratorError>>>,
    last: Mutex<Option<Result<ReasoningOutput, OrchestratorError>>>,
    seen: Mutex<Vec<ReasoningContext>>,
}

impl ScriptedReasoning {
    pub fn new(outputs: impl IntoIterator<Item = ReasoningOutput>) -> Self {
        Self::from_results(outputs.into_iter().map(Ok))
    }

    pub fn from_results(results: impl IntoIterator<Item = Result<ReasoningOutput, OrchestratorError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            last: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Contexts received so far, in call order.
    pub fn contexts(&self) -> Vec<ReasoningContext> {
        self.seen.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedReasoning {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn infer(&self, context: &ReasoningContext) -> Result<ReasoningOutput, OrchestratorError> {
        self.seen.lock().push(context.clone());

        let next = self.script.lock().pop_front();
        let mut last = self.last.lock();
        match next {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last.clone().unwrap_or_else(|| {
                Err(OrchestratorError::Internal("reasoning script is empty".into()))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepforge_core::RequestedToolCall;

    fn ctx() -> ReasoningContext {
        ReasoningContext {
            session_id: uuid::Uuid::new_v4(),
            agent_id: "a".into(),
            goal: "g".into(),
            request_context: None,
            summary: None,
            summarized_range: None,
            steps: Vec::new(),
            iteration: 1,
        }
    }

    #[tokio::test]
    async fn test_script_plays_in_order_then_repeats() {
        let tools = ReasoningOutput::tool_calls(vec![RequestedToolCall::new("echo", serde_json::json!({}))]);
        let r = ScriptedReasoning::new([tools.clone(), ReasoningOutput::final_answer("done")]);
        assert_eq!(r.infer(&ctx()).await.unwrap(), tools);
        assert_eq!(r.infer(&ctx()).await.unwrap(), ReasoningOutput::final_answer("done"));
        assert_eq!(r.infer(&ctx()).await.unwrap(), ReasoningOutput::final_answer("done"));
        assert_eq!(r.calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_script_fails() {
        let r = ScriptedReasoning::new(Vec::<ReasoningOutput>::new());
        assert!(r.infer(&ctx()).await.is_err());
    }
}
