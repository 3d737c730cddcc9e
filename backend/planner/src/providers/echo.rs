use async_trait::async_trait;

use stepforge_core::{OrchestratorError, ReasoningContext, ReasoningOutput, ReasoningProvider};

/// Answers every session with its own goal. Used when no reasoning endpoint
/// is configured.
pub struct EchoReasoning;

#[async_trait]
impl ReasoningProvider for EchoReasoning {
    fn name(&self) -> &str {
        "echo"
    }

    async fn infer(&self, context: &ReasoningContext) -> Result<ReasoningOutput, OrchestratorError> {
        Ok(ReasoningOutput::final_answer(context.goal.clone()))
    }
}
