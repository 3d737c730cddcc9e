use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use stepforge_core::{OrchestratorError, ReasoningContext, ReasoningOutput, ReasoningProvider};

/// Remote reasoning service.
///
/// `POST {base_url}/v1/infer` with the assembled [`ReasoningContext`] as JSON;
/// the response body is a [`ReasoningOutput`] document
/// (`{"type": "final_answer", ...}` or `{"type": "tool_calls", ...}`).
pub struct HttpReasoningProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpReasoningProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ReasoningProvider for HttpReasoningProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn infer(&self, context: &ReasoningContext) -> Result<ReasoningOutput, OrchestratorError> {
        let start = Instant::now();
        let mut request = self
            .client
            .post(format!("{}/v1/infer", self.base_url))
            .timeout(self.timeout)
            .json(context);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(
            session_id = %context.session_id,
            iteration = context.iteration,
            steps = context.steps.len(),
            "Sending reasoning request"
        );

        let response = request.send().await.map_err(|e| {
            warn!(session_id = %context.session_id, error = %e, "Reasoning request failed");
            OrchestratorError::Internal(format!("reasoning request failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Internal(format!(
                "reasoning service returned {status}: {body}"
            )));
        }

        let output: ReasoningOutput = response.json().await.map_err(|e| {
            OrchestratorError::Internal(format!("unparseable reasoning output: {e}"))
        })?;

        debug!(
            session_id = %context.session_id,
            latency_ms = start.elapsed().as_millis() as u64,
            "Reasoning response received"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_service_is_internal_error() {
        let provider = HttpReasoningProvider::new("http://127.0.0.1:1/")
            .with_timeout(Duration::from_secs(2));
        assert_eq!(provider.base_url, "http://127.0.0.1:1");

        let ctx = ReasoningContext {
            session_id: uuid::Uuid::new_v4(),
            agent_id: "a".into(),
            goal: "g".into(),
            request_context: None,
            summary: None,
            summarized_range: None,
            steps: Vec::new(),
            iteration: 1,
        };
        let err = provider.infer(&ctx).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Internal(_)));
    }
}
