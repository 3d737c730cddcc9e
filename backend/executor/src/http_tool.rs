//! Remote tool sandbox over HTTP.
//!
//! `POST {base_url}/tools/{name}` with `{"arguments": ...}`; the response body
//! is the tool result (or its `result` field when present).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use stepforge_core::{ToolError, ToolProvider};

pub struct HttpToolProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpToolProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    arguments: &'a Value,
}

/// Map a non-success status to the tool error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> ToolError {
    let message = format!("sandbox returned {status}: {}", body.chars().take(200).collect::<String>());
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ToolError::transient(message)
    } else if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
        ToolError::permission_denied(message)
    } else {
        ToolError::fatal(message)
    }
}

#[async_trait]
impl ToolProvider for HttpToolProvider {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: &Value,
        timeout: Duration,
    ) -> Result<Value, ToolError> {
        let url = format!("{}/tools/{}", self.base_url, tool_name);
        let mut request = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&ExecuteRequest { arguments });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(tool = %tool_name, url = %url, "Calling remote tool");
        let response = request.send().await.map_err(|e| {
            warn!(tool = %tool_name, error = %e, "Remote tool request failed");
            ToolError::transient(format!("request to tool sandbox failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let mut body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::fatal(format!("invalid tool response: {e}")))?;
        Ok(match body.get_mut("result") {
            Some(result) => result.take(),
            None => body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepforge_core::ToolErrorKind;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY, "").kind, ToolErrorKind::Transient);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").kind, ToolErrorKind::Transient);
        assert_eq!(classify_status(StatusCode::FORBIDDEN, "").kind, ToolErrorKind::PermissionDenied);
        assert_eq!(classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad").kind, ToolErrorKind::Fatal);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let p = HttpToolProvider::new("http://sandbox:9000/");
        assert_eq!(p.base_url, "http://sandbox:9000");
    }

    #[tokio::test]
    async fn test_unreachable_sandbox_is_transient() {
        let p = HttpToolProvider::new("http://127.0.0.1:1");
        let err = p
            .execute("search", &serde_json::json!({}), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Transient);
    }
}
