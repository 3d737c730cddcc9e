//! Local tool registry.
//!
//! Tools registered here run in-process. Names the registry doesn't know are
//! forwarded to an optional fallback provider (e.g. the remote sandbox), or
//! fail as fatal when there is none.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use stepforge_core::{ToolError, ToolProvider};

/// An in-process tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn call(&self, arguments: &Value) -> Result<Value, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    fallback: Option<Arc<dyn ToolProvider>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoTool));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with_fallback(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ToolProvider for ToolRegistry {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: &Value,
        timeout: Duration,
    ) -> Result<Value, ToolError> {
        if let Some(tool) = self.get(tool_name) {
            debug!(tool = %tool_name, "Running local tool");
            return tool.call(arguments).await;
        }
        match &self.fallback {
            Some(provider) => provider.execute(tool_name, arguments, timeout).await,
            None => Err(ToolError::fatal(format!("unknown tool '{tool_name}'"))),
        }
    }
}

/// Returns its arguments unchanged.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Returns its arguments unchanged"
    }

    async fn call(&self, arguments: &Value) -> Result<Value, ToolError> {
        Ok(arguments.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepforge_core::ToolErrorKind;

    struct Remote;

    #[async_trait]
    impl ToolProvider for Remote {
        async fn execute(&self, tool_name: &str, _: &Value, _: Duration) -> Result<Value, ToolError> {
            Ok(json!({ "remote": tool_name }))
        }
    }

    #[tokio::test]
    async fn test_echo_builtin() {
        let registry = ToolRegistry::with_builtins();
        let out = registry
            .execute("echo", &json!({"a": 1}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, json!({"a": 1}));
        assert_eq!(registry.list(), vec!["echo"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fatal() {
        let err = ToolRegistry::new()
            .execute("nope", &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Fatal);
    }

    #[tokio::test]
    async fn test_unknown_tool_goes_to_fallback() {
        let registry = ToolRegistry::with_builtins().with_fallback(Arc::new(Remote));
        let out = registry
            .execute("search", &json!({}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out["remote"], "search");
    }
}
