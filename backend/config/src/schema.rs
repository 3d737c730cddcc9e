//! Stepforge runtime configuration schema.
//!
//! Every section deserializes with defaults, so a partial (or empty) YAML
//! document yields a complete config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use stepforge_core::TrustContext;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for Stepforge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StepforgeConfig {
    /// HTTP API server
    pub server: ServerConfig,

    /// Durable session/step/event storage
    pub storage: StorageConfig,

    /// Step scheduler bounds and cancellation
    pub scheduler: SchedulerSection,

    /// Tool dispatcher worker pool
    pub dispatcher: DispatcherSection,

    /// Resumable stream fan-out
    pub stream: StreamSection,

    /// Context assembly budget
    pub context: ContextSection,

    /// Trust tiers and capability policy
    pub governance: GovernanceSection,

    /// Reasoning collaborator endpoint
    pub reasoning: ReasoningSection,

    /// Remote tool sandbox endpoint
    pub tools: ToolsSection,

    /// Logging configuration
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Server / storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// SQLite database path; `:memory:` keeps everything in process.
    pub db_path: String,
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSection {
    /// Maximum reasoning iterations per session.
    pub max_steps: u32,
    /// Treat any mid-session `PermissionDenied` as fatal.
    pub strict_permissions: bool,
    /// Total wall-clock budget per session; 0 disables the deadline.
    pub session_deadline_secs: u64,
    /// Grace period for in-flight tool calls after cancellation.
    pub cancel_grace_ms: u64,
    /// Longest rate-limit wait the scheduler will sit out before denying.
    pub max_rate_limit_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatcherSection {
    /// Concurrent tool calls across all sessions.
    pub max_concurrency: usize,
    pub call_timeout_ms: u64,
    pub queue_wait_timeout_ms: u64,
    pub retry: RetrySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSection {
    /// Per-subscriber buffer, in events.
    pub subscriber_buffer_events: usize,
    /// Per-subscriber buffer, in bytes.
    pub subscriber_buffer_bytes: usize,
    /// Split final-answer text into deltas of this many characters; 0 sends it whole.
    pub message_chunk_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSection {
    /// Most recent steps always kept verbatim.
    pub keep_recent_steps: usize,
    /// Context size budget in bytes of serialized step payload.
    pub budget_bytes: usize,
}

// ---------------------------------------------------------------------------
// Governance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GovernanceSection {
    /// Trust context applied to API callers (authentication is upstream).
    pub default_trust: TrustContext,
    /// Capability patterns each tier may never use, regardless of grants.
    pub tier_denylist: HashMap<String, Vec<String>>,
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReasoningSection {
    /// Base URL of the reasoning service; unset falls back to the echo provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsSection {
    /// Base URL of the remote tool sandbox; unset uses built-in tools only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for rolling NDJSON logs; unset logs to the console only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let cfg: StepforgeConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.scheduler.max_steps, 25);
        assert_eq!(cfg.dispatcher.max_concurrency, 8);
        assert_eq!(cfg.dispatcher.retry.max_retries, 2);
        assert_eq!(cfg.stream.subscriber_buffer_events, 1000);
        assert_eq!(cfg.scheduler.cancel_grace_ms, 5_000);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let yaml = r#"
scheduler:
  maxSteps: 3
  strictPermissions: true
dispatcher:
  retry:
    maxRetries: 5
governance:
  defaultTrust:
    trust_tier: verified
    allowed_capabilities: ["agent:*", "tool:*"]
  tierDenylist:
    basic: ["tool:shell*"]
"#;
        let cfg: StepforgeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.scheduler.max_steps, 3);
        assert!(cfg.scheduler.strict_permissions);
        assert_eq!(cfg.scheduler.cancel_grace_ms, 5_000);
        assert_eq!(cfg.dispatcher.retry.max_retries, 5);
        assert_eq!(cfg.dispatcher.retry.base_delay_ms, 200);
        assert_eq!(cfg.governance.default_trust.trust_tier, "verified");
        assert_eq!(cfg.governance.tier_denylist["basic"], vec!["tool:shell*"]);
    }
}
