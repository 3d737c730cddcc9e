//! Config defaults: the values a section takes when the YAML omits it.

use crate::schema::{
    ContextSection, DispatcherSection, GovernanceSection, LoggingConfig, RetrySection,
    SchedulerSection, ServerConfig, StorageConfig, StreamSection,
};
use std::collections::HashMap;
use stepforge_core::TrustContext;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_DB_PATH: &str = "stepforge.db";

/// Reasoning iterations before `step_limit_exceeded`.
pub const DEFAULT_MAX_STEPS: u32 = 25;
pub const DEFAULT_SESSION_DEADLINE_SECS: u64 = 600;
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 5_000;
pub const DEFAULT_MAX_RATE_LIMIT_WAIT_MS: u64 = 2_000;

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_QUEUE_WAIT_TIMEOUT_MS: u64 = 60_000;

/// Retries after the first attempt, so three attempts in total.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;
pub const DEFAULT_RETRY_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

pub const DEFAULT_SUBSCRIBER_BUFFER_EVENTS: usize = 1_000;
pub const DEFAULT_SUBSCRIBER_BUFFER_BYTES: usize = 8 * 1024 * 1024;

pub const DEFAULT_KEEP_RECENT_STEPS: usize = 8;
pub const DEFAULT_CONTEXT_BUDGET_BYTES: usize = 32 * 1024;

pub const DEFAULT_TRUST_TIER: &str = "basic";
pub const DEFAULT_LOG_LEVEL: &str = "info";

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            strict_permissions: false,
            session_deadline_secs: DEFAULT_SESSION_DEADLINE_SECS,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            max_rate_limit_wait_ms: DEFAULT_MAX_RATE_LIMIT_WAIT_MS,
        }
    }
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            queue_wait_timeout_ms: DEFAULT_QUEUE_WAIT_TIMEOUT_MS,
            retry: RetrySection::default(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            backoff_factor: DEFAULT_RETRY_BACKOFF_FACTOR,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            jitter: true,
        }
    }
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            subscriber_buffer_events: DEFAULT_SUBSCRIBER_BUFFER_EVENTS,
            subscriber_buffer_bytes: DEFAULT_SUBSCRIBER_BUFFER_BYTES,
            message_chunk_chars: 0,
        }
    }
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            keep_recent_steps: DEFAULT_KEEP_RECENT_STEPS,
            budget_bytes: DEFAULT_CONTEXT_BUDGET_BYTES,
        }
    }
}

impl Default for GovernanceSection {
    fn default() -> Self {
        Self {
            default_trust: TrustContext::new(DEFAULT_TRUST_TIER)
                .allow("agent:*")
                .allow("tool:*"),
            tier_denylist: HashMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            dir: None,
            json: false,
        }
    }
}
