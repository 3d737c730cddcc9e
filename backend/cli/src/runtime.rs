//! Assembles a [`SessionManager`] from the loaded configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use stepforge_agent::{
    ContextConfig, ExtractiveSummarizer, Runtime, SchedulerConfig, SessionManager,
    SessionManagerConfig,
};
use stepforge_config::{
    ContextSection, DispatcherSection, ReasoningSection, SchedulerSection, StepforgeConfig,
    StreamSection, ToolsSection,
};
use stepforge_core::{PersistenceStore, ReasoningProvider, ToolProvider};
use stepforge_executor::{DispatcherConfig, HttpToolProvider, RetryPolicy, ToolDispatcher, ToolRegistry};
use stepforge_planner::{EchoReasoning, HttpReasoningProvider};
use stepforge_security::{CapabilityPolicy, GovernanceFilter};
use stepforge_supervisor::{EventLog, EventLogConfig, SqliteStore};

pub fn open_store(config: &StepforgeConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.storage.db_path)
        .with_context(|| format!("Failed to open database {}", config.storage.db_path))?;
    Ok(Arc::new(store))
}

pub fn build_manager(config: &StepforgeConfig, store: Arc<dyn PersistenceStore>) -> SessionManager {
    let reasoning = reasoning_provider(&config.reasoning);
    let tools = tool_provider(&config.tools);
    let policy = CapabilityPolicy::new(config.governance.tier_denylist.clone());

    info!(
        reasoning = reasoning.name(),
        remote_tools = config.tools.endpoint.is_some(),
        max_concurrency = config.dispatcher.max_concurrency,
        "Runtime assembled"
    );

    let runtime = Runtime {
        reasoning,
        dispatcher: Arc::new(ToolDispatcher::new(tools, dispatcher_config(&config.dispatcher))),
        governance: Arc::new(GovernanceFilter::new(Arc::new(policy))),
        events: Arc::new(EventLog::new(store.clone(), event_log_config(&config.stream))),
        store,
        summarizer: Arc::new(ExtractiveSummarizer),
    };
    SessionManager::new(runtime, manager_config(config))
}

pub fn manager_config(config: &StepforgeConfig) -> SessionManagerConfig {
    SessionManagerConfig {
        scheduler: scheduler_config(&config.scheduler, &config.stream),
        context: context_config(&config.context),
        session_deadline: (config.scheduler.session_deadline_secs > 0)
            .then(|| Duration::from_secs(config.scheduler.session_deadline_secs)),
        cancel_grace: Duration::from_millis(config.scheduler.cancel_grace_ms),
    }
}

fn scheduler_config(section: &SchedulerSection, stream: &StreamSection) -> SchedulerConfig {
    SchedulerConfig {
        max_steps: section.max_steps,
        strict_permissions: section.strict_permissions,
        max_rate_limit_wait: Duration::from_millis(section.max_rate_limit_wait_ms),
        message_chunk_chars: stream.message_chunk_chars,
    }
}

fn context_config(section: &ContextSection) -> ContextConfig {
    ContextConfig {
        keep_recent_steps: section.keep_recent_steps,
        budget_bytes: section.budget_bytes,
    }
}

pub fn dispatcher_config(section: &DispatcherSection) -> DispatcherConfig {
    DispatcherConfig {
        max_concurrency: section.max_concurrency,
        call_timeout: Duration::from_millis(section.call_timeout_ms),
        queue_wait_timeout: Duration::from_millis(section.queue_wait_timeout_ms),
        retry: RetryPolicy {
            max_retries: section.retry.max_retries,
            base_delay_ms: section.retry.base_delay_ms,
            backoff_factor: section.retry.backoff_factor,
            max_delay_ms: section.retry.max_delay_ms,
            jitter: section.retry.jitter,
        },
    }
}

fn event_log_config(section: &StreamSection) -> EventLogConfig {
    EventLogConfig {
        subscriber_buffer_events: section.subscriber_buffer_events,
        subscriber_buffer_bytes: section.subscriber_buffer_bytes,
    }
}

fn reasoning_provider(section: &ReasoningSection) -> Arc<dyn ReasoningProvider> {
    let Some(endpoint) = &section.endpoint else {
        return Arc::new(EchoReasoning);
    };
    let mut provider = HttpReasoningProvider::new(endpoint.clone());
    if let Some(key) = &section.api_key {
        provider = provider.with_api_key(key.clone());
    }
    if let Some(ms) = section.timeout_ms {
        provider = provider.with_timeout(Duration::from_millis(ms));
    }
    Arc::new(provider)
}

/// Built-in tools, falling back to the remote sandbox when configured.
fn tool_provider(section: &ToolsSection) -> Arc<dyn ToolProvider> {
    let registry = ToolRegistry::with_builtins();
    let Some(endpoint) = &section.endpoint else {
        return Arc::new(registry);
    };
    let mut remote = HttpToolProvider::new(endpoint.clone());
    if let Some(key) = &section.api_key {
        remote = remote.with_api_key(key.clone());
    }
    Arc::new(registry.with_fallback(Arc::new(remote)))
}
