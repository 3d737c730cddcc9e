//! Config validation: range checks with user-friendly error messages.

use crate::schema::StepforgeConfig;
use thiserror::Error;

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &StepforgeConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_scheduler(config, &mut report);
    validate_dispatcher(config, &mut report);
    validate_stream(config, &mut report);
    validate_context(config, &mut report);
    validate_governance(config, &mut report);
    validate_endpoints(config, &mut report);
    report
}

fn validate_scheduler(config: &StepforgeConfig, report: &mut ValidationReport) {
    let s = &config.scheduler;
    if s.max_steps == 0 {
        report.error("scheduler.maxSteps", "Must be at least 1");
    }
    if s.session_deadline_secs == 0 {
        report.warn(
            "scheduler.sessionDeadlineSecs",
            "0 disables the session deadline; runaway sessions stop only at maxSteps",
        );
    }
    if s.max_rate_limit_wait_ms > s.cancel_grace_ms.max(1) * 10 {
        report.warn(
            "scheduler.maxRateLimitWaitMs",
            "Very long rate-limit waits delay cancellation checkpoints",
        );
    }
}

fn validate_dispatcher(config: &StepforgeConfig, report: &mut ValidationReport) {
    let d = &config.dispatcher;
    if d.max_concurrency == 0 {
        report.error("dispatcher.maxConcurrency", "Must be at least 1");
    }
    if d.call_timeout_ms == 0 {
        report.error("dispatcher.callTimeoutMs", "Must be greater than 0");
    }
    if d.queue_wait_timeout_ms == 0 {
        report.error("dispatcher.queueWaitTimeoutMs", "Must be greater than 0");
    }
    if d.retry.backoff_factor < 1.0 {
        report.error("dispatcher.retry.backoffFactor", "Must be >= 1.0");
    }
    if d.retry.max_delay_ms < d.retry.base_delay_ms {
        report.warn(
            "dispatcher.retry.maxDelayMs",
            "Smaller than baseDelayMs; every retry waits maxDelayMs",
        );
    }
}

fn validate_stream(config: &StepforgeConfig, report: &mut ValidationReport) {
    let s = &config.stream;
    if s.subscriber_buffer_events == 0 {
        report.error("stream.subscriberBufferEvents", "Must be at least 1");
    }
    if s.subscriber_buffer_bytes == 0 {
        report.error("stream.subscriberBufferBytes", "Must be greater than 0");
    }
}

fn validate_context(config: &StepforgeConfig, report: &mut ValidationReport) {
    let c = &config.context;
    if c.keep_recent_steps == 0 {
        report.error("context.keepRecentSteps", "Must be at least 1");
    }
    if c.budget_bytes < 1024 {
        report.warn("context.budgetBytes", "Budget under 1 KiB forces a summary every iteration");
    }
}

fn validate_governance(config: &StepforgeConfig, report: &mut ValidationReport) {
    let trust = &config.governance.default_trust;
    if trust.trust_tier.trim().is_empty() {
        report.error("governance.defaultTrust.trust_tier", "Trust tier cannot be empty");
    }
    if trust.allowed_capabilities.is_empty() {
        report.warn(
            "governance.defaultTrust.allowed_capabilities",
            "No capabilities granted; every session creation will be denied",
        );
    }
    if let Some(limit) = trust.rate_limit {
        if limit.max_calls == 0 || limit.window_secs == 0 {
            report.error(
                "governance.defaultTrust.rate_limit",
                "max_calls and window_secs must both be greater than 0",
            );
        }
    }
    for (tier, patterns) in &config.governance.tier_denylist {
        for pattern in patterns {
            if pattern.trim().is_empty() {
                report.error(format!("governance.tierDenylist.{tier}"), "Empty pattern");
            }
        }
    }
}

fn validate_endpoints(config: &StepforgeConfig, report: &mut ValidationReport) {
    let endpoints = [
        ("reasoning.endpoint", config.reasoning.endpoint.as_deref()),
        ("tools.endpoint", config.tools.endpoint.as_deref()),
    ];
    for (path, endpoint) in endpoints {
        if let Some(url) = endpoint {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                report.error(path, "Must be an http:// or https:// URL");
            }
        }
    }
    if config.reasoning.endpoint.is_none() {
        report.warn("reasoning.endpoint", "Not set; sessions use the echo reasoning provider");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let report = validate(&StepforgeConfig::default());
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn test_zero_concurrency_is_error() {
        let mut cfg = StepforgeConfig::default();
        cfg.dispatcher.max_concurrency = 0;
        let report = validate(&cfg);
        assert!(!report.is_valid());
        assert_eq!(report.errors[0].path, "dispatcher.maxConcurrency");
    }

    #[test]
    fn test_bad_endpoint_scheme_is_error() {
        let mut cfg = StepforgeConfig::default();
        cfg.tools.endpoint = Some("ftp://sandbox".into());
        let report = validate(&cfg);
        assert!(report.errors.iter().any(|e| e.path == "tools.endpoint"));
    }

    #[test]
    fn test_missing_reasoning_endpoint_warns() {
        let report = validate(&StepforgeConfig::default());
        assert!(report.warnings.iter().any(|w| w.path == "reasoning.endpoint"));
    }
}
