//! Governance filter: the single gate sessions and tool calls pass through.
//!
//! Capability checks go to the configured [`GovernanceService`]; calls that
//! pass are then counted against the trust context's rate limit, per session.

use std::sync::Arc;

use tracing::info;

use stepforge_core::{Decision, GovernanceService, SessionId, TrustContext};

use crate::policy::{agent_capability, tool_capability};
use crate::rate_limit::RateLimiter;

pub struct GovernanceFilter {
    service: Arc<dyn GovernanceService>,
    limiter: RateLimiter,
}

impl GovernanceFilter {
    pub fn new(service: Arc<dyn GovernanceService>) -> Self {
        Self {
            service,
            limiter: RateLimiter::new(),
        }
    }

    /// May this caller start a session for `agent_id`?
    pub fn check_agent(&self, trust: &TrustContext, agent_id: &str) -> Decision {
        let capability = agent_capability(agent_id);
        let decision = self.service.check(trust, &capability);
        if let Decision::Deny { reason, .. } = &decision {
            info!(capability = %capability, tier = %trust.trust_tier, reason = %reason, "Session denied");
        }
        decision
    }

    /// May `session_id` invoke `tool_name` now?
    pub fn check_tool(&self, session_id: SessionId, trust: &TrustContext, tool_name: &str) -> Decision {
        let capability = tool_capability(tool_name);
        let decision = self.service.check(trust, &capability);
        if !decision.is_allowed() {
            return decision;
        }

        let Some(limit) = trust.rate_limit else {
            return Decision::Allow;
        };
        match self.limiter.check(&session_id.to_string(), limit) {
            Ok(()) => Decision::Allow,
            Err(retry_after) => Decision::Deny {
                reason: format!(
                    "rate limit of {} calls per {}s exceeded",
                    limit.max_calls, limit.window_secs
                ),
                retry_after: Some(retry_after),
            },
        }
    }

    /// Release per-session state once the session is finished.
    pub fn release_session(&self, session_id: SessionId) {
        self.limiter.forget(&session_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CapabilityPolicy;

    fn filter() -> GovernanceFilter {
        GovernanceFilter::new(Arc::new(CapabilityPolicy::default()))
    }

    #[test]
    fn test_agent_capability() {
        let trust = TrustContext::new("basic").allow("agent:researcher");
        assert!(filter().check_agent(&trust, "researcher").is_allowed());
        assert!(!filter().check_agent(&trust, "admin").is_allowed());
    }

    #[test]
    fn test_tool_rate_limit_per_session() {
        let f = filter();
        let trust = TrustContext::new("basic").allow("tool:*").with_rate_limit(1, 60);
        let s1 = uuid::Uuid::new_v4();
        let s2 = uuid::Uuid::new_v4();

        assert!(f.check_tool(s1, &trust, "search").is_allowed());
        match f.check_tool(s1, &trust, "search") {
            Decision::Deny { retry_after, .. } => assert!(retry_after.is_some()),
            Decision::Allow => panic!("second call should be limited"),
        }
        assert!(f.check_tool(s2, &trust, "search").is_allowed());

        f.release_session(s1);
        assert!(f.check_tool(s1, &trust, "search").is_allowed());
    }

    #[test]
    fn test_denied_capability_is_not_counted() {
        let f = filter();
        let trust = TrustContext::new("basic").allow("tool:search").with_rate_limit(1, 60);
        let s = uuid::Uuid::new_v4();
        assert!(!f.check_tool(s, &trust, "shell").is_allowed());
        assert!(f.check_tool(s, &trust, "search").is_allowed());
    }
}
