//! Capability policy: the built-in governance collaborator.
//!
//! A capability is granted when any of the caller's `allowed_capabilities`
//! patterns matches it and none of its tier's deny-list patterns do.
//! Patterns are exact names or prefixes ending in `*` (`tool:*`, `tool:http_*`).
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use stepforge_core::{Decision, GovernanceService, TrustContext};

/// Capability required to start a session for `agent_id`.
pub fn agent_capability(agent_id: &str) -> String {
    format!("agent:{agent_id}")
}

/// Capability required to invoke `tool_name`.
pub fn tool_capability(tool_name: &str) -> String {
    format!("tool:{tool_name}")
}

/// Returns true if `pattern` matches `capability`.
pub fn capability_matches(pattern: &str, capability: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => capability.starts_with(prefix),
        None => pattern == capability,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityPolicy {
    /// Patterns a tier may never use, whatever it was granted.
    pub tier_denylist: HashMap<String, Vec<String>>,
}

impl CapabilityPolicy {
    pub fn new(tier_denylist: HashMap<String, Vec<String>>) -> Self {
        Self { tier_denylist }
    }

    /// Add a deny pattern for `tier`.
    pub fn deny_for_tier(mut self, tier: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.tier_denylist.entry(tier.into()).or_default().push(pattern.into());
        self
    }
}

impl GovernanceService for CapabilityPolicy {
    fn check(&self, trust: &TrustContext, capability: &str) -> Decision {
        if let Some(denied) = self.tier_denylist.get(&trust.trust_tier) {
            if let Some(pattern) = denied.iter().find(|p| capability_matches(p, capability)) {
                debug!(tier = %trust.trust_tier, capability, pattern = %pattern, "Capability on tier deny-list");
                return Decision::deny(format!(
                    "capability '{capability}' is not available to trust tier '{}'",
                    trust.trust_tier
                ));
            }
        }

        let granted = trust
            .allowed_capabilities
            .iter()
            .any(|p| capability_matches(p, capability));
        if granted {
            Decision::Allow
        } else {
            debug!(tier = %trust.trust_tier, capability, "Capability not granted");
            Decision::deny(format!("capability '{capability}' not granted"))
        }
    }
}
