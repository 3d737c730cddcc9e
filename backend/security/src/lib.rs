//! Governance for Stepforge: capability policy, per-session rate limiting,
//! and the filter the session manager and scheduler consult.

pub mod filter;
pub mod policy;
pub mod rate_limit;

pub use filter::GovernanceFilter;
pub use policy::{agent_capability, capability_matches, tool_capability, CapabilityPolicy};
pub use rate_limit::RateLimiter;
