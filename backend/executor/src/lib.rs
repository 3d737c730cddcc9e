//! `stepforge-executor`: executes tool calls for Stepforge sessions.
//!
//! - [`ToolDispatcher`]: bounded worker pool with per-call timeouts and retries
//! - [`ToolRegistry`]: in-process tools, with an optional remote fallback
//! - [`HttpToolProvider`]: remote tool sandbox client

pub mod dispatcher;
pub mod http_tool;
pub mod registry;
pub mod retry;

pub use dispatcher::{BatchHandle, DispatcherConfig, ToolDispatcher};
pub use http_tool::HttpToolProvider;
pub use registry::{EchoTool, Tool, ToolRegistry};
pub use retry::RetryPolicy;
