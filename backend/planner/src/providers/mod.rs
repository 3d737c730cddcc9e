pub mod echo;
pub mod http;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use echo::EchoReasoning;
pub use http::HttpReasoningProvider;
#[cfg(any(test, feature = "testing"))]
pub use scripted::ScriptedReasoning;
