//! `stepforge-supervisor`: durable state for Stepforge sessions.
//!
//! - [`SqliteStore`]: sessions, steps and stream events in SQLite
//! - [`EventLog`]: per-session sequenced event stream with resumable subscribers

pub mod event_log;
pub mod store;

pub use event_log::{EventLog, EventLogConfig, StreamError, Subscription};
pub use store::SqliteStore;
