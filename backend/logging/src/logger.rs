//! Structured Logger
//!
//! Wraps `tracing` to provide console output, an optional daily-rotated NDJSON
//! file, and environment-based level control.

use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global structured logger.
///
/// `RUST_LOG` wins over `level` when set. Console output goes to stderr. With `json` the console emits one
/// JSON object per line; otherwise human-readable lines. When `log_dir` is
/// given, an NDJSON copy goes to `stepforge.log.YYYY-MM-DD` inside it.
/// Calling this twice is a no-op.
pub fn init_logger(log_dir: Option<&Path>, level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = log_dir.map(|dir| {
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, "stepforge.log");
        fmt::layer().json().with_writer(appender).with_ansi(false)
    });

    let json_console = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_console = (!json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(true)
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_console)
        .with(text_console)
        .with(file_layer)
        .try_init();
}
