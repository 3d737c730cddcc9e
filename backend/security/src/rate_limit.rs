//! Fixed-window call rate limiter, keyed by session.
//!
//! Windows run on the tokio clock so they move with the scheduler's timers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use stepforge_core::RateLimit;

/// Per-key window state.
struct WindowState {
    count: u32,
    window_start: Instant,
}

/// Rate limiter backed by an in-memory counter per key.
#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, WindowState>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one call against `key`.
    ///
    /// Returns `Err(retry_after)` when the window is exhausted; the rejected
    /// call is not counted.
    pub fn check(&self, key: &str, limit: RateLimit) -> Result<(), Duration> {
        self.check_at(key, limit, Instant::now())
    }

    fn check_at(&self, key: &str, limit: RateLimit, now: Instant) -> Result<(), Duration> {
        let window = Duration::from_secs(limit.window_secs);
        let mut windows = self.windows.lock();

        let state = windows.entry(key.to_string()).or_insert_with(|| WindowState {
            count: 0,
            window_start: now,
        });

        if now.duration_since(state.window_start) >= window {
            state.count = 0;
            state.window_start = now;
        }

        if state.count < limit.max_calls {
            state.count += 1;
            debug!(key, count = state.count, max = limit.max_calls, "Rate limit check: allowed");
            Ok(())
        } else {
            let retry_after = window.saturating_sub(now.duration_since(state.window_start));
            debug!(key, retry_after_ms = retry_after.as_millis() as u64, "Rate limit check: denied");
            Err(retry_after)
        }
    }

    /// Drop the window for `key` (the session finished).
    pub fn forget(&self, key: &str) {
        self.windows.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_after_max() {
        let limiter = RateLimiter::new();
        let limit = RateLimit { max_calls: 2, window_secs: 60 };
        let now = Instant::now();
        assert!(limiter.check_at("s1", limit, now).is_ok());
        assert!(limiter.check_at("s1", limit, now).is_ok());
        let retry = limiter.check_at("s1", limit, now + Duration::from_secs(20)).unwrap_err();
        assert_eq!(retry, Duration::from_secs(40));
    }

    #[test]
    fn window_resets() {
        let limiter = RateLimiter::new();
        let limit = RateLimit { max_calls: 1, window_secs: 1 };
        let now = Instant::now();
        assert!(limiter.check_at("s1", limit, now).is_ok());
        assert!(limiter.check_at("s1", limit, now).is_err());
        assert!(limiter.check_at("s1", limit, now + Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        let limit = RateLimit { max_calls: 1, window_secs: 60 };
        assert!(limiter.check("s1", limit).is_ok());
        assert!(limiter.check("s2", limit).is_ok());
        limiter.forget("s1");
        assert!(limiter.check("s1", limit).is_ok());
    }
}
