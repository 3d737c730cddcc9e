//! Cooperative cancellation: one flag and one deadline per session.
//!
//! Nothing here preempts work. The scheduler calls [`CancellationController::check`]
//! at each suspension point and races long waits against
//! [`CancellationController::triggered`]. Deadlines use the monotonic clock.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use stepforge_core::{OrchestratorError, SessionStatus};

/// Why a session stopped early. The first trigger wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    UserRequested,
    DeadlineExceeded,
}

impl CancelReason {
    pub fn into_error(self) -> OrchestratorError {
        match self {
            Self::UserRequested => OrchestratorError::Cancelled,
            Self::DeadlineExceeded => {
                OrchestratorError::Timeout("session wall-clock deadline reached".into())
            }
        }
    }

    pub fn terminal_status(self) -> SessionStatus {
        match self {
            Self::UserRequested => SessionStatus::Cancelled,
            Self::DeadlineExceeded => SessionStatus::TimedOut,
        }
    }
}

struct Inner {
    token: CancellationToken,
    reason: Mutex<Option<CancelReason>>,
    deadline: Mutex<Option<Instant>>,
    grace: Duration,
}

#[derive(Clone)]
pub struct CancellationController {
    inner: Arc<Inner>,
}

impl CancellationController {
    pub fn new(grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                reason: Mutex::new(None),
                deadline: Mutex::new(None),
                grace,
            }),
        }
    }

    /// How long in-flight tool calls may keep running after a trigger.
    pub fn grace(&self) -> Duration {
        self.inner.grace
    }

    pub fn set_deadline(&self, at: Instant) {
        *self.inner.deadline.lock() = Some(at);
    }

    pub fn deadline(&self) -> Option<Instant> {
        *self.inner.deadline.lock()
    }

    /// Request cancellation. Idempotent; returns `false` if already triggered.
    pub fn cancel(&self) -> bool {
        self.trigger(CancelReason::UserRequested)
    }

    fn trigger(&self, reason: CancelReason) -> bool {
        let first = {
            let mut slot = self.inner.reason.lock();
            if slot.is_some() {
                false
            } else {
                *slot = Some(reason);
                true
            }
        };
        self.inner.token.cancel();
        first
    }

    /// The trigger, if any, counting a passed deadline as one.
    pub fn reason(&self) -> Option<CancelReason> {
        if let Some(reason) = *self.inner.reason.lock() {
            return Some(reason);
        }
        match self.deadline() {
            Some(at) if Instant::now() >= at => {
                self.trigger(CancelReason::DeadlineExceeded);
                *self.inner.reason.lock()
            }
            _ => None,
        }
    }

    /// Checkpoint: `Err(Cancelled | Timeout)` once triggered.
    pub fn check(&self) -> Result<(), OrchestratorError> {
        match self.reason() {
            Some(reason) => Err(reason.into_error()),
            None => Ok(()),
        }
    }

    /// Resolves when the session is cancelled or its deadline passes.
    pub async fn triggered(&self) -> CancelReason {
        if let Some(reason) = self.reason() {
            return reason;
        }
        let deadline = self.deadline();
        tokio::select! {
            _ = self.inner.token.cancelled() => {}
            _ = sleep_until_opt(deadline) => {
                self.trigger(CancelReason::DeadlineExceeded);
            }
        }
        self.reason().unwrap_or(CancelReason::UserRequested)
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
