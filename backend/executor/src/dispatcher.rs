//! Tool dispatcher: runs one batch of tool calls on a worker pool shared by
//! every session.
//!
//! Admission to the pool is a fair semaphore, so queued calls are served in
//! arrival order. Each admitted call runs under the per-call timeout and is
//! retried on transient failures per [`RetryPolicy`]. A call that cannot get a
//! permit within `queue_wait_timeout` resolves as `timed_out`; nothing is
//! dropped silently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use stepforge_core::{ErrorKind, ToolCall, ToolCallStatus, ToolErrorKind, ToolProvider};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Concurrent calls across all sessions.
    pub max_concurrency: usize,
    /// Budget for a single attempt.
    pub call_timeout: Duration,
    /// Longest a call may wait for a pool slot.
    pub queue_wait_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            call_timeout: Duration::from_secs(30),
            queue_wait_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct ToolDispatcher {
    worker: CallWorker,
}

impl ToolDispatcher {
    pub fn new(provider: Arc<dyn ToolProvider>, config: DispatcherConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            worker: CallWorker {
                provider,
                permits,
                config: Arc::new(config),
            },
        }
    }

    /// Free pool slots right now.
    pub fn available_permits(&self) -> usize {
        self.worker.permits.available_permits()
    }

    /// Start every call in `calls` and return a handle yielding them as they resolve.
    ///
    /// Independent calls run concurrently. Calls marked dependent run one after
    /// another, in request order, in a single task.
    pub fn spawn_batch(&self, calls: Vec<ToolCall>) -> BatchHandle {
        let total = calls.len();
        let (tx, rx) = mpsc::channel(total.max(1));
        let (independent, dependent): (Vec<_>, Vec<_>) =
            calls.into_iter().partition(|c| c.independent);

        debug!(
            total,
            independent = independent.len(),
            dependent = dependent.len(),
            "Dispatching tool batch"
        );

        let mut tasks = Vec::with_capacity(independent.len() + 1);
        for call in independent {
            let worker = self.worker.clone();
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                let resolved = worker.run(call).await;
                let _ = tx.send(resolved).await;
            }));
        }

        if !dependent.is_empty() {
            let worker = self.worker.clone();
            tasks.push(tokio::spawn(async move {
                for call in dependent {
                    let resolved = worker.run(call).await;
                    if tx.send(resolved).await.is_err() {
                        break;
                    }
                }
            }));
        }

        BatchHandle {
            rx,
            remaining: total,
            tasks,
        }
    }

    /// Run a batch to completion. Returns every call resolved, in completion order.
    pub async fn dispatch(&self, calls: Vec<ToolCall>) -> Vec<ToolCall> {
        self.spawn_batch(calls).collect().await
    }
}

/// Results of one in-flight batch. Dropping the handle abandons unresolved calls.
pub struct BatchHandle {
    rx: mpsc::Receiver<ToolCall>,
    remaining: usize,
    tasks: Vec<JoinHandle<()>>,
}

impl BatchHandle {
    /// Next resolved call, or `None` once all have been delivered.
    pub async fn next(&mut self) -> Option<ToolCall> {
        if self.remaining == 0 {
            return None;
        }
        let call = self.rx.recv().await?;
        self.remaining -= 1;
        Some(call)
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Wait for every call (the batch barrier).
    pub async fn collect(mut self) -> Vec<ToolCall> {
        let mut resolved = Vec::with_capacity(self.remaining);
        while let Some(call) = self.next().await {
            resolved.push(call);
        }
        resolved
    }

    /// Abandon unresolved calls; their results are discarded and their pool
    /// slots released. Returns how many were abandoned.
    pub fn detach(self) -> usize {
        let abandoned = self.remaining;
        if abandoned > 0 {
            info!(abandoned, "Detaching tool batch");
        }
        abandoned
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[derive(Clone)]
struct CallWorker {
    provider: Arc<dyn ToolProvider>,
    permits: Arc<Semaphore>,
    config: Arc<DispatcherConfig>,
}

impl CallWorker {
    async fn run(&self, mut call: ToolCall) -> ToolCall {
        let queued_at = Instant::now();
        let permit = match timeout(
            self.config.queue_wait_timeout,
            self.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                call.fail(ErrorKind::Internal, "tool worker pool closed");
                return call;
            }
            Err(_) => {
                warn!(call_id = %call.id, tool = %call.tool_name, "Tool call waited too long for a worker");
                call.time_out(format!(
                    "no worker available within {}ms",
                    self.config.queue_wait_timeout.as_millis()
                ));
                call.duration_ms = Some(queued_at.elapsed().as_millis() as u64);
                return call;
            }
        };

        call.status = ToolCallStatus::Running;
        call.started_at = Some(Utc::now());
        let started = Instant::now();

        loop {
            call.attempts += 1;
            let attempt = timeout(
                self.config.call_timeout,
                self.provider
                    .execute(&call.tool_name, &call.arguments, self.config.call_timeout),
            )
            .await;

            match attempt {
                Err(_) => {
                    warn!(call_id = %call.id, tool = %call.tool_name, attempt = call.attempts, "Tool call timed out");
                    call.time_out(format!(
                        "tool '{}' exceeded {}ms",
                        call.tool_name,
                        self.config.call_timeout.as_millis()
                    ));
                    break;
                }
                Ok(Ok(value)) => {
                    call.succeed(value);
                    break;
                }
                Ok(Err(e))
                    if e.kind == ToolErrorKind::Transient
                        && self.config.retry.should_retry(call.attempts) =>
                {
                    let delay = self.config.retry.delay_for(call.attempts);
                    debug!(
                        call_id = %call.id,
                        tool = %call.tool_name,
                        attempt = call.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e.message,
                        "Transient tool failure, retrying"
                    );
                    sleep(delay).await;
                }
                Ok(Err(e)) => {
                    debug!(call_id = %call.id, tool = %call.tool_name, kind = ?e.kind, "Tool call failed");
                    call.fail(e.error_kind(), e.message);
                    break;
                }
            }
        }

        call.duration_ms = Some(started.elapsed().as_millis() as u64);
        drop(permit);
        call
    }
}
