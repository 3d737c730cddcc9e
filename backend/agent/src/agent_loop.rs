//! Step scheduler: the per-session execution loop.
//!
//! One loop per running session, alternating reasoning calls and tool
//! batches until the reasoning collaborator produces a final answer:
//!
//! ```text
//! INIT -> REASONING -> (TOOL_DISPATCH -> TOOL_WAIT -> REASONING)* -> FINALIZING -> DONE
//! ```
//!
//! with `ERROR`, `CANCELLED` and `TIMED_OUT` reachable from any non-terminal
//! state. Every step is persisted before its events are published, and the
//! session's terminal status is saved before the terminal event goes out.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use stepforge_core::{
    Decision, ErrorKind, EventDraft, EventType, OrchestratorError, PersistenceStore,
    ReasoningOutput, ReasoningProvider, RequestedToolCall, Session, SessionError, SessionId,
    SessionStatus, Step, StepKind, Summarizer, ToolCall, ToolOutcome,
};
use stepforge_executor::{BatchHandle, ToolDispatcher};
use stepforge_logging::StepAuditLogger;
use stepforge_security::{tool_capability, GovernanceFilter};
use stepforge_supervisor::EventLog;

use crate::cancellation::CancellationController;
use crate::context_window::{ContextAssembler, ContextConfig};
use crate::session_manager::SessionHandle;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Reasoning iterations allowed per session.
    pub max_steps: u32,
    /// Any mid-session permission denial fails the session.
    pub strict_permissions: bool,
    /// Rate-limit denials asking for at most this long are waited out.
    pub max_rate_limit_wait: Duration,
    /// Split final answers into `message` deltas of this many chars; 0 disables.
    pub message_chunk_chars: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            strict_permissions: false,
            max_rate_limit_wait: Duration::from_secs(2),
            message_chunk_chars: 0,
        }
    }
}

/// Collaborators shared by every session loop.
pub struct Runtime {
    pub reasoning: Arc<dyn ReasoningProvider>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub governance: Arc<GovernanceFilter>,
    pub store: Arc<dyn PersistenceStore>,
    pub events: Arc<EventLog>,
    pub summarizer: Arc<dyn Summarizer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    Reasoning,
    ToolDispatch,
    ToolWait,
    Finalizing,
    Done,
    Error,
    Cancelled,
    TimedOut,
}

pub struct StepScheduler {
    runtime: Arc<Runtime>,
    config: SchedulerConfig,
    handle: Arc<SessionHandle>,
    assembler: ContextAssembler,
    steps: Vec<Step>,
    iterations: u32,
    state: LoopState,
}

impl StepScheduler {
    pub fn new(
        runtime: Arc<Runtime>,
        config: SchedulerConfig,
        context: ContextConfig,
        handle: Arc<SessionHandle>,
    ) -> Self {
        let assembler = ContextAssembler::new(runtime.summarizer.clone(), context);
        Self {
            runtime,
            config,
            handle,
            assembler,
            steps: Vec::new(),
            iterations: 0,
            state: LoopState::Init,
        }
    }

    fn enter(&mut self, state: LoopState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Loop state");
            self.state = state;
        }
    }

    /// Drive the session to a terminal status.
    #[instrument(skip(self), fields(session_id = %self.handle.id()))]
    pub async fn run(mut self) -> SessionStatus {
        info!("Session loop started");
        let result = match self.load_history() {
            Ok(()) => self.drive().await,
            Err(e) => Err(e),
        };
        self.finish(result)
    }

    fn load_history(&mut self) -> Result<(), OrchestratorError> {
        self.steps = self
            .runtime
            .store
            .load_steps(&self.handle.id())
            .map_err(OrchestratorError::storage)?;
        Ok(())
    }

    async fn drive(&mut self) -> Result<String, OrchestratorError> {
        let cancel = self.handle.cancellation().clone();
        loop {
            self.enter(LoopState::Reasoning);
            cancel.check()?;
            if self.iterations >= self.config.max_steps {
                return Err(OrchestratorError::StepLimitExceeded(self.config.max_steps));
            }
            self.iterations += 1;

            let session = self.handle.snapshot();
            let context = self
                .assembler
                .build(&session, &self.steps, self.iterations)
                .await?;
            debug!(
                iteration = self.iterations,
                context_bytes = context.size(),
                provider = self.runtime.reasoning.name(),
                "Calling reasoning"
            );

            let output = tokio::select! {
                biased;
                reason = cancel.triggered() => return Err(reason.into_error()),
                output = self.runtime.reasoning.infer(&context) => output?,
            };

            match output {
                ReasoningOutput::FinalAnswer { output } => {
                    self.enter(LoopState::Finalizing);
                    self.append_message(&output)?;
                    return Ok(output);
                }
                ReasoningOutput::ToolCalls { thought, calls } => {
                    if calls.is_empty() {
                        return Err(OrchestratorError::Internal(
                            "reasoning returned an empty tool batch".into(),
                        ));
                    }
                    self.run_batch(thought, calls, &cancel).await?;
                }
            }
        }
    }

    async fn run_batch(
        &mut self,
        thought: Option<String>,
        requested: Vec<RequestedToolCall>,
        cancel: &CancellationController,
    ) -> Result<(), OrchestratorError> {
        self.enter(LoopState::ToolDispatch);
        let batch_id = Uuid::new_v4();
        let calls: Vec<ToolCall> = requested
            .iter()
            .map(|r| {
                ToolCall::new(
                    r.call_id(),
                    batch_id,
                    r.tool_name.clone(),
                    r.arguments.clone(),
                    r.independent,
                )
            })
            .collect();

        {
            let mut seen = HashSet::with_capacity(calls.len());
            if let Some(dup) = calls.iter().find(|c| !seen.insert(c.id.as_str())) {
                return Err(OrchestratorError::Internal(format!(
                    "reasoning returned duplicate call id {}",
                    dup.id
                )));
            }
        }

        let call_ids: Vec<&str> = calls.iter().map(|c| c.id.as_str()).collect();
        self.append_step(
            StepKind::Reasoning,
            json!({
                "iteration": self.iterations,
                "thought": thought,
                "batch_id": batch_id,
                "call_ids": call_ids,
            }),
        )?;
        for call in &calls {
            self.append_step(
                StepKind::ToolCall,
                json!({
                    "call_id": call.id,
                    "batch_id": batch_id,
                    "tool_name": call.tool_name,
                    "arguments": call.arguments,
                    "independent": call.independent,
                }),
            )?;
        }

        let session = self.handle.snapshot();
        let mut admitted = Vec::with_capacity(calls.len());
        for mut call in calls {
            let Some(reason) = self.authorize(&session, &call.tool_name, cancel).await? else {
                admitted.push(call);
                continue;
            };
            warn!(tool = %call.tool_name, call_id = %call.id, reason = %reason, "Tool call denied");
            call.fail(ErrorKind::PermissionDenied, reason.clone());
            self.append_tool_result(&call)?;
            if self.config.strict_permissions {
                return Err(OrchestratorError::PermissionDenied {
                    capability: tool_capability(&call.tool_name),
                    reason,
                    retry_after: None,
                });
            }
        }

        cancel.check()?;
        if admitted.is_empty() {
            return Ok(());
        }

        self.enter(LoopState::ToolWait);
        info!(batch_id = %batch_id, calls = admitted.len(), "Dispatching tool batch");
        let mut batch = self.runtime.dispatcher.spawn_batch(admitted);
        loop {
            tokio::select! {
                biased;
                reason = cancel.triggered() => {
                    self.drain_within_grace(&mut batch, cancel.grace()).await?;
                    let abandoned = batch.detach();
                    info!(batch_id = %batch_id, abandoned, "Session stopped during tool wait");
                    return Err(reason.into_error());
                }
                next = batch.next() => match next {
                    Some(call) => {
                        self.append_tool_result(&call)?;
                        if self.config.strict_permissions
                            && call.error_kind() == Some(ErrorKind::PermissionDenied)
                        {
                            batch.detach();
                            return Err(OrchestratorError::PermissionDenied {
                                capability: tool_capability(&call.tool_name),
                                reason: "tool provider refused the call".into(),
                                retry_after: None,
                            });
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    /// Governance check for one call. `Ok(Some(reason))` means denied.
    ///
    /// A short rate-limit wait is sat out once; a call still limited after
    /// that is denied.
    async fn authorize(
        &self,
        session: &Session,
        tool_name: &str,
        cancel: &CancellationController,
    ) -> Result<Option<String>, OrchestratorError> {
        let mut waited = false;
        loop {
            match self
                .runtime
                .governance
                .check_tool(session.id, &session.trust, tool_name)
            {
                Decision::Allow => return Ok(None),
                Decision::Deny {
                    retry_after: Some(wait),
                    ..
                } if !waited && wait <= self.config.max_rate_limit_wait => {
                    waited = true;
                    debug!(tool = %tool_name, wait_ms = wait.as_millis() as u64, "Rate limited; waiting");
                    tokio::select! {
                        biased;
                        reason = cancel.triggered() => return Err(reason.into_error()),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                Decision::Deny { reason, .. } => return Ok(Some(reason)),
            }
        }
    }

    /// Record results that land within the grace period.
    async fn drain_within_grace(
        &mut self,
        batch: &mut BatchHandle,
        grace: Duration,
    ) -> Result<(), OrchestratorError> {
        let until = Instant::now() + grace;
        while !batch.is_complete() {
            match tokio::time::timeout_at(until, batch.next()).await {
                Ok(Some(call)) => {
                    self.append_tool_result(&call)?;
                }
                Ok(None) | Err(_) => break,
            }
        }
        Ok(())
    }

    fn append_tool_result(&mut self, call: &ToolCall) -> Result<Step, OrchestratorError> {
        let mut payload = json!({
            "call_id": call.id,
            "batch_id": call.batch_id,
            "tool_name": call.tool_name,
            "status": call.status,
            "attempts": call.attempts,
            "duration_ms": call.duration_ms,
        });
        match &call.outcome {
            Some(ToolOutcome::Success { value }) => payload["result"] = value.clone(),
            Some(ToolOutcome::Error { kind, message }) => {
                payload["error"] = json!({ "kind": kind, "message": message });
            }
            None => {}
        }
        self.append_step(StepKind::ToolResult, payload)
    }

    /// The final answer: one `message` step, streamed whole or as deltas.
    fn append_message(&mut self, text: &str) -> Result<(), OrchestratorError> {
        let step = self.record_step(StepKind::Message, json!({ "text": text }))?;
        let chunk = self.config.message_chunk_chars;
        if chunk == 0 || text.chars().count() <= chunk {
            return self.publish_step(&step);
        }

        let chars: Vec<char> = text.chars().collect();
        for piece in chars.chunks(chunk) {
            let delta: String = piece.iter().collect();
            self.runtime.events.append(
                step.session_id,
                EventDraft::new(
                    EventType::Message,
                    json!({ "step_index": step.index, "delta": delta }),
                ),
            )?;
        }
        Ok(())
    }

    fn append_step(&mut self, kind: StepKind, payload: Value) -> Result<Step, OrchestratorError> {
        let step = self.record_step(kind, payload)?;
        self.publish_step(&step)?;
        Ok(step)
    }

    /// Persist the next step. Indices are contiguous from 0.
    fn record_step(&mut self, kind: StepKind, payload: Value) -> Result<Step, OrchestratorError> {
        let session_id = self.handle.id();
        let index = self.steps.last().map_or(0, |s| s.index + 1);
        let step = Step::new(session_id, index, kind, payload);
        self.runtime
            .store
            .append_step(&session_id, &step)
            .map_err(OrchestratorError::storage)?;
        StepAuditLogger::log_step(&step);
        self.handle.update(|s| s.current_step = Some(index));
        self.steps.push(step.clone());
        Ok(step)
    }

    fn publish_step(&self, step: &Step) -> Result<(), OrchestratorError> {
        self.runtime.events.append(
            step.session_id,
            EventDraft::new(EventType::for_step(step.kind), event_data(step)),
        )?;
        Ok(())
    }

    fn finish(&mut self, result: Result<String, OrchestratorError>) -> SessionStatus {
        let session_id = self.handle.id();
        let (status, kind, payload) = match &result {
            Ok(output) => (
                SessionStatus::Completed,
                StepKind::Done,
                json!({ "session_id": session_id, "output": output }),
            ),
            Err(err) => {
                let status = match err {
                    OrchestratorError::Cancelled => SessionStatus::Cancelled,
                    OrchestratorError::Timeout(_) => SessionStatus::TimedOut,
                    _ => SessionStatus::Failed,
                };
                match err.kind() {
                    ErrorKind::Internal => error!(error = %err, "Session failed"),
                    ErrorKind::Cancelled | ErrorKind::Timeout => info!(error = %err, "Session stopped"),
                    _ => warn!(error = %err, kind = %err.kind(), "Session failed"),
                }
                (status, StepKind::Error, error_payload(session_id, err))
            }
        };
        self.enter(match status {
            SessionStatus::Completed => LoopState::Done,
            SessionStatus::Cancelled => LoopState::Cancelled,
            SessionStatus::TimedOut => LoopState::TimedOut,
            _ => LoopState::Error,
        });

        let terminal_data = match self.record_step(kind, payload.clone()) {
            Ok(step) => event_data(&step),
            Err(e) => {
                error!(error = %e, "Failed to persist terminal step");
                payload
            }
        };

        {
            let mut session = self.handle.write();
            if let Err(e) = session.transition(status) {
                warn!(error = %e, "Unexpected terminal transition");
            }
            match &result {
                Ok(output) => session.output = Some(output.clone()),
                Err(err) => session.error = Some(SessionError::from(err)),
            }
            if let Err(e) = self.runtime.store.save_session(&session) {
                error!(error = %e, "Failed to persist terminal session status");
            }
        }

        let draft = EventDraft::new(EventType::for_step(kind), terminal_data);
        if let Err(e) = self.runtime.events.append(session_id, draft) {
            error!(error = %e, "Failed to publish terminal event");
        }

        self.runtime.governance.release_session(session_id);
        self.handle.notify(status);
        info!(status = %status, iterations = self.iterations, steps = self.steps.len(), "Session loop finished");
        status
    }
}

/// Payload of the terminal `error` step.
pub(crate) fn error_payload(session_id: SessionId, err: &OrchestratorError) -> Value {
    json!({
        "session_id": session_id,
        "error_kind": err.kind(),
        "message": err.to_string(),
    })
}

/// Event payload for a step: its payload plus `step_index`.
pub(crate) fn event_data(step: &Step) -> Value {
    let mut data = step.payload.clone();
    if let Value::Object(map) = &mut data {
        map.insert("step_index".into(), json!(step.index));
    }
    data
}
