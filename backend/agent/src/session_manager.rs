//! Session lifecycle: create, start, cancel and inspect sessions.
//!
//! Running sessions live in an in-memory table of [`SessionHandle`]s, added
//! by `start` and dropped when the loop ends; the persistence store stays
//! authoritative for everything else.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use stepforge_core::{
    Decision, EventDraft, EventType, OrchestratorError, Session, SessionError, SessionFilter,
    SessionId, SessionStatus, Step, StepKind, TrustContext,
};
use stepforge_logging::StepAuditLogger;
use stepforge_security::agent_capability;
use stepforge_supervisor::Subscription;

use crate::agent_loop::{error_payload, event_data, Runtime, SchedulerConfig, StepScheduler};
use crate::cancellation::CancellationController;
use crate::context_window::ContextConfig;

/// Live state shared between a session's loop and the manager.
pub struct SessionHandle {
    id: SessionId,
    session: RwLock<Session>,
    cancel: CancellationController,
    status_tx: watch::Sender<SessionStatus>,
}

impl SessionHandle {
    pub fn new(session: Session, grace: Duration) -> Self {
        let (status_tx, _) = watch::channel(session.status);
        Self {
            id: session.id,
            session: RwLock::new(session),
            cancel: CancellationController::new(grace),
            status_tx,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn snapshot(&self) -> Session {
        self.session.read().clone()
    }

    /// Mutate the session and return the updated copy.
    pub fn update(&self, f: impl FnOnce(&mut Session)) -> Session {
        let mut session = self.session.write();
        f(&mut session);
        session.clone()
    }

    /// Exclusive access to the session. Writers persist while holding it so
    /// store writes land in the order the mutations were applied.
    pub fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write()
    }

    pub fn cancellation(&self) -> &CancellationController {
        &self.cancel
    }

    pub fn notify(&self, status: SessionStatus) {
        self.status_tx.send_replace(status);
    }

    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub agent_id: String,
    pub goal: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub scheduler: SchedulerConfig,
    pub context: ContextConfig,
    /// Wall-clock budget from start; `None` disables the deadline.
    pub session_deadline: Option<Duration>,
    /// How long in-flight tool results are still accepted after a stop.
    pub cancel_grace: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            context: ContextConfig::default(),
            session_deadline: Some(Duration::from_secs(600)),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

pub struct SessionManager {
    runtime: Arc<Runtime>,
    config: SessionManagerConfig,
    active: Arc<DashMap<SessionId, Arc<SessionHandle>>>,
    /// Serializes the store read-modify-write paths of `start` and `cancel`.
    lifecycle: Mutex<()>,
}

impl SessionManager {
    pub fn new(runtime: Runtime, config: SessionManagerConfig) -> Self {
        Self {
            runtime: Arc::new(runtime),
            config,
            active: Arc::new(DashMap::new()),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Validate, authorize and persist a new pending session.
    #[instrument(skip_all, fields(agent_id = %request.agent_id))]
    pub fn create(
        &self,
        request: CreateSessionRequest,
        trust: TrustContext,
    ) -> Result<Session, OrchestratorError> {
        if request.agent_id.trim().is_empty() {
            return Err(OrchestratorError::Validation("agent_id must not be empty".into()));
        }
        if request.goal.trim().is_empty() {
            return Err(OrchestratorError::Validation("goal must not be empty".into()));
        }
        if let Some(context) = &request.context {
            if !context.is_object() {
                return Err(OrchestratorError::Validation("context must be a JSON object".into()));
            }
        }

        if let Decision::Deny {
            reason,
            retry_after,
        } = self.runtime.governance.check_agent(&trust, &request.agent_id)
        {
            return Err(OrchestratorError::PermissionDenied {
                capability: agent_capability(&request.agent_id),
                reason,
                retry_after,
            });
        }

        let session = Session::new(request.agent_id, request.goal, request.context, trust);
        self.runtime
            .store
            .save_session(&session)
            .map_err(OrchestratorError::storage)?;
        info!(session_id = %session.id, agent_id = %session.agent_id, "Session created");
        Ok(session)
    }

    /// Move a pending session to running and spawn its loop.
    #[instrument(skip(self))]
    pub fn start(&self, id: SessionId) -> Result<Session, OrchestratorError> {
        let _lifecycle = self.lifecycle.lock();
        if self.active.contains_key(&id) {
            return Err(OrchestratorError::Conflict(format!("session {id} is already running")));
        }
        let mut session = self.load(id)?;
        if session.status != SessionStatus::Pending {
            return Err(OrchestratorError::Conflict(format!(
                "session {id} is {}, not pending",
                session.status
            )));
        }

        let deadline = self.config.session_deadline;
        session.transition(SessionStatus::Running)?;
        session.deadline = deadline
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| chrono::Utc::now() + d);
        self.runtime
            .store
            .save_session(&session)
            .map_err(OrchestratorError::storage)?;

        let handle = Arc::new(SessionHandle::new(session.clone(), self.config.cancel_grace));
        if session.cancel_requested {
            handle.cancellation().cancel();
        }
        if let Some(budget) = deadline {
            handle.cancellation().set_deadline(Instant::now() + budget);
        }
        self.active.insert(id, handle.clone());

        let scheduler = StepScheduler::new(
            self.runtime.clone(),
            self.config.scheduler.clone(),
            self.config.context.clone(),
            handle,
        );
        let active = self.active.clone();
        tokio::spawn(async move {
            scheduler.run().await;
            active.remove(&id);
        });

        info!(session_id = %id, "Session started");
        Ok(session)
    }

    /// Request cancellation. Pending sessions are flagged and stop at their
    /// first checkpoint once started.
    #[instrument(skip(self))]
    pub fn cancel(&self, id: SessionId) -> Result<Session, OrchestratorError> {
        let _lifecycle = self.lifecycle.lock();
        if let Some(handle) = self.active.get(&id).map(|h| h.value().clone()) {
            let session = {
                let mut session = handle.write();
                if session.status.is_terminal() {
                    return Err(already_terminal(&session));
                }
                session.cancel_requested = true;
                self.runtime
                    .store
                    .save_session(&session)
                    .map_err(OrchestratorError::storage)?;
                session.clone()
            };
            handle.cancellation().cancel();
            info!(session_id = %id, "Cancellation requested");
            return Ok(session);
        }

        let mut session = self.load(id)?;
        if session.status.is_terminal() {
            return Err(already_terminal(&session));
        }
        session.cancel_requested = true;
        if session.status == SessionStatus::Running {
            // No loop owns it any more; the process that ran it is gone.
            warn!(session_id = %id, "Cancelling orphaned running session");
            return self.close_orphan(session);
        }
        self.runtime
            .store
            .save_session(&session)
            .map_err(OrchestratorError::storage)?;
        info!(session_id = %id, "Cancellation requested before start");
        Ok(session)
    }

    /// Finish a running session with no loop: terminal `error` step, status,
    /// then the terminal event.
    fn close_orphan(&self, mut session: Session) -> Result<Session, OrchestratorError> {
        let store = &self.runtime.store;
        let reason = OrchestratorError::Cancelled;
        let index = store
            .load_steps(&session.id)
            .map_err(OrchestratorError::storage)?
            .last()
            .map_or(0, |s| s.index + 1);
        let step = Step::new(session.id, index, StepKind::Error, error_payload(session.id, &reason));
        store
            .append_step(&session.id, &step)
            .map_err(OrchestratorError::storage)?;
        StepAuditLogger::log_step(&step);

        session.transition(SessionStatus::Cancelled)?;
        session.current_step = Some(index);
        session.error = Some(SessionError::from(&reason));
        store
            .save_session(&session)
            .map_err(OrchestratorError::storage)?;

        self.runtime
            .events
            .append(session.id, EventDraft::new(EventType::Error, event_data(&step)))?;
        Ok(session)
    }

    pub fn get(&self, id: SessionId) -> Result<Session, OrchestratorError> {
        match self.active.get(&id) {
            Some(handle) => Ok(handle.snapshot()),
            None => self.load(id),
        }
    }

    /// Sessions matching `filter`, newest first, with live state for active ones.
    pub fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>, OrchestratorError> {
        let mut sessions = self
            .runtime
            .store
            .list_sessions(filter)
            .map_err(OrchestratorError::storage)?;
        for session in &mut sessions {
            if let Some(handle) = self.active.get(&session.id) {
                *session = handle.snapshot();
            }
        }
        Ok(sessions)
    }

    pub fn steps(&self, id: SessionId) -> Result<Vec<Step>, OrchestratorError> {
        self.get(id)?;
        self.runtime
            .store
            .load_steps(&id)
            .map_err(OrchestratorError::storage)
    }

    /// Stream events with `sequence > from_sequence`: durable history, then the live tail.
    pub fn subscribe(
        &self,
        id: SessionId,
        from_sequence: u64,
    ) -> Result<Subscription, OrchestratorError> {
        self.get(id)?;
        self.runtime.events.subscribe(id, from_sequence)
    }

    /// Resolve once a running session is terminal. Any other session
    /// resolves at once with its stored state.
    pub async fn wait(&self, id: SessionId) -> Result<Session, OrchestratorError> {
        let handle = self.active.get(&id).map(|h| h.value().clone());
        if let Some(handle) = handle {
            let mut rx = handle.watch();
            let _ = rx.wait_for(|status| status.is_terminal()).await;
            return Ok(handle.snapshot());
        }
        self.load(id)
    }

    fn load(&self, id: SessionId) -> Result<Session, OrchestratorError> {
        self.runtime
            .store
            .load_session(&id)
            .map_err(OrchestratorError::storage)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("session {id}")))
    }
}

fn already_terminal(session: &Session) -> OrchestratorError {
    OrchestratorError::Conflict(format!(
        "session {} already {}",
        session.id, session.status
    ))
}
