use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use stepforge_agent::{CreateSessionRequest, SessionManager};
use stepforge_core::{ErrorKind, OrchestratorError, SessionFilter, TrustContext};
use stepforge_supervisor::{StreamError, Subscription};

/// Shared application state for API handlers.
pub struct AppState {
    pub manager: Arc<SessionManager>,
    /// Applied to every caller; authentication happens upstream.
    pub default_trust: TrustContext,
    pub started_at: Instant,
}

/// Build the Axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/steps", get(get_steps))
        .route("/api/sessions/{id}/cancel", post(cancel_session))
        .route("/api/sessions/{id}/events", get(stream_events))
        .with_state(state)
}

/// Orchestrator errors rendered as `{"error": {"kind", "message"}}`.
pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        let mut body = json!({ "error": { "kind": kind, "message": self.0.to_string() } });
        if let OrchestratorError::PermissionDenied {
            retry_after: Some(wait),
            ..
        } = &self.0
        {
            body["error"]["retry_after_ms"] = json!(wait.as_millis() as u64);
        }
        (status, Json(body)).into_response()
    }
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "stepforge",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.manager.active_count(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
struct CreateBody {
    #[serde(flatten)]
    request: CreateSessionRequest,
    /// Answer with the session's event stream instead of its record.
    #[serde(default)]
    stream: bool,
}

/// Create and start a session. Answers `{session_id, status, session}`
/// or, with `stream: true`, the session's SSE stream.
async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBody>,
) -> Result<Response, ApiError> {
    let session = state
        .manager
        .create(body.request, state.default_trust.clone())?;
    let subscription = if body.stream {
        Some(state.manager.subscribe(session.id, 0)?)
    } else {
        None
    };
    let session = state.manager.start(session.id)?;

    Ok(match subscription {
        Some(sub) => sse(sub).into_response(),
        None => (
            StatusCode::CREATED,
            Json(json!({
                "session_id": session.id,
                "status": session.status,
                "session": session,
            })),
        )
            .into_response(),
    })
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<SessionFilter>,
) -> Result<Json<Value>, ApiError> {
    let sessions = state.manager.list(&filter)?;
    Ok(Json(json!({ "sessions": sessions })))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let session = state.manager.get(id)?;
    Ok(Json(json!(session)))
}

async fn get_steps(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let steps = state.manager.steps(id)?;
    Ok(Json(json!({ "steps": steps })))
}

async fn cancel_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let session = state.manager.cancel(id)?;
    Ok((StatusCode::ACCEPTED, Json(json!(session))))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    from_sequence: Option<u64>,
}

/// Resume a session's event stream. `Last-Event-ID` wins over the query.
async fn stream_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let cursor = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or(query.from_sequence)
        .unwrap_or(0);
    let subscription = state.manager.subscribe(id, cursor)?;
    Ok(sse(subscription).into_response())
}

fn sse(subscription: Subscription) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = subscription.into_stream().map(|item| {
        let event = match item {
            Ok(event) => Event::default()
                .id(event.sequence.to_string())
                .event(event.event_type.to_string())
                .json_data(&event)
                .unwrap_or_else(|_| Event::default().comment("unserializable event")),
            Err(StreamError::Lagged { last_sequence }) => Event::default()
                .event("lagged")
                .data(json!({ "last_sequence": last_sequence }).to_string()),
        };
        Ok(event)
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::build_manager;
    use stepforge_config::StepforgeConfig;
    use stepforge_supervisor::SqliteStore;
    use tokio::net::TcpListener;

    async fn serve() -> String {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let config = StepforgeConfig::default();
        let state = Arc::new(AppState {
            manager: Arc::new(build_manager(&config, store)),
            default_trust: config.governance.default_trust.clone(),
            started_at: Instant::now(),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_error_kinds_map_to_status_codes() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::PermissionDenied), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_session_lifecycle_over_http() {
        let base = serve().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/sessions"))
            .json(&json!({ "agent_id": "researcher", "goal": "say hi" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        let created: Value = resp.json().await.unwrap();
        assert_eq!(created["status"], "running");
        let id = created["session_id"].as_str().unwrap().to_string();

        // Replays the finished stream and closes after the terminal event.
        let body = client
            .get(format!("{base}/api/sessions/{id}/events"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("event: message"));
        assert!(body.contains("event: done"));

        let session: Value = client
            .get(format!("{base}/api/sessions/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(session["status"], "completed");
        assert_eq!(session["output"], "say hi");

        let resp = client
            .post(format!("{base}/api/sessions/{id}/cancel"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_resume_honours_last_event_id() {
        let base = serve().await;
        let client = reqwest::Client::new();
        let body = client
            .post(format!("{base}/api/sessions"))
            .json(&json!({ "agent_id": "researcher", "goal": "stream me", "stream": true }))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("id: 1"));
        assert!(body.contains("event: done"));

        let sessions: Value = client
            .get(format!("{base}/api/sessions?status=completed"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = sessions["sessions"][0]["id"].as_str().unwrap().to_string();

        let resumed = client
            .get(format!("{base}/api/sessions/{id}/events?from_sequence=0"))
            .header("Last-Event-ID", "1")
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(!resumed.contains("id: 1\n"));
        assert!(resumed.contains("id: 2"));
    }

    #[tokio::test]
    async fn test_unknown_session_and_bad_request() {
        let base = serve().await;
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("{base}/api/sessions/{}", Uuid::new_v4()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["kind"], "not_found");

        let resp = client
            .post(format!("{base}/api/sessions"))
            .json(&json!({ "agent_id": "researcher", "goal": "" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
