use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use loadwatch_core::{
    ActionKind, DisplayState, FailureVerdict, HopeVerdict, LoadingSnapshot, OverlayView,
};

use crate::error::ApiError;
use crate::state::{AppState, Session};

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub label: Option<String>,
    pub no_response_timeout: Option<u64>,
    pub smart_suggestion_after: Option<u64>,
    pub max_errors: Option<u32>,
}

#[derive(Serialize)]
pub struct CreateSessionResponse {
    pub id: Uuid,
    pub label: Option<String>,
    pub created_at: String,
    pub no_response_timeout_ms: u64,
    pub smart_suggestion_after_ms: u64,
    pub snapshot: LoadingSnapshot,
}

#[derive(Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub label: Option<String>,
    pub state: DisplayState,
    pub message: String,
    pub elapsed_secs: u64,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct SessionDetail {
    pub id: Uuid,
    pub label: Option<String>,
    pub created_at: String,
    pub snapshot: LoadingSnapshot,
    pub retry_requests: u32,
    pub switch_requests: u32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStateRequest {
    pub state: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub smart: bool,
}

#[derive(Serialize)]
pub struct VerdictResponse {
    pub id: Uuid,
    pub state: DisplayState,
    pub elapsed_secs: u64,
    pub failure: FailureVerdict,
    pub failure_reason: Option<String>,
    pub hope: HopeVerdict,
}

#[derive(Serialize)]
pub struct ActionResponse {
    pub action: ActionKind,
    pub retry_requests: u32,
    pub switch_requests: u32,
}

#[derive(Serialize)]
pub struct DeleteSessionResponse {
    pub message: String,
    pub id: Uuid,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/state", post(update_state))
        .route("/sessions/{id}/proxy-response", post(record_proxy_response))
        .route("/sessions/{id}/segments", post(record_segment))
        .route("/sessions/{id}/errors", post(record_error))
        .route("/sessions/{id}/reset", post(reset_session))
        .route("/sessions/{id}/verdict", get(get_verdict))
        .route("/sessions/{id}/overlay", get(get_overlay))
        .route("/sessions/{id}/actions/{action}", post(trigger_action))
}

fn parse_session_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest(format!("Invalid session ID: {}", id)))
}

fn parse_action(action: &str) -> Result<ActionKind, ApiError> {
    match action.replace('-', "_").as_str() {
        "retry" => Ok(ActionKind::Retry),
        "switch_source" => Ok(ActionKind::SwitchSource),
        _ => Err(ApiError::BadRequest(format!("Unknown action: {}", action))),
    }
}

fn get_session_arc(state: &AppState, id: &str) -> Result<Arc<Session>, ApiError> {
    let id = parse_session_id(id)?;
    state
        .sessions
        .get(&id)
        .map(|r| Arc::clone(r.value()))
        .ok_or_else(|| ApiError::NotFound(format!("Session {} not found", id)))
}

async fn detail(session: &Session) -> SessionDetail {
    SessionDetail {
        id: session.id(),
        label: session.label.clone(),
        created_at: session.tracker.created_at().to_rfc3339(),
        snapshot: session.tracker.snapshot().await,
        retry_requests: session.retry_requests(),
        switch_requests: session.switch_requests(),
    }
}

/// POST /api/v1/sessions
async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    if body.no_response_timeout == Some(0) {
        return Err(ApiError::BadRequest("no_response_timeout must be positive".into()));
    }
    if body.max_errors == Some(0) {
        return Err(ApiError::BadRequest("max_errors must be positive".into()));
    }

    let tracker_config = {
        let mut c = state.tracker_config.clone();
        if let Some(ms) = body.no_response_timeout {
            c = c.with_no_response_timeout(ms);
        }
        if let Some(max) = body.max_errors {
            c = c.with_max_errors(max);
        }
        c
    };
    let overlay_config = match body.smart_suggestion_after {
        Some(ms) => state.overlay_config.clone().with_smart_suggestion_after(ms),
        None => state.overlay_config.clone(),
    };

    let no_response_timeout_ms = tracker_config.no_response_timeout.as_millis() as u64;
    let smart_suggestion_after_ms = overlay_config.smart_suggestion_after.as_millis() as u64;

    let session = Session::new(tracker_config, overlay_config, body.label);
    let id = session.id();
    let resp = CreateSessionResponse {
        id,
        label: session.label.clone(),
        created_at: session.tracker.created_at().to_rfc3339(),
        no_response_timeout_ms,
        smart_suggestion_after_ms,
        snapshot: session.tracker.snapshot().await,
    };
    state.sessions.insert(id, Arc::new(session));
    tracing::info!(session_id = %id, "Session created");

    Ok((StatusCode::CREATED, Json(resp)))
}

/// GET /api/v1/sessions
async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let sessions: Vec<_> = state.sessions.iter().map(|e| Arc::clone(e.value())).collect();

    let mut summaries = Vec::with_capacity(sessions.len());
    for s in &sessions {
        let snapshot = s.tracker.snapshot().await;
        summaries.push(SessionSummary {
            id: s.id(),
            label: s.label.clone(),
            state: snapshot.state,
            message: snapshot.message,
            elapsed_secs: snapshot.elapsed_secs,
            created_at: s.tracker.created_at().to_rfc3339(),
        });
    }
    summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Json(summaries)
}

/// GET /api/v1/sessions/:id
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let s = get_session_arc(&state, &id)?;
    Ok(Json(detail(&s).await))
}

/// DELETE /api/v1/sessions/:id
async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteSessionResponse>, ApiError> {
    let id = parse_session_id(&id)?;
    let (_, session) = state
        .sessions
        .remove(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Session {} not found", id)))?;

    session.tracker.shutdown().await;

    Ok(Json(DeleteSessionResponse {
        message: "Session stopped and deleted".into(),
        id,
    }))
}

/// POST /api/v1/sessions/:id/state
async fn update_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateStateRequest>,
) -> Result<Json<SessionDetail>, ApiError> {
    let s = get_session_arc(&state, &id)?;
    let display: DisplayState = body.state.parse().map_err(ApiError::BadRequest)?;

    if body.smart {
        s.tracker.smart_update_state(display, &body.message).await;
    } else {
        s.tracker.update_state(display, body.message).await;
    }

    Ok(Json(detail(&s).await))
}

/// POST /api/v1/sessions/:id/proxy-response
async fn record_proxy_response(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let s = get_session_arc(&state, &id)?;
    s.tracker.record_proxy_response().await;
    Ok(Json(detail(&s).await))
}

/// POST /api/v1/sessions/:id/segments
async fn record_segment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let s = get_session_arc(&state, &id)?;
    s.tracker.record_segment_request().await;
    Ok(Json(detail(&s).await))
}

/// POST /api/v1/sessions/:id/errors
async fn record_error(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let s = get_session_arc(&state, &id)?;
    s.tracker.record_error().await;
    Ok(Json(detail(&s).await))
}

/// POST /api/v1/sessions/:id/reset
async fn reset_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let s = get_session_arc(&state, &id)?;
    s.tracker.reset().await;
    Ok(Json(detail(&s).await))
}

/// GET /api/v1/sessions/:id/verdict
async fn get_verdict(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VerdictResponse>, ApiError> {
    let s = get_session_arc(&state, &id)?;
    let snapshot = s.tracker.snapshot().await;
    let failure = s.tracker.is_source_likely_failed().await;
    let hope = s.tracker.has_loading_hope().await;

    Ok(Json(VerdictResponse {
        id: s.id(),
        state: snapshot.state,
        elapsed_secs: snapshot.elapsed_secs,
        failure_reason: failure.failed.then(|| failure.reason_text()),
        failure,
        hope,
    }))
}

/// GET /api/v1/sessions/:id/overlay
async fn get_overlay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OverlayView>, ApiError> {
    let s = get_session_arc(&state, &id)?;
    Ok(Json(s.overlay.current()))
}

/// POST /api/v1/sessions/:id/actions/:action
async fn trigger_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> Result<Json<ActionResponse>, ApiError> {
    let s = get_session_arc(&state, &id)?;
    let kind = parse_action(&action)?;

    if !s.overlay.trigger(kind) {
        return Err(ApiError::Conflict(format!(
            "Action {} is not offered in the current overlay",
            action
        )));
    }
    tracing::info!(session_id = %s.id(), action = ?kind, "Overlay action triggered");

    Ok(Json(ActionResponse {
        action: kind,
        retry_requests: s.retry_requests(),
        switch_requests: s.switch_requests(),
    }))
}
