//! API handlers for the evlog server.
//!
//! Thresholds arrive as raw path segments and are validated here, so the
//! trackers only ever see non-negative sequence numbers.

use crate::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use evlog_db::LogError;
use evlog_monitor::{SourceError, WaitError};
use evlog_types::{CommandStatus, CommandSubmission, EventEntry, Events, Seq, StatusType};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Response body for the watermark endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct WatermarkResponse {
    /// The current watermark.
    pub t: Seq,
}

/// Response body for an event long-poll.
#[derive(Debug, Serialize, Deserialize)]
pub struct EventsResponse {
    /// The requested threshold.
    pub t: Seq,
    /// Events stored at `t`.
    pub events: Events,
}

/// Response body for a command status long-poll.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandStatusResponse {
    /// The requested threshold.
    pub t: Seq,
    /// The released status; `null` for threshold 0.
    pub status: Option<CommandStatus>,
}

/// Request body for recording a command outcome.
#[derive(Debug, Deserialize)]
pub struct OutcomeRequest {
    /// The command the outcome belongs to.
    pub command_uuid: Uuid,
    /// `succeeded`, `failed` or `aborted`.
    pub status_type: StatusType,
}

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<WaitError> for ApiError {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::NegativeThreshold(_) => ApiError::BadRequest(e.to_string()),
            WaitError::Aborted(_) => {
                tracing::error!(error = %e, "long-poll failed");
                ApiError::InternalServerError(e.to_string())
            }
        }
    }
}

fn parse_threshold(raw: &str) -> Result<Seq, ApiError> {
    match raw.parse::<Seq>() {
        Ok(t) if t >= 0 => Ok(t),
        _ => Err(ApiError::BadRequest(format!(
            "threshold must be a non-negative integer, got {raw:?}"
        ))),
    }
}

/// Waits for `wait`, giving up after `timeout` if one is set.
///
/// Giving up drops the wait, which unregisters its waiter.
async fn long_poll<T>(
    timeout: Option<Duration>,
    wait: impl Future<Output = Result<T, WaitError>>,
) -> Result<Option<T>, ApiError> {
    match timeout {
        None => Ok(Some(wait.await?)),
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(result) => Ok(Some(result?)),
            Err(_) => Ok(None),
        },
    }
}

/// Handler for `POST /event-apis/submit-command`.
pub async fn submit_command_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(submission): Json<CommandSubmission>,
) -> Response {
    let command_uuid = submission.command_uuid;
    tracing::info!(%command_uuid, command_type = %submission.command_type, "command submitted");

    match state.backend.submit_command(submission).await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(SourceError::Log(LogError::DuplicateCommand(_))) => {
            (StatusCode::ACCEPTED, "already inserted").into_response()
        }
        Err(e) => {
            tracing::error!(%command_uuid, error = %e, "could not insert command");
            (StatusCode::INTERNAL_SERVER_ERROR, "could not insert command").into_response()
        }
    }
}

/// Handler for `GET /event-apis/events/t`.
pub async fn event_watermark_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<WatermarkResponse>, ApiError> {
    let t = state.events.current().await?;
    Ok(Json(WatermarkResponse { t }))
}

/// Handler for `GET /event-apis/events/{t}`.
pub async fn events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let t = parse_threshold(&raw)?;
    match long_poll(state.long_poll_timeout, state.events.wait_for(t)).await? {
        Some(events) => Ok(Json(EventsResponse { t, events }).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Handler for `GET /event-apis/command-status/t`.
pub async fn status_watermark_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<WatermarkResponse>, ApiError> {
    let t = state.statuses.current().await?;
    Ok(Json(WatermarkResponse { t }))
}

/// Handler for `GET /event-apis/command-status/{t}`.
pub async fn command_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let t = parse_threshold(&raw)?;
    match long_poll(state.long_poll_timeout, state.statuses.wait_for(t)).await? {
        Some(status) => Ok(Json(CommandStatusResponse { t, status }).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Handler for `POST /event-apis/events` (embedded backend).
pub async fn append_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(entries): Json<Vec<EventEntry>>,
) -> Result<Json<WatermarkResponse>, ApiError> {
    let backend = state
        .backend
        .sqlite()
        .ok_or_else(|| ApiError::NotFound("event append is not available".to_string()))?;

    let t = backend.append_events(entries).await.map_err(|e| {
        tracing::error!(error = %e, "could not append events");
        ApiError::InternalServerError(e.to_string())
    })?;
    Ok(Json(WatermarkResponse { t }))
}

/// Handler for `POST /event-apis/command-outcome` (embedded backend).
pub async fn command_outcome_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<OutcomeRequest>,
) -> Result<Json<CommandStatusResponse>, ApiError> {
    let backend = state
        .backend
        .sqlite()
        .ok_or_else(|| ApiError::NotFound("command outcomes are not available".to_string()))?;

    let recorded = backend
        .record_outcome(payload.command_uuid, payload.status_type)
        .await
        .map_err(|e| match e {
            SourceError::Log(LogError::UnknownCommand(uuid)) => {
                ApiError::NotFound(format!("command not found: {uuid}"))
            }
            SourceError::Log(LogError::InvalidOutcome(status_type)) => {
                ApiError::BadRequest(format!("{status_type} is not an outcome"))
            }
            e => {
                tracing::error!(error = %e, "could not record outcome");
                ApiError::InternalServerError(e.to_string())
            }
        })?;

    Ok(Json(CommandStatusResponse {
        t: recorded.seq,
        status: Some(recorded.status),
    }))
}
