//! Internal trigger endpoint.
//!
//! Receives canonical events relayed by the edge node, decides whether they
//! call for a review and, if so, queues one. The answer never waits for the
//! review itself.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use super::InternalState;
use crate::review::CommandRunner;
use crate::worker::{DispatchError, Disposition};

/// Body of a trigger request: a relayed canonical event.
///
/// Only the fields needed for dispatch are read. Missing fields default to
/// empty, which leads to a skip rather than an error.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TriggerRequest {
    pub event: String,
    pub repo: String,
    pub payload: Value,
    /// Used when `payload` carries no `action` of its own.
    pub action: Option<String>,
}

/// Errors that can occur when handling a trigger.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl IntoResponse for TriggerError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            TriggerError::InvalidJson(_) => {
                (StatusCode::BAD_REQUEST, json!({ "error": "invalid json" }))
            }
            TriggerError::Dispatch(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": e.to_string() }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Trigger handler.
///
/// # Response
///
/// - 200 OK `{"ok": true, "skipped": <reason>}`: nothing to review
/// - 202 Accepted `{"ok": true, "accepted": true, "repo", "pr", "head_sha"}`:
///   a review was queued; `head_sha` is abbreviated to 7 characters
/// - 400 Bad Request `{"error": "invalid json"}`
/// - 503 Service Unavailable: shutting down, or the repository's queue is full
pub async fn trigger_handler<R: CommandRunner + 'static>(
    State(state): State<InternalState<R>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), TriggerError> {
    let request: TriggerRequest = serde_json::from_slice(&body).inspect_err(|e| {
        warn!(error = %e, "Trigger body is not valid JSON");
    })?;
    debug!(event = %request.event, repo = %request.repo, "Received trigger");

    let disposition = state
        .dispatcher()
        .handle_trigger(&request.event, &request.payload, request.action.as_deref())
        .await?;

    Ok(match disposition {
        Disposition::Skipped(reason) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "skipped": reason.as_str() })),
        ),
        Disposition::Accepted(pr) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "ok": true,
                "accepted": true,
                "repo": pr.repo,
                "pr": pr.number.0,
                "head_sha": pr.head_sha.short(),
            })),
        ),
    })
}
