//! Edge webhook endpoint.
//!
//! Accepts GitHub webhook deliveries, validates signatures, normalizes the
//! payload and relays it to the internal node before answering. GitHub's
//! delivery log therefore shows whether the internal node got the event.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::EdgeState;
use crate::relay::{RelayError, RelayTransport};
use crate::webhooks::{ParseError, parse_payload, verify_signature};

/// Header name for GitHub event type.
pub const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub signature.
pub const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum EdgeError {
    /// No webhook secret is configured, so no delivery can be verified.
    #[error("webhook secret is not configured")]
    MissingSecret,

    /// Missing or wrong signature.
    #[error("invalid signature")]
    InvalidSignature,

    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// The body is not a JSON object.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ParseError),

    /// The internal node did not take the event.
    #[error("relay of {event} event failed: {source}")]
    RelayFailed {
        event: String,
        #[source]
        source: RelayError,
    },
}

impl IntoResponse for EdgeError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            EdgeError::MissingSecret => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "server misconfiguration" }),
            ),
            EdgeError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "invalid signature" }),
            ),
            EdgeError::MissingHeader(name) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("missing header: {}", name) }),
            ),
            EdgeError::InvalidPayload(_) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "invalid payload" }),
            ),
            EdgeError::RelayFailed { event, .. } => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": "internal relay failed", "event": event }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Edge webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Required headers:
///   - `X-GitHub-Event`: Event type (e.g., "push", "pull_request")
///   - `X-Hub-Signature-256`: HMAC-SHA256 signature of the payload
/// - Body: JSON webhook payload
///
/// # Response
///
/// - 200 OK `{"ok": true, "event": ...}`: relayed to the internal node
/// - 400 Bad Request: missing event header or body not a JSON object
/// - 401 Unauthorized: missing or invalid signature
/// - 500 Internal Server Error: no webhook secret configured
/// - 502 Bad Gateway: the internal node did not accept the event
pub async fn webhook_handler<T: RelayTransport + 'static>(
    State(state): State<EdgeState<T>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, EdgeError> {
    if state.webhook_secret().is_empty() {
        warn!("Webhook received but no secret is configured");
        return Err(EdgeError::MissingSecret);
    }

    // Verify signature BEFORE any parsing.
    let signature_header = header(&headers, HEADER_SIGNATURE);
    if !verify_signature(&body, signature_header, state.webhook_secret()) {
        warn!(
            signature_present = signature_header.is_some(),
            "Invalid webhook signature"
        );
        return Err(EdgeError::InvalidSignature);
    }

    let event_type = header(&headers, HEADER_EVENT).ok_or(EdgeError::MissingHeader(HEADER_EVENT))?;

    let event = parse_payload(event_type, &body).inspect_err(|e| {
        warn!(event = %event_type, error = %e, "Unparseable webhook payload");
    })?;

    debug!(
        event = %event.event_type,
        repo = %event.repo_full_name,
        branch = %event.branch,
        commit = %event.commit_sha,
        "Received webhook"
    );

    if let Err(source) = state.relay().send(&event).await {
        return Err(EdgeError::RelayFailed {
            event: event.event_type,
            source,
        });
    }

    info!(event = %event.event_type, repo = %event.repo_full_name, "Webhook relayed");
    Ok(Json(json!({ "ok": true, "event": event.event_type })))
}

/// Returns a header value if it is present and valid UTF-8.
fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
