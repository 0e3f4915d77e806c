//! Health check and service description endpoints.
//!
//! `/health` returns 200 OK if the server is running. This is intended for use
//! with load balancers and orchestration systems (e.g., Kubernetes liveness probes).
//! `/` describes which node is answering and where its webhook endpoint is.

use axum::Json;
use axum::http::StatusCode;
use serde_json::{Value, json};

/// Health check handler.
///
/// # Example
///
/// ```ignore
/// GET /health HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: text/plain
///
/// OK
/// ```
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// `GET /` on the edge node.
pub async fn edge_info_handler() -> Json<Value> {
    Json(json!({
        "service": "review-relay edge",
        "webhook": "/webhook",
    }))
}

/// `GET /` on the internal node.
pub async fn internal_info_handler() -> Json<Value> {
    Json(json!({
        "service": "review-relay internal",
        "webhook": "/webhook/trigger",
    }))
}
