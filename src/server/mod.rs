//! HTTP servers for both nodes.
//!
//! # Endpoints
//!
//! Edge node:
//! - `POST /webhook` - Accepts GitHub webhook deliveries and relays them
//! - `GET /` - Service description
//! - `GET /health` - Returns 200 if server is running
//!
//! Internal node:
//! - `POST /webhook/trigger` - Accepts relayed events and queues reviews
//! - `GET /` - Service description
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::relay::{HttpTransport, RelayClient, RelayTransport};
use crate::review::{CommandRunner, ProcessRunner};
use crate::worker::ReviewDispatcher;

pub mod health;
pub mod trigger;
pub mod webhook;

pub use health::{edge_info_handler, health_handler, internal_info_handler};
pub use trigger::{TriggerError, TriggerRequest, trigger_handler};
pub use webhook::{EdgeError, webhook_handler};

/// Shared state of the edge node.
///
/// This is passed to all handlers via Axum's `State` extractor.
pub struct EdgeState<T = HttpTransport> {
    inner: Arc<EdgeStateInner<T>>,
}

struct EdgeStateInner<T> {
    /// Webhook secret for HMAC-SHA256 signature verification.
    webhook_secret: Vec<u8>,

    relay: RelayClient<T>,
}

impl<T> Clone for EdgeState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: RelayTransport> EdgeState<T> {
    pub fn new(webhook_secret: impl Into<Vec<u8>>, relay: RelayClient<T>) -> Self {
        EdgeState {
            inner: Arc::new(EdgeStateInner {
                webhook_secret: webhook_secret.into(),
                relay,
            }),
        }
    }

    /// Returns the webhook secret. Empty if none is configured.
    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }

    pub fn relay(&self) -> &RelayClient<T> {
        &self.inner.relay
    }
}

/// Shared state of the internal node.
pub struct InternalState<R = ProcessRunner> {
    dispatcher: Arc<ReviewDispatcher<R>>,
}

impl<R> Clone for InternalState<R> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<R: CommandRunner + 'static> InternalState<R> {
    pub fn new(dispatcher: Arc<ReviewDispatcher<R>>) -> Self {
        InternalState { dispatcher }
    }

    pub fn dispatcher(&self) -> &ReviewDispatcher<R> {
        &self.dispatcher
    }
}

/// Builds the edge node's router.
pub fn build_edge_router<T: RelayTransport + 'static>(state: EdgeState<T>) -> Router {
    Router::new()
        .route("/", get(edge_info_handler))
        .route("/health", get(health_handler))
        .route("/webhook", post(webhook_handler::<T>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds the internal node's router.
pub fn build_internal_router<R: CommandRunner + 'static>(state: InternalState<R>) -> Router {
    Router::new()
        .route("/", get(internal_info_handler))
        .route("/health", get(health_handler))
        .route("/webhook/trigger", post(trigger_handler::<R>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
