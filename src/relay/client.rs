//! Forwarding canonical events to the internal node.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use super::error::RelayError;
use super::retry::{RetryConfig, RetryResult, retry_with_backoff};
use crate::config::RelayConfig;
use crate::text::preview;
use crate::webhooks::CanonicalEvent;

/// Characters of a rejected response body kept in logs and errors.
const BODY_PREVIEW_CHARS: usize = 500;

/// A response from the internal node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one JSON POST request.
///
/// Implementations perform exactly one request per call and must report a
/// missing response as [`RelayError::Transport`]. Any HTTP response,
/// whatever its status, is `Ok`.
///
/// # Example (mock for testing)
///
/// ```ignore
/// struct AlwaysOk;
///
/// impl RelayTransport for AlwaysOk {
///     async fn post_json(&self, _url: &str, _body: &[u8]) -> Result<TransportResponse, RelayError> {
///         Ok(TransportResponse { status: 200, body: String::new() })
///     }
/// }
/// ```
pub trait RelayTransport: Send + Sync {
    fn post_json(
        &self,
        url: &str,
        body: &[u8],
    ) -> impl Future<Output = Result<TransportResponse, RelayError>> + Send;
}

/// [`RelayTransport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport whose requests each time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RelayError::Client)?;
        Ok(Self { client })
    }
}

impl RelayTransport for HttpTransport {
    async fn post_json(&self, url: &str, body: &[u8]) -> Result<TransportResponse, RelayError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        // The status is the answer; an unreadable body only costs us the log preview.
        let body = response.text().await.unwrap_or_default();
        Ok(TransportResponse { status, body })
    }
}

/// Relays canonical events to the internal node with bounded retry.
///
/// Per call: one POST per attempt, at most `retries + 1` attempts. Only
/// transport errors are retried; a non-2xx answer ends the call at once.
pub struct RelayClient<T = HttpTransport> {
    endpoint: Option<String>,
    retry: RetryConfig,
    transport: T,
}

impl RelayClient<HttpTransport> {
    /// Creates a client using HTTP and the given configuration.
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        Ok(Self::new(config, HttpTransport::new(config.timeout)?))
    }
}

impl<T: RelayTransport> RelayClient<T> {
    /// Creates a client using a custom transport.
    pub fn new(config: &RelayConfig, transport: T) -> Self {
        Self {
            endpoint: config.endpoint(),
            retry: RetryConfig::doubling(config.retries, config.retry_delay),
            transport,
        }
    }

    /// Returns the full URL events are posted to, if configured.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Posts `event` to the internal node.
    ///
    /// Returns [`RelayError::Unconfigured`] without any network I/O if no
    /// target is configured.
    #[instrument(skip(self, event), fields(event = %event.event_type, repo = %event.repo_full_name))]
    pub async fn send(&self, event: &CanonicalEvent) -> Result<(), RelayError> {
        let Some(url) = self.endpoint.as_deref() else {
            warn!("Relay target not configured, dropping event");
            return Err(RelayError::Unconfigured);
        };

        let body = serde_json::to_vec(event)?;

        let result = retry_with_backoff(self.retry, |attempt| {
            let body = &body;
            async move {
                let response = self.transport.post_json(url, body).await.inspect_err(|e| {
                    warn!(url = %url, attempt, error = %e, "Relay attempt failed");
                })?;

                if response.is_success() {
                    Ok(response.status)
                } else {
                    Err(RelayError::Rejected {
                        status: response.status,
                        body: preview(&response.body, BODY_PREVIEW_CHARS).to_string(),
                    })
                }
            }
        })
        .await;

        let attempts = result.attempts();
        match &result {
            RetryResult::Success { value, .. } => {
                info!(url = %url, status = value, attempts, "Relayed event to internal node");
            }
            RetryResult::PermanentError { error, .. } => {
                warn!(url = %url, attempts, error = %error, "Internal node rejected relayed event");
            }
            RetryResult::ExhaustedRetries { last_error, .. } => {
                error!(url = %url, attempts, error = %last_error, "Relay failed after all attempts");
            }
        }
        result.into_result().map(|_| ())
    }

    /// Like [`RelayClient::send`], reduced to success or failure.
    pub async fn relay(&self, event: &CanonicalEvent) -> bool {
        self.send(event).await.is_ok()
    }
}
