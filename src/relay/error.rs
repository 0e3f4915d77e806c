//! Relay error types.
//!
//! The distinction that matters is whether the internal node answered:
//!
//! - **Transport** errors mean no answer arrived (connection refused, DNS,
//!   timeout). These are retried.
//! - **Rejected** means the internal node answered with a non-2xx status.
//!   Asking again would get the same answer, so this is terminal.

use thiserror::Error;

/// Errors from relaying a canonical event to the internal node.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No internal target URL is configured.
    #[error("relay target is not configured")]
    Unconfigured,

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The internal node answered with a non-2xx status.
    #[error("internal node answered HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The event could not be encoded as JSON.
    #[error("failed to encode relay body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RelayError {
    /// Returns true if the error is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_transient() {
        assert!(RelayError::Transport("reset".to_string()).is_transient());
        assert!(!RelayError::Unconfigured.is_transient());
        assert!(
            !RelayError::Rejected {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
    }
}
