//! Edge-to-internal relay.
//!
//! After a webhook has been verified and normalized, the edge node POSTs the
//! [`CanonicalEvent`](crate::webhooks::CanonicalEvent) to the internal node.
//! The relay is synchronous with respect to the inbound request: GitHub sees
//! 200 only if the internal node accepted the event.
//!
//! Key features:
//! - Bounded retry with exponential backoff, for transport errors only
//! - Non-2xx answers are terminal
//! - The HTTP layer sits behind [`RelayTransport`] so tests need no network

mod client;
mod error;
mod retry;

pub use client::{HttpTransport, RelayClient, RelayTransport, TransportResponse};
pub use error::RelayError;
pub use retry::{RetryConfig, RetryResult, retry_with_backoff};

#[cfg(test)]
pub(crate) use client::tests::{Outcome, ScriptedTransport};
