//! Webhook handling for GitHub events.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA256)
//! - Normalization of heterogeneous payloads into a [`CanonicalEvent`]
//! - Pull request identity extraction for the review path

pub mod payload;
pub mod pull_request;
pub mod signature;

pub use payload::{CanonicalEvent, ParseError, parse_payload};
pub use pull_request::{PullRequestRef, extract_pull_request};
pub use signature::{
    compute_signature, format_signature_header, parse_signature_header, verify_signature,
};
