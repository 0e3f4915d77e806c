//! Review Relay - Relays signed GitHub webhooks from a public edge node to an
//! internal node that runs automated pull-request reviews.
//!
//! This library provides both nodes: signature verification, payload
//! normalization and relaying on the edge; per-repository dispatch, checkout
//! materialization and review-tool invocation on the internal side.

pub mod config;
pub mod relay;
pub mod review;
pub mod server;
pub mod text;
pub mod types;
pub mod webhooks;
pub mod worker;
