//! Worker message types for async communication.

use std::time::Instant;

use crate::webhooks::PullRequestRef;

/// A pull request review waiting in a worker's queue.
#[derive(Debug, Clone)]
pub struct ReviewJob {
    pub pr: PullRequestRef,

    /// When the trigger was accepted, for queue latency in logs.
    pub accepted_at: Instant,
}

impl ReviewJob {
    pub fn new(pr: PullRequestRef) -> Self {
        Self {
            pr,
            accepted_at: Instant::now(),
        }
    }
}

/// Messages that can be sent to a per-repo worker.
///
/// Workers receive these messages via `tokio::sync::mpsc` and process them
/// one at a time, so reviews of the same repository never overlap.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run one orchestration unit.
    Review(ReviewJob),

    /// Finish the current unit (if any) and exit the event loop.
    Shutdown,
}
