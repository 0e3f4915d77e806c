//! Trigger filtering and routing of reviews to per-repo workers.
//!
//! The dispatcher decides whether a relayed event warrants a review at all,
//! and if so hands the pull request to the worker for its repository,
//! creating the worker on demand. It never waits for a review to run: the
//! HTTP handler gets its answer as soon as the job is queued.
//!
//! # Architecture
//!
//! ```text
//!                                       ┌──────────────────┐
//!                                  ┌──► │  repo A queue    │ ──► worker A ──► unit, unit, ...
//! ┌─────────────┐   ┌──────────┐   │    └──────────────────┘
//! │   axum      │──►│ classify │───┤
//! │  (trigger)  │   │ + route  │   │    ┌──────────────────┐
//! └─────────────┘   └──────────┘   └──► │  repo B queue    │ ──► worker B ──► unit, ...
//!       │                               └──────────────────┘
//!       │ returns 200 skipped / 202 accepted
//!       ▼
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::review::{CommandRunner, ProcessRunner, ReviewPipeline};
use crate::types::RepoName;
use crate::webhooks::{PullRequestRef, extract_pull_request};

use super::message::{ReviewJob, WorkerMessage};
use super::worker::{DEFAULT_IDLE_TIMEOUT, RepoWorker};

/// Errors that can occur during dispatch operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatcher has been shut down.
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    /// The repository's queue is full.
    #[error("review queue for {0} is full")]
    QueueFull(RepoName),

    /// Failed to send message to worker.
    #[error("worker for {0} is gone: channel closed")]
    ChannelClosed(RepoName),
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Why a trigger did not lead to a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotPullRequest,
    Closed,
    NoReference,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotPullRequest => "not a pull request",
            SkipReason::Closed => "pull request closed",
            SkipReason::NoReference => "no reference",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Skipped(SkipReason),
    Accepted(PullRequestRef),
}

/// Applies the trigger filtering policy.
///
/// In order: anything but a `pull_request` event is skipped; a closed pull
/// request is skipped; a payload that does not identify a pull request at a
/// head commit is skipped. The action is read from the payload, falling back
/// to `action_hint` when the payload has none.
pub fn classify(
    event_type: &str,
    payload: &Value,
    action_hint: Option<&str>,
) -> std::result::Result<PullRequestRef, SkipReason> {
    if event_type != "pull_request" {
        return Err(SkipReason::NotPullRequest);
    }

    let action = payload
        .get("action")
        .and_then(Value::as_str)
        .or(action_hint)
        .unwrap_or_default();
    if action == "closed" {
        return Err(SkipReason::Closed);
    }

    extract_pull_request(payload).ok_or(SkipReason::NoReference)
}

/// Channel buffer size for worker messages.
const WORKER_CHANNEL_BUFFER: usize = 100;

/// Per-repo worker handle.
struct WorkerHandle {
    /// Channel for sending messages to the worker.
    tx: mpsc::Sender<WorkerMessage>,

    /// Handle to the worker's async task.
    task: JoinHandle<()>,

    /// Cancellation token for this worker.
    cancel: CancellationToken,
}

/// Routes accepted pull requests to per-repo workers.
///
/// The dispatcher is thread-safe and can be shared across multiple HTTP handler
/// tasks. It creates workers on demand as async tasks and routes jobs via
/// message channels.
///
/// Workers are keyed by [`RepoName::dir_name`], the same key that names the
/// clone directory, so names that share a directory share a worker. A worker
/// that went idle closes its channel; its entry is replaced on next use.
pub struct ReviewDispatcher<R = ProcessRunner> {
    pipeline: Arc<ReviewPipeline<R>>,

    /// Active workers, keyed by clone directory name.
    workers: RwLock<HashMap<String, WorkerHandle>>,

    /// How long a worker waits for work before exiting.
    idle_timeout: Duration,

    /// Global shutdown token.
    shutdown: CancellationToken,
}

impl<R: CommandRunner + 'static> ReviewDispatcher<R> {
    pub fn new(pipeline: Arc<ReviewPipeline<R>>) -> Self {
        Self::new_with_shutdown(pipeline, CancellationToken::new())
    }

    /// Creates a dispatcher whose workers stop when `shutdown` is cancelled.
    pub fn new_with_shutdown(pipeline: Arc<ReviewPipeline<R>>, shutdown: CancellationToken) -> Self {
        ReviewDispatcher {
            pipeline,
            workers: RwLock::new(HashMap::new()),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            shutdown,
        }
    }

    /// Sets how long a worker waits for work before exiting.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Returns the shutdown token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Classifies a trigger and queues a review if it warrants one.
    #[instrument(skip(self, payload, action_hint))]
    pub async fn handle_trigger(
        &self,
        event_type: &str,
        payload: &Value,
        action_hint: Option<&str>,
    ) -> Result<Disposition> {
        match classify(event_type, payload, action_hint) {
            Err(reason) => {
                info!(reason = %reason, "Skipping trigger");
                Ok(Disposition::Skipped(reason))
            }
            Ok(pr) => {
                self.dispatch(pr.clone()).await?;
                Ok(Disposition::Accepted(pr))
            }
        }
    }

    /// Queues a review of `pr` on its repository's worker.
    ///
    /// Never waits for queue space: a full queue is reported as
    /// [`DispatchError::QueueFull`].
    #[instrument(skip_all, fields(repo = %pr.repo, pr = %pr.number, sha = %pr.head_sha.short()))]
    pub async fn dispatch(&self, pr: PullRequestRef) -> Result<()> {
        let repo = pr.repo.clone();
        let mut message = WorkerMessage::Review(ReviewJob::new(pr));

        // A worker may expire between lookup and send. Its closed channel
        // hands the job back, and the second lookup spawns a fresh worker.
        for _ in 0..2 {
            let tx = self.get_or_spawn_worker(&repo).await?;
            match tx.try_send(message) {
                Ok(()) => {
                    info!("Review queued");
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let e = DispatchError::QueueFull(repo);
                    warn!(error = %e, "Could not queue review");
                    return Err(e);
                }
                Err(mpsc::error::TrySendError::Closed(returned)) => {
                    debug!("Worker expired before the job arrived");
                    message = returned;
                }
            }
        }

        let e = DispatchError::ChannelClosed(repo);
        warn!(error = %e, "Could not queue review");
        Err(e)
    }

    /// Gets an existing worker's sender or spawns a new worker task.
    async fn get_or_spawn_worker(&self, repo: &RepoName) -> Result<mpsc::Sender<WorkerMessage>> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }
        let key = repo.dir_name();

        // First, try to get existing worker (read lock)
        {
            let workers = self.workers.read().await;
            if let Some(handle) = workers.get(&key)
                && !handle.tx.is_closed()
            {
                return Ok(handle.tx.clone());
            }
        }

        let mut workers = self.workers.write().await;

        // Double-check after acquiring write lock
        if let Some(handle) = workers.get(&key)
            && !handle.tx.is_closed()
        {
            return Ok(handle.tx.clone());
        }

        // Drop every worker that expired, not just this one.
        workers.retain(|_, handle| !handle.tx.is_closed());

        debug!(repo = %repo, key = %key, active = workers.len(), "Spawning new worker task");
        let worker = RepoWorker::new(repo.clone(), Arc::clone(&self.pipeline))
            .with_idle_timeout(self.idle_timeout);

        let (tx, rx) = mpsc::channel(WORKER_CHANNEL_BUFFER);
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(worker.run(rx, cancel.clone()));

        workers.insert(
            key,
            WorkerHandle {
                tx: tx.clone(),
                task,
                cancel,
            },
        );

        Ok(tx)
    }

    /// Returns the number of live workers.
    #[cfg(test)]
    pub(crate) async fn worker_count(&self) -> usize {
        self.workers
            .read()
            .await
            .values()
            .filter(|handle| !handle.tx.is_closed())
            .count()
    }

    /// Checks if a live worker serves the given repository.
    #[cfg(test)]
    pub(crate) async fn has_worker(&self, repo: &RepoName) -> bool {
        self.workers
            .read()
            .await
            .get(&repo.dir_name())
            .is_some_and(|handle| !handle.tx.is_closed())
    }

    /// Stops every worker and waits for their tasks to exit.
    ///
    /// Running units are aborted. Further dispatches fail with
    /// [`DispatchError::ShuttingDown`].
    pub async fn shutdown_all(&self) {
        info!("Shutting down all workers");
        self.shutdown.cancel();

        let handles: Vec<(String, WorkerHandle)> = self.workers.write().await.drain().collect();
        for (key, handle) in handles {
            trace!(key = %key, "Waiting for worker to stop");
            handle.cancel.cancel();
            let _ = handle.tx.try_send(WorkerMessage::Shutdown);
            if let Err(e) = handle.task.await {
                error!(key = %key, error = %e, "Worker task did not exit cleanly");
            }
        }
    }
}
