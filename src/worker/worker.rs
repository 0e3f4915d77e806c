//! Per-repo event loop for running reviews.
//!
//! Each repository gets a dedicated worker that runs its reviews one after
//! another. Two reviews of the same repository would otherwise race on the
//! same clone directory.
//!
//! # Supervision
//!
//! Every orchestration unit runs in its own spawned task. The worker awaits
//! the task's `JoinHandle`, so a unit that fails, panics or is cancelled is
//! logged here and the worker carries on with the next job. Nothing a unit
//! does can take down the worker or the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::review::{CommandRunner, ReviewPipeline};
use crate::types::RepoName;

use super::message::{ReviewJob, WorkerMessage};

/// How a single orchestration unit ended, as seen by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Completed,
    Failed,
    Panicked,
    Cancelled,
}

/// Default time a worker waits for work before exiting.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Serial executor of reviews for one repository.
pub struct RepoWorker<R> {
    repo: RepoName,
    pipeline: Arc<ReviewPipeline<R>>,
    idle_timeout: Duration,
}

impl<R: CommandRunner + 'static> RepoWorker<R> {
    pub fn new(repo: RepoName, pipeline: Arc<ReviewPipeline<R>>) -> Self {
        Self {
            repo,
            pipeline,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Runs the worker's event loop until shutdown or idle expiry.
    ///
    /// Exits when the shutdown token is cancelled, a
    /// [`WorkerMessage::Shutdown`] arrives, every sender is dropped, or no
    /// job arrives for the idle timeout. On idle expiry the queue is closed
    /// first and jobs that made it in are still run; senders then see a
    /// closed channel.
    #[instrument(skip_all, fields(repo = %self.repo))]
    pub async fn run(self, mut rx: mpsc::Receiver<WorkerMessage>, shutdown: CancellationToken) {
        info!("Worker event loop started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping worker");
                    break;
                }

                msg = rx.recv() => {
                    match msg {
                        Some(WorkerMessage::Review(job)) => {
                            self.run_unit(job, &shutdown).await;
                        }
                        Some(WorkerMessage::Shutdown) => {
                            info!("Shutdown message received");
                            break;
                        }
                        None => {
                            info!("Message channel closed");
                            break;
                        }
                    }
                }

                _ = tokio::time::sleep(self.idle_timeout) => {
                    rx.close();
                    while let Some(msg) = rx.recv().await {
                        if shutdown.is_cancelled() {
                            break;
                        }
                        if let WorkerMessage::Review(job) = msg {
                            self.run_unit(job, &shutdown).await;
                        }
                    }
                    info!(idle_for = ?self.idle_timeout, "Worker idle, exiting");
                    break;
                }
            }
        }
    }

    /// Runs one unit in its own task and reports how it ended.
    ///
    /// Cancelling `shutdown` aborts the unit. Its processes are killed when
    /// the task is dropped.
    pub async fn run_unit(&self, job: ReviewJob, shutdown: &CancellationToken) -> UnitOutcome {
        let pr = job.pr;
        debug!(
            pr = %pr.number,
            queued_for = ?job.accepted_at.elapsed(),
            "Starting review unit"
        );

        let pipeline = Arc::clone(&self.pipeline);
        let unit_pr = pr.clone();
        let mut task = tokio::spawn(async move { pipeline.run(&unit_pr).await });

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = shutdown.cancelled() => {
                task.abort();
                task.await
            }
        };

        match joined {
            Ok(Ok(workspace)) => {
                info!(
                    pr = %pr.number,
                    sha = %pr.head_sha.short(),
                    checkout = ?workspace.checkout,
                    "Review unit completed"
                );
                UnitOutcome::Completed
            }
            Ok(Err(e)) => {
                error!(pr = %pr.number, error = %e, "Review unit failed");
                UnitOutcome::Failed
            }
            Err(e) if e.is_panic() => {
                error!(pr = %pr.number, "Review unit panicked");
                UnitOutcome::Panicked
            }
            Err(_) => {
                warn!(pr = %pr.number, "Review unit cancelled");
                UnitOutcome::Cancelled
            }
        }
    }
}
