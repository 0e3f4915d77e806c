//! One orchestration unit: materialize the workspace, then run the tool.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use super::command::{CommandRunner, ProcessRunner};
use super::invoke::{InvocationOutcome, ReviewInvoker};
use super::materialize::{CheckoutState, MaterializeError, RepoMaterializer, RepoWorkspace};
use crate::config::{ConfigError, ReviewConfig};
use crate::webhooks::PullRequestRef;

/// Why a unit did not complete successfully.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("materialization failed: {0}")]
    Materialize(#[from] MaterializeError),

    #[error("review tool {outcome}")]
    Tool {
        workspace: RepoWorkspace,
        outcome: InvocationOutcome,
    },
}

/// Everything needed to review one pull request.
pub struct ReviewPipeline<R = ProcessRunner> {
    materializer: RepoMaterializer<R>,
    invoker: ReviewInvoker<R>,
}

impl ReviewPipeline<ProcessRunner> {
    /// Creates a pipeline that runs real processes.
    pub fn from_config(config: &ReviewConfig) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(ProcessRunner))
    }
}

impl<R: CommandRunner> ReviewPipeline<R> {
    pub fn new(config: &ReviewConfig, runner: Arc<R>) -> Result<Self, ConfigError> {
        Ok(Self {
            materializer: RepoMaterializer::new(config, Arc::clone(&runner)),
            invoker: ReviewInvoker::new(config, runner)?,
        })
    }

    pub fn invoker(&self) -> &ReviewInvoker<R> {
        &self.invoker
    }

    /// Reviews `pr`, returning the workspace the tool ran in.
    #[instrument(skip_all, fields(repo = %pr.repo, pr = %pr.number, sha = %pr.head_sha.short()))]
    pub async fn run(&self, pr: &PullRequestRef) -> Result<RepoWorkspace, ReviewError> {
        let workspace = self.materializer.materialize(&pr.repo, &pr.head_sha).await?;
        if workspace.checkout == CheckoutState::StaleBestEffort {
            warn!("Reviewing a checkout that does not match the pull request head");
        }

        let outcome = self
            .invoker
            .invoke(&workspace.working_dir, Some(pr))
            .await;
        if !outcome.is_success() {
            return Err(ReviewError::Tool { workspace, outcome });
        }

        info!(working_dir = %workspace.working_dir.display(), "Review completed");
        Ok(workspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PinnedRepoConfig;
    use crate::review::command::CommandSpec;
    use crate::review::command::tests::{FakeRunner, exited};
    use crate::review::materialize::WorkspaceOrigin;
    use crate::types::{PrNumber, RepoName, Sha};
    use tempfile::TempDir;

    fn pr() -> PullRequestRef {
        PullRequestRef {
            repo: RepoName::new("owner/repo"),
            number: PrNumber(12),
            head_sha: Sha::new("feedface"),
            base_sha: Sha::new(""),
            action: "synchronize".to_string(),
        }
    }

    fn pinned_config(local: &TempDir) -> ReviewConfig {
        ReviewConfig {
            pinned: PinnedRepoConfig {
                path: Some(local.path().to_path_buf()),
                ..PinnedRepoConfig::default()
            },
            ..ReviewConfig::default()
        }
    }

    #[tokio::test]
    async fn tool_runs_in_materialized_workspace() {
        let local = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(|_: &CommandSpec| exited(0)));
        let pipeline = ReviewPipeline::new(&pinned_config(&local), Arc::clone(&runner)).unwrap();

        let workspace = pipeline.run(&pr()).await.unwrap();

        assert_eq!(workspace.origin, WorkspaceOrigin::PinnedLocal);
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "claude");
        assert_eq!(calls[0].cwd.as_deref(), Some(local.path()));
    }

    #[tokio::test]
    async fn tool_failure_is_reported_with_workspace() {
        let local = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(|_: &CommandSpec| exited(1)));
        let pipeline = ReviewPipeline::new(&pinned_config(&local), runner).unwrap();

        match pipeline.run(&pr()).await {
            Err(ReviewError::Tool { workspace, outcome }) => {
                assert_eq!(workspace.root, local.path());
                assert_eq!(outcome, InvocationOutcome::Failed { exit_code: Some(1) });
            }
            other => panic!("expected tool failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn materialization_failure_skips_tool() {
        let scratch = TempDir::new().unwrap();
        let config = ReviewConfig {
            scratch_root: scratch.path().to_path_buf(),
            ..ReviewConfig::default()
        };
        let runner = Arc::new(FakeRunner::new(|_: &CommandSpec| exited(1)));
        let pipeline = ReviewPipeline::new(&config, Arc::clone(&runner)).unwrap();

        let err = pipeline.run(&pr()).await.unwrap_err();

        assert!(matches!(
            err,
            ReviewError::Materialize(MaterializeError::CloneFailed { .. })
        ));
        let lines = runner.command_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("gh repo clone"));
    }
}
