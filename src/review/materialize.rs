//! Producing a working directory that contains the commit under review.
//!
//! Two sources are supported:
//!
//! - A **pinned** local checkout, configured ahead of time and used as-is.
//!   It is never fetched, reset or deleted here.
//! - A **fresh clone** under the scratch root, recreated from scratch for
//!   every review: `gh repo clone`, then `git checkout <head_sha>`, fetching
//!   the commit explicitly if the clone does not contain it.
//!
//! When the head commit cannot be checked out the clone's default branch is
//! reviewed instead, and the workspace says so ([`CheckoutState::StaleBestEffort`]).
//! With `strict_checkout` enabled that situation is an error instead.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::command::{CommandRunner, CommandSpec};
use crate::config::ReviewConfig;
use crate::text::preview;
use crate::types::{RepoName, Sha};

/// Characters of git/gh stderr kept in errors and logs.
const STDERR_PREVIEW_CHARS: usize = 500;

/// Errors that abort materialization.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// The repository name would not map to a directory under the scratch root.
    #[error("repository name {0:?} cannot be used as a directory name")]
    UnsafeRepoName(String),

    /// The configured subdirectory does not exist in the pinned checkout.
    #[error("working subdirectory {} does not exist", path.display())]
    SubdirMissing { path: PathBuf },

    /// Preparing the clone destination failed.
    #[error("failed to prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `gh repo clone` failed, timed out or could not be started.
    #[error("failed to clone {repo}: {reason}")]
    CloneFailed { repo: RepoName, reason: String },

    /// The head commit could not be checked out and strict checkout is on.
    #[error("failed to check out {sha} in {repo}: {reason}")]
    CheckoutFailed {
        repo: RepoName,
        sha: Sha,
        reason: String,
    },
}

/// Result type for materialization.
pub type Result<T> = std::result::Result<T, MaterializeError>;

/// Where a workspace came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceOrigin {
    PinnedLocal,
    Cloned,
}

/// How the workspace relates to the requested head commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutState {
    /// The head commit is checked out.
    Exact,

    /// Checking out the head commit failed; the clone's default branch is
    /// checked out instead.
    StaleBestEffort,

    /// A pinned checkout, used in whatever state it is in.
    Pinned,
}

/// A directory ready for the review tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoWorkspace {
    /// Root of the repository checkout.
    pub root: PathBuf,

    /// Directory the review tool is started in. Either `root` or a
    /// directory below it.
    pub working_dir: PathBuf,

    pub origin: WorkspaceOrigin,
    pub checkout: CheckoutState,
}

/// Resolves or creates the checkout for a pull request.
pub struct RepoMaterializer<R> {
    config: ReviewConfig,
    runner: Arc<R>,
}

impl<R: CommandRunner> RepoMaterializer<R> {
    pub fn new(config: &ReviewConfig, runner: Arc<R>) -> Self {
        Self {
            config: config.clone(),
            runner,
        }
    }

    /// Produces a workspace for `repo` at `head_sha`.
    ///
    /// The pinned checkout is used when it is configured, exists, and its
    /// name filter (if any) matches `repo`. Otherwise the repository is
    /// cloned fresh.
    #[instrument(skip(self), fields(repo = %repo, sha = %head_sha.short()))]
    pub async fn materialize(&self, repo: &RepoName, head_sha: &Sha) -> Result<RepoWorkspace> {
        if let Some(workspace) = self.pinned_workspace(repo).await? {
            info!(
                working_dir = %workspace.working_dir.display(),
                "Using pinned local checkout"
            );
            return Ok(workspace);
        }

        self.clone_workspace(repo, head_sha).await
    }

    /// Returns the pinned workspace, or `None` if the pinned checkout does
    /// not apply to `repo`.
    async fn pinned_workspace(&self, repo: &RepoName) -> Result<Option<RepoWorkspace>> {
        let pinned = &self.config.pinned;
        let Some(path) = &pinned.path else {
            return Ok(None);
        };

        if !is_dir(path).await {
            warn!(path = %path.display(), "Pinned checkout is not a directory, cloning instead");
            return Ok(None);
        }

        if let Some(filter) = &pinned.name_filter
            && !repo.matches_filter(filter)
        {
            debug!(filter = %filter, "Pinned checkout is for another repository");
            return Ok(None);
        }

        let working_dir = if let Some(dir) = &pinned.working_dir
            && is_dir(dir).await
        {
            dir.clone()
        } else {
            if let Some(dir) = &pinned.working_dir {
                warn!(dir = %dir.display(), "Configured working directory does not exist, ignoring");
            }
            match &self.config.subdir {
                Some(subdir) => {
                    let candidate = path.join(subdir);
                    if !is_dir(&candidate).await {
                        return Err(MaterializeError::SubdirMissing { path: candidate });
                    }
                    candidate
                }
                None => path.clone(),
            }
        };

        Ok(Some(RepoWorkspace {
            root: path.clone(),
            working_dir,
            origin: WorkspaceOrigin::PinnedLocal,
            checkout: CheckoutState::Pinned,
        }))
    }

    async fn clone_workspace(&self, repo: &RepoName, head_sha: &Sha) -> Result<RepoWorkspace> {
        let dir_name = repo.dir_name();
        if dir_name.is_empty() || dir_name == "." || dir_name == ".." {
            return Err(MaterializeError::UnsafeRepoName(repo.to_string()));
        }

        let scratch_root = &self.config.scratch_root;
        tokio::fs::create_dir_all(scratch_root)
            .await
            .map_err(|source| MaterializeError::Io {
                path: scratch_root.clone(),
                source,
            })?;

        let dest = scratch_root.join(&dir_name);
        match tokio::fs::remove_dir_all(&dest).await {
            Ok(()) => debug!(dest = %dest.display(), "Removed previous clone"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(MaterializeError::Io { path: dest, source }),
        }

        info!(dest = %dest.display(), "Cloning repository");
        let clone = CommandSpec::new("gh")
            .args(["repo", "clone", repo.as_str()])
            .arg(dest.to_string_lossy())
            .envs(self.config.credentials.env_vars())
            .env("GIT_TERMINAL_PROMPT", "0")
            .timeout(self.config.clone_timeout);

        let output = self
            .runner
            .run(clone)
            .await
            .map_err(|e| MaterializeError::CloneFailed {
                repo: repo.clone(),
                reason: e.to_string(),
            })?;
        if !output.success() {
            return Err(MaterializeError::CloneFailed {
                repo: repo.clone(),
                reason: format!(
                    "exit code {:?}: {}",
                    output.exit_code,
                    preview(output.stderr.trim(), STDERR_PREVIEW_CHARS)
                ),
            });
        }

        let checkout = match self.checkout(&dest, head_sha).await {
            Ok(()) => CheckoutState::Exact,
            Err(reason) if self.config.strict_checkout => {
                return Err(MaterializeError::CheckoutFailed {
                    repo: repo.clone(),
                    sha: head_sha.clone(),
                    reason,
                });
            }
            Err(reason) => {
                warn!(
                    reason = %reason,
                    "Could not check out head commit, reviewing default branch"
                );
                CheckoutState::StaleBestEffort
            }
        };

        let working_dir = match &self.config.subdir {
            Some(subdir) => {
                let candidate = dest.join(subdir);
                if is_dir(&candidate).await {
                    candidate
                } else {
                    warn!(subdir = %subdir.display(), "Subdirectory not in clone, using clone root");
                    dest.clone()
                }
            }
            None => dest.clone(),
        };

        Ok(RepoWorkspace {
            root: dest,
            working_dir,
            origin: WorkspaceOrigin::Cloned,
            checkout,
        })
    }

    /// Checks out `sha`, fetching it once if the clone lacks it.
    async fn checkout(&self, dest: &Path, sha: &Sha) -> std::result::Result<(), String> {
        if self.git(dest, &["checkout", sha.as_str()]).await.is_ok() {
            return Ok(());
        }

        debug!("Head commit not in clone, fetching it");
        if let Err(reason) = self.git(dest, &["fetch", "origin", sha.as_str()]).await {
            debug!(reason = %reason, "Fetch of head commit failed");
        }
        self.git(dest, &["checkout", sha.as_str()]).await
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> std::result::Result<(), String> {
        let spec = CommandSpec::new("git")
            .args(args.iter().copied())
            .current_dir(dir)
            .envs(self.config.credentials.env_vars())
            .env("GIT_TERMINAL_PROMPT", "0")
            .timeout(self.config.git_timeout);

        match self.runner.run(spec).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(format!(
                "git {} exited with {:?}: {}",
                args.join(" "),
                output.exit_code,
                preview(output.stderr.trim(), STDERR_PREVIEW_CHARS)
            )),
            Err(e) => Err(e.to_string()),
        }
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PinnedRepoConfig;
    use crate::review::command::tests::{FakeRunner, exited};
    use crate::review::command::{CommandError, CommandOutput};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const HEAD: &str = "0123456789abcdef0123456789abcdef01234567";

    fn settings(scratch: &Path) -> ReviewConfig {
        ReviewConfig {
            scratch_root: scratch.to_path_buf(),
            ..ReviewConfig::default()
        }
    }

    fn pinned(path: &Path, filter: Option<&str>) -> PinnedRepoConfig {
        PinnedRepoConfig {
            path: Some(path.to_path_buf()),
            name_filter: filter.map(str::to_string),
            working_dir: None,
        }
    }

    /// Fake `gh repo clone` by creating the destination directory.
    fn clone_ok(spec: &CommandSpec) -> std::result::Result<CommandOutput, CommandError> {
        if spec.program == "gh" {
            std::fs::create_dir_all(&spec.args[3]).unwrap();
        }
        exited(0)
    }

    fn materializer<F>(config: &ReviewConfig, respond: F) -> RepoMaterializer<FakeRunner<F>>
    where
        F: Fn(&CommandSpec) -> std::result::Result<CommandOutput, CommandError> + Send + Sync,
    {
        RepoMaterializer::new(config, Arc::new(FakeRunner::new(respond)))
    }

    fn repo() -> RepoName {
        RepoName::new("owner/repo")
    }

    fn head() -> Sha {
        Sha::new(HEAD)
    }

    // ─── Pinned checkout ───

    #[tokio::test]
    async fn pinned_with_matching_filter_skips_clone() {
        let scratch = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let mut config = settings(scratch.path());
        config.pinned = pinned(local.path(), Some("owner/repo"));

        let m = materializer(&config, clone_ok);
        let workspace = m.materialize(&repo(), &head()).await.unwrap();

        assert_eq!(workspace.origin, WorkspaceOrigin::PinnedLocal);
        assert_eq!(workspace.checkout, CheckoutState::Pinned);
        assert_eq!(workspace.working_dir, local.path());
        assert!(m.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn pinned_filter_matches_underscore_form() {
        let scratch = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let mut config = settings(scratch.path());
        config.pinned = pinned(local.path(), Some("owner_repo"));

        let m = materializer(&config, clone_ok);
        let workspace = m.materialize(&repo(), &head()).await.unwrap();

        assert_eq!(workspace.origin, WorkspaceOrigin::PinnedLocal);
        assert!(m.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn pinned_without_filter_applies_to_every_repo() {
        let scratch = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let mut config = settings(scratch.path());
        config.pinned = pinned(local.path(), None);

        let m = materializer(&config, clone_ok);
        let workspace = m
            .materialize(&RepoName::new("someone/else"), &head())
            .await
            .unwrap();

        assert_eq!(workspace.origin, WorkspaceOrigin::PinnedLocal);
        assert!(m.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn pinned_with_other_filter_clones() {
        let scratch = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let mut config = settings(scratch.path());
        config.pinned = pinned(local.path(), Some("owner/other"));

        let m = materializer(&config, clone_ok);
        let workspace = m.materialize(&repo(), &head()).await.unwrap();

        assert_eq!(workspace.origin, WorkspaceOrigin::Cloned);
        let calls = m.runner.calls();
        assert_eq!(calls[0].program, "gh");
        assert_eq!(calls[0].args[..3], ["repo", "clone", "owner/repo"]);
    }

    #[tokio::test]
    async fn missing_pinned_path_clones() {
        let scratch = TempDir::new().unwrap();
        let mut config = settings(scratch.path());
        config.pinned = pinned(&scratch.path().join("absent"), None);

        let m = materializer(&config, clone_ok);
        let workspace = m.materialize(&repo(), &head()).await.unwrap();

        assert_eq!(workspace.origin, WorkspaceOrigin::Cloned);
    }

    #[tokio::test]
    async fn pinned_working_dir_override_wins() {
        let scratch = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        std::fs::create_dir(local.path().join("app")).unwrap();

        let mut config = settings(scratch.path());
        config.pinned = pinned(local.path(), None);
        config.pinned.working_dir = Some(elsewhere.path().to_path_buf());
        config.subdir = Some(PathBuf::from("app"));

        let m = materializer(&config, clone_ok);
        let workspace = m.materialize(&repo(), &head()).await.unwrap();

        assert_eq!(workspace.root, local.path());
        assert_eq!(workspace.working_dir, elsewhere.path());
    }

    #[tokio::test]
    async fn missing_working_dir_override_falls_back_to_subdir() {
        let scratch = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        std::fs::create_dir(local.path().join("app")).unwrap();

        let mut config = settings(scratch.path());
        config.pinned = pinned(local.path(), None);
        config.pinned.working_dir = Some(local.path().join("nope"));
        config.subdir = Some(PathBuf::from("app"));

        let m = materializer(&config, clone_ok);
        let workspace = m.materialize(&repo(), &head()).await.unwrap();

        assert_eq!(workspace.working_dir, local.path().join("app"));
    }

    #[tokio::test]
    async fn pinned_missing_subdir_is_an_error() {
        let scratch = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let mut config = settings(scratch.path());
        config.pinned = pinned(local.path(), None);
        config.subdir = Some(PathBuf::from("client"));

        let m = materializer(&config, clone_ok);
        let err = m.materialize(&repo(), &head()).await.unwrap_err();

        assert!(matches!(err, MaterializeError::SubdirMissing { .. }));
        assert!(m.runner.calls().is_empty());
    }

    // ─── Fresh clone ───

    #[tokio::test]
    async fn clone_then_checkout() {
        let scratch = TempDir::new().unwrap();
        let m = materializer(&settings(scratch.path()), clone_ok);

        let workspace = m.materialize(&repo(), &head()).await.unwrap();

        let dest = scratch.path().join("owner_repo");
        assert_eq!(workspace.root, dest);
        assert_eq!(workspace.working_dir, dest);
        assert_eq!(workspace.checkout, CheckoutState::Exact);
        assert_eq!(
            m.runner.command_lines(),
            vec![
                format!("gh repo clone owner/repo {}", dest.display()),
                format!("git checkout {}", HEAD),
            ]
        );

        let calls = m.runner.calls();
        assert_eq!(calls[0].timeout, Duration::from_secs(120));
        assert_eq!(calls[1].timeout, Duration::from_secs(60));
        assert_eq!(calls[1].cwd.as_deref(), Some(dest.as_path()));
    }

    #[tokio::test]
    async fn existing_destination_is_replaced() {
        let scratch = TempDir::new().unwrap();
        let dest = scratch.path().join("owner_repo");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("leftover.txt"), "old").unwrap();

        let m = materializer(&settings(scratch.path()), clone_ok);
        m.materialize(&repo(), &head()).await.unwrap();

        assert!(dest.is_dir());
        assert!(!dest.join("leftover.txt").exists());
    }

    #[tokio::test]
    async fn missing_commit_is_fetched() {
        let scratch = TempDir::new().unwrap();
        let checkouts = AtomicU32::new(0);
        let m = materializer(&settings(scratch.path()), move |spec: &CommandSpec| {
            if spec.args.first().map(String::as_str) == Some("checkout")
                && checkouts.fetch_add(1, Ordering::SeqCst) == 0
            {
                return exited(1);
            }
            clone_ok(spec)
        });

        let workspace = m.materialize(&repo(), &head()).await.unwrap();

        assert_eq!(workspace.checkout, CheckoutState::Exact);
        let lines = m.runner.command_lines();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2], format!("git fetch origin {}", HEAD));
        assert_eq!(lines[3], format!("git checkout {}", HEAD));
    }

    #[tokio::test]
    async fn failed_checkout_reviews_default_branch() {
        let scratch = TempDir::new().unwrap();
        let m = materializer(&settings(scratch.path()), |spec: &CommandSpec| {
            if spec.program == "git" {
                return exited(128);
            }
            clone_ok(spec)
        });

        let workspace = m.materialize(&repo(), &head()).await.unwrap();

        assert_eq!(workspace.origin, WorkspaceOrigin::Cloned);
        assert_eq!(workspace.checkout, CheckoutState::StaleBestEffort);
        assert_eq!(m.runner.calls().len(), 4);
    }

    #[tokio::test]
    async fn failed_checkout_is_fatal_when_strict() {
        let scratch = TempDir::new().unwrap();
        let mut config = settings(scratch.path());
        config.strict_checkout = true;
        let m = materializer(&config, |spec: &CommandSpec| {
            if spec.program == "git" {
                return exited(128);
            }
            clone_ok(spec)
        });

        let err = m.materialize(&repo(), &head()).await.unwrap_err();
        assert!(matches!(err, MaterializeError::CheckoutFailed { .. }));
    }

    #[tokio::test]
    async fn failed_clone_aborts() {
        let scratch = TempDir::new().unwrap();
        let m = materializer(&settings(scratch.path()), |_: &CommandSpec| {
            Ok(CommandOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "GraphQL: Could not resolve to a Repository".to_string(),
            })
        });

        let err = m.materialize(&repo(), &head()).await.unwrap_err();

        match err {
            MaterializeError::CloneFailed { repo, reason } => {
                assert_eq!(repo.as_str(), "owner/repo");
                assert!(reason.contains("Could not resolve"));
            }
            other => panic!("expected CloneFailed, got {other:?}"),
        }
        assert_eq!(m.runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn clone_timeout_aborts() {
        let scratch = TempDir::new().unwrap();
        let m = materializer(&settings(scratch.path()), |spec: &CommandSpec| {
            Err(CommandError::TimedOut {
                program: spec.program.clone(),
                timeout: spec.timeout,
            })
        });

        let err = m.materialize(&repo(), &head()).await.unwrap_err();
        assert!(matches!(err, MaterializeError::CloneFailed { .. }));
    }

    #[tokio::test]
    async fn clone_uses_subdir_when_present() {
        let scratch = TempDir::new().unwrap();
        let mut config = settings(scratch.path());
        config.subdir = Some(PathBuf::from("client"));
        let m = materializer(&config, |spec: &CommandSpec| {
            if spec.program == "gh" {
                std::fs::create_dir_all(Path::new(&spec.args[3]).join("client")).unwrap();
            }
            exited(0)
        });

        let workspace = m.materialize(&repo(), &head()).await.unwrap();
        assert_eq!(
            workspace.working_dir,
            scratch.path().join("owner_repo").join("client")
        );
    }

    #[tokio::test]
    async fn clone_without_subdir_uses_root() {
        let scratch = TempDir::new().unwrap();
        let mut config = settings(scratch.path());
        config.subdir = Some(PathBuf::from("client"));
        let m = materializer(&config, clone_ok);

        let workspace = m.materialize(&repo(), &head()).await.unwrap();
        assert_eq!(workspace.working_dir, scratch.path().join("owner_repo"));
    }

    #[tokio::test]
    async fn credentials_reach_clone_and_git() {
        let scratch = TempDir::new().unwrap();
        let mut config = settings(scratch.path());
        config.credentials.gh_token = Some("ghp_test".to_string());
        let m = materializer(&config, clone_ok);

        m.materialize(&repo(), &head()).await.unwrap();

        for call in m.runner.calls() {
            assert!(
                call.env
                    .contains(&("GH_TOKEN".to_string(), "ghp_test".to_string()))
            );
            assert!(
                call.env
                    .contains(&("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()))
            );
        }
    }

    #[tokio::test]
    async fn dot_dot_repo_is_rejected_before_touching_disk() {
        let scratch = TempDir::new().unwrap();
        let m = materializer(&settings(scratch.path()), clone_ok);

        let err = m
            .materialize(&RepoName::new(".."), &head())
            .await
            .unwrap_err();

        assert!(matches!(err, MaterializeError::UnsafeRepoName(_)));
        assert!(m.runner.calls().is_empty());
        assert!(scratch.path().is_dir());
    }
}
