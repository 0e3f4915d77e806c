//! Running the review tool against a workspace.
//!
//! The tool is opaque: it is started as `<binary> <args...> <instruction>` in
//! the workspace, does its own review and posts its own comments. All we
//! observe is the exit status and the captured output, which are logged.
//! Nothing here returns an error to the caller; every way the run can end is
//! an [`InvocationOutcome`].

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use super::command::{CommandError, CommandRunner, CommandSpec};
use super::prompt::{PromptError, PromptTemplate, PromptValues, build_instruction};
use crate::config::{ConfigError, ReviewConfig, ToolConfig};
use crate::text::preview;
use crate::webhooks::PullRequestRef;

/// Characters of tool stdout/stderr kept in log lines.
const OUTPUT_PREVIEW_CHARS: usize = 800;

/// How a review tool run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// The tool exited with status 0.
    Succeeded,

    /// The tool exited with a non-zero status, or was killed by a signal
    /// (`exit_code` is then `None`).
    Failed { exit_code: Option<i32> },

    /// The tool ran past its timeout and was killed.
    TimedOut { after: Duration },

    /// The tool could not be started.
    SpawnFailed { reason: String },

    /// The instruction could not be built; no process was started.
    InvalidPrompt(PromptError),
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Succeeded)
    }
}

impl fmt::Display for InvocationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationOutcome::Succeeded => write!(f, "succeeded"),
            InvocationOutcome::Failed {
                exit_code: Some(code),
            } => write!(f, "exited with code {}", code),
            InvocationOutcome::Failed { exit_code: None } => write!(f, "killed by a signal"),
            InvocationOutcome::TimedOut { after } => write!(f, "timed out after {:?}", after),
            InvocationOutcome::SpawnFailed { reason } => write!(f, "failed to start: {}", reason),
            InvocationOutcome::InvalidPrompt(e) => write!(f, "invalid prompt: {}", e),
        }
    }
}

/// Launches the review tool.
pub struct ReviewInvoker<R> {
    tool: ToolConfig,
    template: Option<PromptTemplate>,
    credentials: Vec<(String, String)>,
    runner: Arc<R>,
}

impl<R: CommandRunner> ReviewInvoker<R> {
    /// Creates an invoker, parsing the prompt template if one is enabled.
    pub fn new(config: &ReviewConfig, runner: Arc<R>) -> Result<Self, ConfigError> {
        Ok(Self {
            template: config.tool.template()?,
            tool: config.tool.clone(),
            credentials: config.credentials.env_vars(),
            runner,
        })
    }

    /// Builds the instruction handed to the tool.
    ///
    /// Without a pull request (local runs) the template is skipped and only
    /// the base instruction is used.
    pub fn instruction(&self, pr: Option<&PullRequestRef>) -> Result<String, PromptError> {
        let Some(pr) = pr else {
            return Ok(self.tool.instruction.clone());
        };
        let values = PromptValues {
            repo: &pr.repo,
            pr_number: pr.number,
            head_sha: &pr.head_sha,
            base_sha: &pr.base_sha,
        };
        build_instruction(&self.tool.instruction, self.template.as_ref(), &values)
    }

    /// Builds the full command for a run in `working_dir`.
    pub fn command(
        &self,
        working_dir: &Path,
        pr: Option<&PullRequestRef>,
    ) -> Result<CommandSpec, PromptError> {
        let instruction = self.instruction(pr)?;
        Ok(CommandSpec::new(&self.tool.binary)
            .args(self.tool.args.iter().cloned())
            .arg(instruction)
            .current_dir(working_dir)
            .envs(self.credentials.iter().cloned())
            .timeout(self.tool.timeout))
    }

    /// Runs the review tool in `working_dir` and logs how it went.
    #[instrument(skip_all, fields(dir = %working_dir.display(), pr = ?pr.map(|p| p.number.0)))]
    pub async fn invoke(
        &self,
        working_dir: &Path,
        pr: Option<&PullRequestRef>,
    ) -> InvocationOutcome {
        let spec = match self.command(working_dir, pr) {
            Ok(spec) => spec,
            Err(e) => {
                error!(error = %e, "Refusing to build review command");
                return InvocationOutcome::InvalidPrompt(e);
            }
        };

        info!(binary = %spec.program, timeout = ?spec.timeout, "Starting review tool");

        match self.runner.run(spec).await {
            Ok(output) if output.success() => {
                info!(
                    stdout = %preview(output.stdout.trim(), OUTPUT_PREVIEW_CHARS),
                    "Review tool finished"
                );
                InvocationOutcome::Succeeded
            }
            Ok(output) => {
                warn!(
                    exit_code = ?output.exit_code,
                    stdout = %preview(output.stdout.trim(), OUTPUT_PREVIEW_CHARS),
                    stderr = %preview(output.stderr.trim(), OUTPUT_PREVIEW_CHARS),
                    "Review tool failed"
                );
                InvocationOutcome::Failed {
                    exit_code: output.exit_code,
                }
            }
            Err(CommandError::TimedOut { timeout, .. }) => {
                error!(timeout = ?timeout, "Review tool timed out and was killed");
                InvocationOutcome::TimedOut { after: timeout }
            }
            Err(e) => {
                error!(error = %e, "Review tool could not be run");
                InvocationOutcome::SpawnFailed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
