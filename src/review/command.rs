//! Time-bounded external processes.
//!
//! Every process the review path starts (`gh`, `git`, the review tool) goes
//! through a [`CommandRunner`]. The production runner, [`ProcessRunner`],
//! uses `tokio::process` so waiting never blocks a runtime thread, and kills
//! the child when its deadline passes. On Unix each child leads its own
//! process group, and the whole group is killed, so helpers the child started
//! do not outlive it. Tests substitute a runner that records
//! the commands instead of executing them.
//!
//! Arguments are always passed as a vector. Nothing is ever interpreted by a
//! shell.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;

/// A fully described process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Variables added to (or overriding) the inherited environment.
    pub env: Vec<(String, String)>,
    /// Hard ceiling; the process is killed when it is exceeded.
    pub timeout: Duration,
}

impl CommandSpec {
    /// Creates a spec with no arguments, inherited working directory and a
    /// one-minute timeout.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Renders the command line for logs. Environment values are omitted.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) || arg.is_empty() {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Returns true if the process exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Failures that prevented a process from running to completion.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The process could not be started (binary missing, bad cwd, ...).
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting for the process or reading its output failed.
    #[error("failed waiting for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exceeded its timeout and was killed.
    #[error("`{program}` timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
}

/// Runs external processes.
///
/// # Example (mock for testing)
///
/// ```ignore
/// struct Succeeds;
///
/// impl CommandRunner for Succeeds {
///     async fn run(&self, _spec: CommandSpec) -> Result<CommandOutput, CommandError> {
///         Ok(CommandOutput { exit_code: Some(0), ..Default::default() })
///     }
/// }
/// ```
pub trait CommandRunner: Send + Sync {
    /// Runs the process to completion or until its timeout.
    fn run(
        &self,
        spec: CommandSpec,
    ) -> impl Future<Output = Result<CommandOutput, CommandError>> + Send;
}

/// [`CommandRunner`] that spawns real processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, CommandError> {
        let mut command = tokio::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the child on timeout kills it.
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let child = command.spawn().map_err(|source| CommandError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let pid = child.id();

        match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(source)) => Err(CommandError::Wait {
                program: spec.program,
                source,
            }),
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid).await;
                }
                Err(CommandError::TimedOut {
                    program: spec.program,
                    timeout: spec.timeout,
                })
            }
        }
    }
}

/// Sends SIGKILL to the process group led by `pid`.
#[cfg(unix)]
async fn kill_process_group(pid: u32) {
    let result = tokio::process::Command::new("kill")
        .args(["-KILL", "--", &format!("-{pid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::debug!(pid, ?status, "Kill of process group failed"),
        Err(e) => tracing::warn!(pid, error = %e, "Could not run kill for process group"),
    }
}

#[cfg(not(unix))]
async fn kill_process_group(_pid: u32) {}
