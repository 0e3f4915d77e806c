//! Configuration for both nodes.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Environment variables
//! 2. Config file (`--config`, or `review-relay.toml` in the working directory)
//! 3. Default values
//!
//! The environment variable names match the deployment this service grew out
//! of (`GITHUB_WEBHOOK_SECRET`, `INTERNAL_TARGET_URL`, `LOCAL_REPO_PATH`, ...),
//! so an existing `.env` keeps working. Empty variables count as unset.
//!
//! The resulting [`Config`] is built once at start-up and never mutated.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::review::prompt::{DEFAULT_PROMPT_TEMPLATE, PromptError, PromptTemplate};

/// Config file looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "review-relay.toml";

const REDACTED: &str = "<redacted>";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid review prompt template: {0}")]
    InvalidPrompt(#[from] PromptError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub edge: EdgeConfig,
    pub relay: RelayConfig,
    pub internal: InternalConfig,
    pub review: ReviewConfig,
}

/// Edge node settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Address the edge server listens on.
    pub bind: SocketAddr,

    /// Shared secret configured on the GitHub webhook.
    ///
    /// An empty secret is not a start-up error: the server starts and
    /// answers every delivery with 500 so the misconfiguration is visible in
    /// GitHub's delivery log.
    pub webhook_secret: String,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            webhook_secret: String::new(),
        }
    }
}

/// How the edge node forwards canonical events to the internal node.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Base URL of the internal node, without a trailing slash.
    /// `None` disables relaying: every delivery then fails with 502.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,

    /// Path appended to `target_url`.
    pub target_path: String,

    /// Timeout for a single relay attempt.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Retries after the first attempt, for transport errors only.
    pub retries: u32,

    /// Delay before the first retry; doubles for each further retry.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            target_url: None,
            target_path: "/webhook/trigger".to_string(),
            timeout: Duration::from_secs(20),
            retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl RelayConfig {
    /// Returns the full relay URL, or `None` if relaying is not configured.
    pub fn endpoint(&self) -> Option<String> {
        self.target_url
            .as_deref()
            .map(|base| format!("{}{}", base, self.target_path))
    }
}

/// Internal node settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InternalConfig {
    /// Address the internal server listens on.
    pub bind: SocketAddr,

    /// A repository's worker exits after this long without work.
    #[serde(with = "humantime_serde")]
    pub worker_idle_timeout: Duration,
}

impl Default for InternalConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8001)),
            worker_idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Everything the review path needs: where to get a checkout and how to run
/// the review tool in it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Directory fresh clones are created under.
    pub scratch_root: PathBuf,

    /// Subdirectory of the repository the tool is started in (monorepos).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdir: Option<PathBuf>,

    /// Treat a failed checkout of the head commit as a hard failure instead
    /// of reviewing the clone's default branch.
    pub strict_checkout: bool,

    /// Budget for `gh repo clone`.
    #[serde(with = "humantime_serde")]
    pub clone_timeout: Duration,

    /// Budget for each `git checkout` / `git fetch`.
    #[serde(with = "humantime_serde")]
    pub git_timeout: Duration,

    pub pinned: PinnedRepoConfig,
    pub tool: ToolConfig,
    pub credentials: CredentialsConfig,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir(),
            subdir: None,
            strict_checkout: false,
            clone_timeout: Duration::from_secs(120),
            git_timeout: Duration::from_secs(60),
            pinned: PinnedRepoConfig::default(),
            tool: ToolConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }
}

/// A pre-existing local checkout used instead of cloning.
///
/// The checkout is managed outside this service: it is never fetched, reset
/// or deleted here.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PinnedRepoConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Only use the pinned checkout for this repository (`owner/name` or
    /// `owner_name`). Without a filter it is used for every repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_filter: Option<String>,

    /// Explicit directory to start the tool in, overriding `path` and `subdir`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// How the review tool is invoked.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Review tool executable.
    pub binary: String,

    /// Arguments placed before the instruction.
    pub args: Vec<String>,

    /// The base instruction, normally a slash command.
    pub instruction: String,

    /// Append a natural-language paragraph rendered from `prompt_template`.
    pub append_prompt: bool,

    pub prompt_template: String,

    /// Hard ceiling for one invocation.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            args: vec!["-p".to_string()],
            instruction: "/code-review:code-review".to_string(),
            append_prompt: false,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            timeout: Duration::from_secs(600),
        }
    }
}

impl ToolConfig {
    /// Parses the prompt template if appending is enabled.
    pub fn template(&self) -> Result<Option<PromptTemplate>> {
        if !self.append_prompt {
            return Ok(None);
        }
        Ok(Some(PromptTemplate::parse(&self.prompt_template)?))
    }
}

/// Credentials injected into the environment of every spawned process.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gh_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,
}

impl CredentialsConfig {
    /// Returns the configured credentials as environment variable pairs.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = Vec::new();
        if let Some(token) = &self.gh_token {
            vars.push(("GH_TOKEN".to_string(), token.clone()));
        }
        if let Some(key) = &self.anthropic_api_key {
            vars.push(("ANTHROPIC_API_KEY".to_string(), key.clone()));
        }
        vars
    }
}

impl Config {
    /// Loads configuration with all overrides applied and validates it.
    ///
    /// An explicitly given path must exist. Without one,
    /// [`DEFAULT_CONFIG_FILE`] is read if present and defaults are used
    /// otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load_from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        let config = base.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_env_lookup(|var| std::env::var(var).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    ///
    /// Supported variables:
    /// - `GITHUB_WEBHOOK_SECRET`, `EDGE_BIND`
    /// - `INTERNAL_TARGET_URL`, `INTERNAL_TARGET_PATH`, `INTERNAL_TIMEOUT`
    ///   (seconds), `INTERNAL_RETRIES`
    /// - `INTERNAL_BIND`
    /// - `REPO_ROOT`, `CLAUDE_SUBDIR`, `REVIEW_STRICT_CHECKOUT`
    /// - `LOCAL_REPO_PATH`, `LOCAL_REPO_NAME`, `CLAUDE_WORKING_DIR`
    /// - `CLAUDE_CLI`, `CLAUDE_CODE_REVIEW_CMD`, `CLAUDE_REVIEW_TIMEOUT`
    ///   (seconds), `CLAUDE_REVIEW_APPEND_PROMPT`, `CLAUDE_REVIEW_PROMPT`
    /// - `GH_TOKEN`, `ANTHROPIC_API_KEY`
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty and whitespace-only values count as unset.
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(secret) = get("GITHUB_WEBHOOK_SECRET") {
            self.edge.webhook_secret = secret;
        }
        if let Some(bind) = get("EDGE_BIND") {
            self.edge.bind = parse_env("EDGE_BIND", &bind)?;
        }

        if let Some(url) = get("INTERNAL_TARGET_URL") {
            self.relay.target_url = Some(url);
        }
        if let Some(path) = get("INTERNAL_TARGET_PATH") {
            self.relay.target_path = path;
        }
        if let Some(secs) = get("INTERNAL_TIMEOUT") {
            self.relay.timeout = parse_secs("INTERNAL_TIMEOUT", &secs)?;
        }
        if let Some(retries) = get("INTERNAL_RETRIES") {
            self.relay.retries = parse_env("INTERNAL_RETRIES", &retries)?;
        }

        if let Some(bind) = get("INTERNAL_BIND") {
            self.internal.bind = parse_env("INTERNAL_BIND", &bind)?;
        }

        if let Some(root) = get("REPO_ROOT") {
            self.review.scratch_root = PathBuf::from(root);
        }
        if let Some(subdir) = get("CLAUDE_SUBDIR") {
            self.review.subdir = Some(PathBuf::from(subdir));
        }
        if let Some(strict) = get("REVIEW_STRICT_CHECKOUT") {
            self.review.strict_checkout = parse_bool("REVIEW_STRICT_CHECKOUT", &strict)?;
        }

        if let Some(path) = get("LOCAL_REPO_PATH") {
            self.review.pinned.path = Some(PathBuf::from(path));
        }
        if let Some(name) = get("LOCAL_REPO_NAME") {
            self.review.pinned.name_filter = Some(name);
        }
        if let Some(dir) = get("CLAUDE_WORKING_DIR") {
            self.review.pinned.working_dir = Some(PathBuf::from(dir));
        }

        if let Some(binary) = get("CLAUDE_CLI") {
            self.review.tool.binary = binary;
        }
        if let Some(instruction) = get("CLAUDE_CODE_REVIEW_CMD") {
            self.review.tool.instruction = instruction;
        }
        if let Some(secs) = get("CLAUDE_REVIEW_TIMEOUT") {
            self.review.tool.timeout = parse_secs("CLAUDE_REVIEW_TIMEOUT", &secs)?;
        }
        if let Some(append) = get("CLAUDE_REVIEW_APPEND_PROMPT") {
            self.review.tool.append_prompt = parse_bool("CLAUDE_REVIEW_APPEND_PROMPT", &append)?;
        }
        if let Some(template) = get("CLAUDE_REVIEW_PROMPT") {
            self.review.tool.prompt_template = template;
        }

        if let Some(token) = get("GH_TOKEN") {
            self.review.credentials.gh_token = Some(token);
        }
        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.review.credentials.anthropic_api_key = Some(key);
        }

        Ok(self.normalized())
    }

    /// Canonicalizes values that have more than one acceptable spelling.
    fn normalized(mut self) -> Self {
        self.relay.target_url = self
            .relay
            .target_url
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        if !self.relay.target_path.starts_with('/') {
            self.relay.target_path = format!("/{}", self.relay.target_path);
        }
        self
    }

    /// Checks invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.review.tool.binary.trim().is_empty() {
            return Err(ConfigError::Invalid("review tool binary is empty".to_string()));
        }
        if self.review.tool.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "review tool timeout must be positive".to_string(),
            ));
        }
        if self.internal.worker_idle_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "worker idle timeout must be positive".to_string(),
            ));
        }
        if self.relay.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "relay timeout must be positive".to_string(),
            ));
        }
        if let Some(url) = &self.relay.target_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "relay target URL must be http(s): {}",
                url
            )));
        }
        self.review.tool.template()?;
        Ok(())
    }

    /// Returns a copy with every secret replaced by a placeholder.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.edge.webhook_secret.is_empty() {
            copy.edge.webhook_secret = REDACTED.to_string();
        }
        let credentials = &mut copy.review.credentials;
        credentials.gh_token = credentials.gh_token.as_ref().map(|_| REDACTED.to_string());
        credentials.anthropic_api_key = credentials
            .anthropic_api_key
            .as_ref()
            .map(|_| REDACTED.to_string());
        copy
    }
}

fn parse_env<T>(var: &'static str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Parses a number of seconds, fractions allowed (`"20"`, `"2.5"`).
fn parse_secs(var: &'static str, value: &str) -> Result<Duration> {
    let secs: f64 = parse_env(var, value)?;
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
