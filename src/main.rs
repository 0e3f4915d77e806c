use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use review_relay::config::Config;
use review_relay::relay::RelayClient;
use review_relay::review::{ProcessRunner, ReviewInvoker, ReviewPipeline};
use review_relay::server::{EdgeState, InternalState, build_edge_router, build_internal_router};
use review_relay::text::preview;
use review_relay::webhooks::{compute_signature, format_signature_header};
use review_relay::worker::ReviewDispatcher;

/// Characters of a response body printed by `send-sample`.
const RESPONSE_PREVIEW_CHARS: usize = 500;

/// Relays GitHub webhooks to an internal node that runs pull-request reviews
#[derive(Parser, Debug)]
#[command(name = "review-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to review-relay.toml if present)
    #[arg(long, global = true, env = "REVIEW_RELAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the public edge node
    Edge,

    /// Run the internal review node
    Internal,

    /// Run the review tool once in a local directory
    ReviewLocal {
        /// Directory to run the review tool in
        #[arg(long)]
        repo_path: PathBuf,
    },

    /// Sign and send a sample webhook to an edge node
    SendSample {
        /// Full webhook URL, e.g. http://localhost:8000/webhook
        #[arg(long)]
        url: String,

        #[arg(long, value_enum, default_value_t = SampleEvent::Push)]
        event: SampleEvent,

        /// Secret to sign with (defaults to the configured webhook secret)
        #[arg(long)]
        secret: Option<String>,
    },

    /// Print the effective configuration with secrets redacted
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SampleEvent {
    Push,
    PullRequest,
}

impl SampleEvent {
    fn header_value(self) -> &'static str {
        match self {
            SampleEvent::Push => "push",
            SampleEvent::PullRequest => "pull_request",
        }
    }

    fn payload(self) -> serde_json::Value {
        match self {
            SampleEvent::Push => json!({
                "ref": "refs/heads/main",
                "after": "0123456789abcdef0123456789abcdef01234567",
                "head_commit": {
                    "id": "0123456789abcdef0123456789abcdef01234567",
                    "message": "Sample commit"
                },
                "repository": { "full_name": "octocat/hello-world" }
            }),
            SampleEvent::PullRequest => json!({
                "action": "opened",
                "number": 1,
                "pull_request": {
                    "number": 1,
                    "head": { "sha": "0123456789abcdef0123456789abcdef01234567", "ref": "feature" },
                    "base": { "sha": "fedcba9876543210fedcba9876543210fedcba98", "ref": "main" }
                },
                "repository": { "full_name": "octocat/hello-world" }
            }),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "review_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Edge => run_edge(config).await,
        Command::Internal => run_internal(config).await,
        Command::ReviewLocal { repo_path } => review_local(&config, &repo_path).await,
        Command::SendSample { url, event, secret } => {
            let secret = secret.unwrap_or_else(|| config.edge.webhook_secret.clone());
            send_sample(&url, event, &secret).await
        }
        Command::Config => {
            let rendered = toml::to_string_pretty(&config.redacted())
                .context("failed to render configuration")?;
            print!("{rendered}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_edge(config: Config) -> anyhow::Result<ExitCode> {
    if config.edge.webhook_secret.is_empty() {
        warn!("GITHUB_WEBHOOK_SECRET is not set; every webhook will be answered with 500");
    }
    let relay = RelayClient::from_config(&config.relay).context("failed to build relay client")?;
    match relay.endpoint() {
        Some(endpoint) => info!(endpoint = %endpoint, "Relaying to internal node"),
        None => warn!("INTERNAL_TARGET_URL is not set; every webhook will be answered with 502"),
    }

    let state = EdgeState::new(config.edge.webhook_secret.as_bytes(), relay);
    let app = build_edge_router(state);

    let listener = TcpListener::bind(config.edge.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.edge.bind))?;
    info!(addr = %config.edge.bind, "Edge node listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("edge server error")?;

    info!("Edge node stopped");
    Ok(ExitCode::SUCCESS)
}

async fn run_internal(config: Config) -> anyhow::Result<ExitCode> {
    let pipeline = ReviewPipeline::from_config(&config.review)
        .context("invalid review configuration")?;
    let shutdown = CancellationToken::new();
    let dispatcher = Arc::new(
        ReviewDispatcher::new_with_shutdown(Arc::new(pipeline), shutdown.clone())
            .with_idle_timeout(config.internal.worker_idle_timeout),
    );
    let app = build_internal_router(InternalState::new(Arc::clone(&dispatcher)));

    let listener = TcpListener::bind(config.internal.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.internal.bind))?;
    info!(
        addr = %config.internal.bind,
        scratch_root = %config.review.scratch_root.display(),
        pinned = ?config.review.pinned.path,
        "Internal node listening"
    );

    tokio::spawn(wait_for_signal(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("internal server error")?;

    dispatcher.shutdown_all().await;
    info!("Internal node stopped");
    Ok(ExitCode::SUCCESS)
}

async fn review_local(config: &Config, repo_path: &Path) -> anyhow::Result<ExitCode> {
    if !repo_path.is_dir() {
        anyhow::bail!("{} is not a directory", repo_path.display());
    }
    if !repo_path.join(".git").exists() {
        warn!(path = %repo_path.display(), "Directory is not a git checkout");
    }

    let invoker = ReviewInvoker::new(&config.review, Arc::new(ProcessRunner))
        .context("invalid review configuration")?;
    let outcome = invoker.invoke(repo_path, None).await;

    if outcome.is_success() {
        info!(path = %repo_path.display(), "Local review finished");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(path = %repo_path.display(), outcome = %outcome, "Local review failed");
        Ok(ExitCode::FAILURE)
    }
}

async fn send_sample(url: &str, event: SampleEvent, secret: &str) -> anyhow::Result<ExitCode> {
    if secret.is_empty() {
        warn!("No secret given; the edge node will reject the delivery");
    }

    let body = serde_json::to_vec(&event.payload())?;
    let signature = format_signature_header(&compute_signature(&body, secret.as_bytes()));

    let response = reqwest::Client::new()
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header("X-GitHub-Event", event.header_value())
        .header("X-Hub-Signature-256", signature)
        .body(body)
        .send()
        .await
        .with_context(|| format!("failed to send sample to {url}"))?;

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    println!("{status}");
    println!("{}", preview(&text, RESPONSE_PREVIEW_CHARS));

    Ok(if status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Cancels `shutdown` on Ctrl-C or, on Unix, SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
