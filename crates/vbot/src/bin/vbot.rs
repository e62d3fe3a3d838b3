//! vbot service binary.
//!
//! Runs the webhook HTTP service, or handles a single invocation document
//! read from stdin.

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "vbot=info";

use vbot::server::{self, AppState};
use vbot::{
    ActionInvoker, Actions, CommandDeployer, Config, DirectorySecrets, EnvSecrets,
    InboundRequest, PublicKeySource, SecretProvider, SlackNotifier, TravisKeyFetcher,
};

/// vbot - chat-ops webhook dispatcher for Slack and Travis CI.
#[derive(Parser)]
#[command(name = "vbot")]
#[command(about = "Chat-ops webhook dispatcher for Slack and Travis CI")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP webhook service
    Serve {
        /// Port to listen on (overrides VBOT_PORT)
        #[arg(long, env = "VBOT_PORT")]
        port: Option<u16>,
    },

    /// Handle one invocation document from stdin and print the response envelope
    Invoke {
        /// Which handler receives the invocation
        #[arg(long, value_enum)]
        handler: Handler,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Handler {
    Slack,
    Travis,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(cli.json_logs.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!cli.json_logs).then(|| fmt::layer().with_writer(std::io::stderr)))
        .with(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let config = Config::default();
    let state = build_state(&config)?;

    match cli.command {
        Commands::Serve { port } => serve(state, port.unwrap_or(config.port)).await,
        Commands::Invoke { handler } => invoke(&state, handler).await,
    }
}

/// `RUST_LOG` when set and valid, otherwise `vbot=info`.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn build_state(config: &Config) -> Result<AppState> {
    let secrets: Arc<dyn SecretProvider> = match &config.secrets_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Reading secrets from directory");
            Arc::new(DirectorySecrets::new(dir.clone()))
        }
        None => Arc::new(EnvSecrets),
    };

    let keys: Arc<dyn PublicKeySource> = Arc::new(
        TravisKeyFetcher::from_config(&config.ci).context("Failed to create HTTP client")?,
    );

    let notifier = SlackNotifier::new(
        config.actions.alerts_hook_secret.clone(),
        Arc::clone(&secrets),
        config.actions.alerts_timeout,
    )
    .context("Failed to create Slack HTTP client")?;
    let mut actions = Actions::new().with_notifier(notifier);
    match config
        .actions
        .deploy_command
        .as_deref()
        .and_then(CommandDeployer::from_command_line)
    {
        Some(deployer) => {
            info!(program = %deployer.program(), "Deploy command configured");
            actions = actions.with_deployer(deployer);
        }
        None => warn!("No VBOT_DEPLOY_COMMAND configured - deploys will fail"),
    }
    let actions: Arc<dyn ActionInvoker> = Arc::new(actions);

    Ok(AppState::new(config, secrets, keys, actions))
}

async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = server::build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(port, "vbot service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.wait_for_deploys().await;
    info!("vbot service stopped");
    Ok(())
}

async fn invoke(state: &AppState, handler: Handler) -> Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read invocation from stdin")?;

    let request: InboundRequest =
        serde_json::from_str(&input).context("Invocation is not a valid JSON document")?;

    let envelope = match handler {
        Handler::Slack => state.chat.handle(&request).await,
        Handler::Travis => state.ci.handle(&request).await,
    };

    if let Some(envelope) = envelope {
        println!("{}", serde_json::to_string(&envelope)?);
    }

    // Acknowledged deploys still run to completion before exit.
    state.wait_for_deploys().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down gracefully"),
        () = terminate => info!("Received SIGTERM, shutting down gracefully"),
    }
}
