//! Agent Bridge
//!
//! Drives one interactive agent process through a pseudo-terminal and relays
//! it to a single authorized Telegram operator.

mod agent;
mod bridge;
mod channel;
mod config;
mod pty;
mod telegram;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use agent::{OutputTarget, SpawnConfig, Supervisor};
use bridge::BridgeHandler;
use channel::{run_outbound, OutputSink, RetryPolicy};
use config::BridgeConfig;
use telegram::{poll_loop, TelegramApi};

/// How long the outbound sender gets to flush after shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Agent Bridge
///
/// Remote-control an interactive agent from Telegram
#[derive(Parser, Debug)]
#[command(name = "agent-bridge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Start the agent immediately instead of waiting for /restart
    #[arg(long)]
    autostart: bool,

    /// Agent working directory (overrides config and AGENT_ZERO_DIR)
    #[arg(long)]
    agent_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Agent Bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;

    if config.uses_default_user_id() {
        warn!(
            user_id = config.telegram.allowed_user_id,
            "TELEGRAM_ALLOWED_USER_ID is still the placeholder; nobody real can use this bot"
        );
    }

    let operator = config.telegram.allowed_user_id;
    info!(
        agent = %config.agent.name,
        dir = %config.agent_dir().display(),
        operator,
        "Configuration loaded"
    );

    // Outbound queue, drained by a single sender task
    let api = Arc::new(
        TelegramApi::with_base_url(&config.telegram.bot_token, &config.telegram.api_base_url)
            .with_send_timeout(Duration::from_secs(config.telegram.send_timeout_secs)),
    );
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound.queue_capacity);
    let sink: Arc<dyn OutputSink> = api.clone();
    let outbound_task = tokio::spawn(run_outbound(
        sink,
        outbound_rx,
        RetryPolicy::from(&config.outbound),
    ));

    let supervisor = Arc::new(Supervisor::new(
        SpawnConfig::from_bridge_config(&config),
        OutputTarget::new(outbound_tx.clone(), operator),
    ));

    if config.agent.autostart {
        match supervisor.start_session().await {
            Ok(session_id) => info!(%session_id, "Agent autostarted"),
            Err(e) => error!(error = %e, "Autostart failed; use /restart to retry"),
        }
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (event_tx, event_rx) = mpsc::channel(64);

    let poller = tokio::spawn(poll_loop(
        Arc::clone(&api),
        config.telegram.poll_timeout_secs,
        event_tx,
        shutdown_tx.subscribe(),
    ));

    let handler = BridgeHandler::new(
        Arc::clone(&supervisor),
        outbound_tx,
        operator,
        config.limits.max_message_length,
        config.agent.name.clone(),
    );
    let handler_task = tokio::spawn(handler.run(event_rx, shutdown_tx.subscribe()));

    info!("Bridge running; waiting for messages");
    shutdown_signal().await;
    info!("Initiating graceful shutdown...");

    let _ = shutdown_tx.send(());
    if let Err(e) = poller.await {
        warn!(error = %e, "Poller task failed");
    }
    if let Err(e) = handler_task.await {
        warn!(error = %e, "Handler task failed");
    }

    if let Some(status) = supervisor.status().await {
        info!(
            session_id = %status.session_id,
            pid = ?status.pid,
            uptime_secs = status.uptime.as_secs(),
            pump_running = status.pump_running,
            "Stopping agent"
        );
    }
    match supervisor.shutdown().await {
        Some(exit) => info!(code = exit.exit_code, "Agent exited"),
        None => info!("No agent running"),
    }

    // The sender stops once the last queue handle is gone
    drop(supervisor);
    if tokio::time::timeout(DRAIN_TIMEOUT, outbound_task).await.is_err() {
        warn!("Outbound queue did not drain in time");
    }

    info!("Bridge shutdown complete");
    Ok(())
}

/// Layer defaults, config file, environment and CLI flags, then validate
fn load_config(args: &Args) -> anyhow::Result<BridgeConfig> {
    let mut config = BridgeConfig::load(args.config.as_deref()).with_context(|| match &args.config {
        Some(path) => format!("loading {}", path.display()),
        None => "loading defaults".to_string(),
    })?;
    config.apply_process_env()?;

    if args.autostart {
        config.agent.autostart = true;
    }
    if let Some(dir) = &args.agent_dir {
        config.agent.dir = dir.clone();
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "Refusing to start");
        return Err(e.into());
    }
    Ok(config)
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
