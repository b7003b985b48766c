//! tunnelvisor service daemon
//!
//! Supervises the tunnel engine and serves the CLI over localhost IPC.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tv_core::config::{self, ServiceConfig};
use tv_service::engine::ControllerEngine;
use tv_service::ipc::IpcServer;
use tv_service::notify::TracingNotifier;
use tv_service::policy::Visibility;
use tv_service::profile::FileProfileStore;
use tv_service::{ServiceOptions, TunnelService};

#[derive(Parser)]
#[command(name = "tunnelvisord")]
#[command(about = "tunnelvisor service daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IPC port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Engine executable (overrides config)
    #[arg(short, long)]
    engine: Option<PathBuf>,

    /// Start the engine immediately
    #[arg(long)]
    autostart: bool,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { args.log_level.as_str() };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("tunnelvisor service starting...");

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                ServiceConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            ServiceConfig::default()
        }
    };

    if let Some(port) = args.port {
        config.ipc_port = port;
    }
    if let Some(engine) = args.engine {
        config.engine.executable = engine;
    }
    config.autostart |= args.autostart;

    let engine = ControllerEngine::new(config.engine.clone()).context("Invalid engine configuration")?;
    let store = FileProfileStore::open(&config.profiles_path, &config.profile_cache_dir)
        .await
        .with_context(|| format!("Failed to open profile store {:?}", config.profiles_path))?;
    let notifier = Arc::new(TracingNotifier::new());

    let service = TunnelService::initialize(
        Arc::new(engine),
        Arc::new(store),
        notifier,
        ServiceOptions::from(&config),
    );

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    // SIGUSR1 / SIGUSR2 switch the notification observer to foreground / background
    let (visibility_tx, visibility_rx) = mpsc::channel::<Visibility>(8);
    service.attach_visibility_source(visibility_rx);
    spawn_visibility_signals(visibility_tx, cancel.clone());

    if config.autostart {
        service.start().await;
    }

    let server = IpcServer::new(config.ipc_address(), Arc::clone(&service))
        .with_shutdown_token(cancel.clone());
    let served = server.run().await;

    cancel.cancel();
    service.shutdown().await;

    served?;
    tracing::info!("tunnelvisor service shutdown complete");
    Ok(())
}

#[cfg(unix)]
fn spawn_visibility_signals(tx: mpsc::Sender<Visibility>, cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let (mut foreground, mut background) =
            match (signal(SignalKind::user_defined1()), signal(SignalKind::user_defined2())) {
                (Ok(fg), Ok(bg)) => (fg, bg),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!("Failed to install visibility signal handlers: {}", e);
                    return;
                }
            };

        loop {
            let visibility = tokio::select! {
                _ = cancel.cancelled() => break,
                Some(()) = foreground.recv() => Visibility::Foreground,
                Some(()) = background.recv() => Visibility::Background,
                else => break,
            };

            tracing::debug!(?visibility, "Visibility signal");
            if tx.send(visibility).await.is_err() {
                break;
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_visibility_signals(_tx: mpsc::Sender<Visibility>, _cancel: CancellationToken) {}
