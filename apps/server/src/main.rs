//! ClipFlow Server - standalone headless server for ClipFlow.
//!
//! This binary wires the core services into a background daemon: it loads
//! configuration from the environment, bootstraps the store, the chat
//! subscription and the token monitor, serves the REST API, and shuts
//! everything down cleanly on SIGINT/SIGTERM.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use clipflow_core::{bootstrap_services, start_server, Config};
use tokio::signal;

/// ClipFlow Server - chat-driven clip queue daemon.
#[derive(Parser, Debug)]
#[command(name = "clipflow-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CLIPFLOW_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides CLIPFLOW_PORT).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// SQLite database path (overrides CLIPFLOW_DATABASE_PATH).
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Data directory for persisted runtime state (overrides CLIPFLOW_DATA_DIR).
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("ClipFlow Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env().context(
        "Failed to load configuration. Required: CLIPFLOW_CLIENT_ID, \
         CLIPFLOW_CLIENT_SECRET, CLIPFLOW_BOT_ACCESS_TOKEN, CLIPFLOW_CHANNEL, \
         CLIPFLOW_SESSION_SECRET.",
    )?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    log::info!(
        "Configuration: channel={}, port={}, database={}",
        config.channel,
        config.port,
        config.database_path.display()
    );

    let services = bootstrap_services(&config)
        .await
        .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    services.start_background_tasks();

    let app_state = services.app_state(&config);
    let shutdown = services.cancel_token.clone();
    let port = config.port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, port, shutdown).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown: background tasks stop, then the listener drains.
    services.shutdown().await;
    let _ = server_handle.await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
