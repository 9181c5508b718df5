//! quickkv server entry point.
//!
//! Parses the command line, sets up logging, and runs the TCP accept loop
//! until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use quickkv::commands::CommandHandler;
use quickkv::connection::{handle_connection, ConnectionStats};
use quickkv::storage::{ExpiryScheduler, StorageEngine};
use quickkv::Config;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        version = quickkv::VERSION,
        host = %config.host,
        port = config.port,
        max_buffer = config.max_buffer,
        "Starting quickkv"
    );

    // Shared by every connection
    let storage = Arc::new(StorageEngine::new());
    let expiry = Arc::new(ExpiryScheduler::new(Arc::clone(&storage)));
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => {
                // Without a signal handler, run until killed
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = accept_loop(listener, &storage, &expiry, &stats, config.max_buffer) => {}
        _ = shutdown => {}
    }

    expiry.stop();

    let storage_stats = storage.stats();
    info!(
        keys = storage_stats.keys,
        get_ops = storage_stats.get_ops,
        set_ops = storage_stats.set_ops,
        expired = storage_stats.expired,
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}

/// Accepts connections forever, one task per client.
async fn accept_loop(
    listener: TcpListener,
    storage: &Arc<StorageEngine>,
    expiry: &Arc<ExpiryScheduler>,
    stats: &Arc<ConnectionStats>,
    max_buffer: usize,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = CommandHandler::new(Arc::clone(storage), Arc::clone(expiry));
                let stats = Arc::clone(stats);

                tokio::spawn(handle_connection(stream, addr, handler, stats, max_buffer));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
