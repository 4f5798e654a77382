//! Peerlink relay
//!
//! Signaling intermediary for Peerlink nodes: user registry, addressed
//! event forwarding and the room registry.
//!
//! Usage: `peerlink-relay [config.toml]`

use std::path::PathBuf;

use peerlink_net::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::RelayConfig;

#[tokio::main]
async fn main() {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let port = std::env::var("PORT").ok();

    let config = match RelayConfig::load(path.as_deref(), port.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("peerlink-relay: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Peerlink relay");

    let server = match Server::start(config.socket_addr(), config.max_users).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, addr = %config.socket_addr(), "Failed to start relay");
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    server.shutdown();
    tracing::info!("Relay stopped");
}
