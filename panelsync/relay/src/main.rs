//! Panelsync Relay
//!
//! Stateless relay between one primary and any number of remotes.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (127.0.0.1:8765)
//! panelsync-relay
//!
//! # Listen on the LAN and serve a web remote
//! panelsync-relay --bind 0.0.0.0:8765 --static-dir ./web
//!
//! # With verbose logging
//! RUST_LOG=debug panelsync-relay
//! ```
//!
//! # Environment Variables
//!
//! - `PANELSYNC_BIND`: listen address
//! - `PANELSYNC_STATIC_DIR`: directory served for plain HTTP requests
//! - `PANELSYNC_MAX_MESSAGE_SIZE`: largest accepted frame in bytes
//! - `RUST_LOG`: log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: graceful shutdown

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use panelsync_core::{default_config_path, load_config_from_path, ConfigOverrides};
use panelsync_relay::RelayServer;

/// Panelsync relay daemon
#[derive(Debug, Parser)]
#[command(name = "panelsync-relay", version, about)]
struct Cli {
    /// Listen address, `host:port`
    #[arg(long)]
    bind: Option<String>,

    /// Directory served for non-WebSocket requests
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Config file (default: ~/.config/panelsync/panelsync.toml)
    #[arg(long, env = "PANELSYNC_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref bind) = self.bind {
            overrides = overrides.with_bind_address(bind.clone());
        }
        if let Some(ref dir) = self.static_dir {
            overrides = overrides.with_static_dir(dir.clone());
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("panelsync_relay=info".parse()?)
                .add_directive("panelsync_core=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    cli.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        source = %config.source(),
        bind = %config.relay.bind_address,
        "Starting panelsync relay"
    );

    RelayServer::new(config.relay).run(shutdown_signal()).await
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
