//! Panelsync Primary
//!
//! Headless primary client: owns the panels, connects to the relay and
//! takes editing commands from stdin. Evaluation goes to the logging
//! evaluator; a real engine plugs in through the `Evaluator` trait.
//!
//! # Usage
//!
//! ```bash
//! # Connect to a relay on this machine
//! panelsync-primary
//!
//! # Connect elsewhere, verbose
//! PANELSYNC_RELAY_URL=ws://stage.local:8765/ws RUST_LOG=debug panelsync-primary
//! ```
//!
//! # Environment Variables
//!
//! - `PANELSYNC_RELAY_URL`: relay WebSocket URL
//! - `PANELSYNC_STATE_PATH`: where panels are saved
//! - `PANELSYNC_PERSISTENCE`: `0`/`false` to keep panels in memory only
//! - `RUST_LOG`: log level (trace, debug, info, warn, error)

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{info, warn};

use panelsync_core::runtime::console::{self, ConsoleCommand, ConsoleError};
use panelsync_core::{
    load_config, Collaborators, JsonFilePersistence, LoggingEvaluator, MemoryPersistence,
    Persistence, PrimaryHandle, PrimaryRuntime, TracingSurface,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("panelsync_core=info".parse()?),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config().context("Failed to load configuration")?;
    info!(source = %config.source(), relay = %config.client.relay_url, "Starting panelsync primary");

    let persistence: Arc<dyn Persistence> = match (&config.state_path, config.persistence_enabled) {
        (Some(path), true) => {
            info!(path = %path.display(), "Persisting panels");
            Arc::new(JsonFilePersistence::new(path.clone()))
        }
        _ => {
            info!("Persistence disabled; panels live in memory");
            Arc::new(MemoryPersistence::new())
        }
    };

    let collab = Collaborators {
        evaluator: Arc::new(LoggingEvaluator::new()),
        surface: Arc::new(TracingSurface),
        persistence,
    };
    let (mut runtime, handle) = PrimaryRuntime::new(
        config.client.relay_url.clone(),
        config.client.reconnect,
        config.authority.clone(),
        collab,
    );

    match runtime.load().await {
        Ok(restored) => info!(restored, "Panels loaded"),
        Err(e) => warn!(error = %e, "Could not load saved panels; starting empty"),
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(runtime.run(async {
        let _ = shutdown_rx.await;
    }));

    run_console(&handle).await;

    info!("Shutting down");
    let _ = shutdown_tx.send(());
    task.await.context("Primary runtime panicked")?;
    Ok(())
}

/// Read commands from stdin until `quit`, Ctrl+C, or the runtime stops
async fn run_console(handle: &PrimaryHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match console::parse_primary(&line) {
                    Ok(ConsoleCommand::Run(command)) => {
                        if !handle.send(command).await {
                            break;
                        }
                    }
                    Ok(ConsoleCommand::List) => print_panels(handle).await,
                    Ok(ConsoleCommand::Help) => println!("{}", console::HELP),
                    Ok(ConsoleCommand::Quit) => break,
                    Err(ConsoleError::Empty) => {}
                    Err(e) => println!("{e}"),
                },
                Ok(None) => {
                    info!("stdin closed; running until Ctrl+C");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed; running until Ctrl+C");
                    stdin_open = false;
                }
            },
        }
    }
}

async fn print_panels(handle: &PrimaryHandle) {
    let Some(snapshot) = handle.snapshot().await else {
        return;
    };
    println!("relay: {}", handle.status());
    if snapshot.panels.is_empty() {
        println!("no panels");
    }
    for panel in &snapshot.panels {
        let state = match (panel.playing, panel.stale) {
            (true, true) => "stale",
            (true, false) => "playing",
            (false, _) => "paused",
        };
        println!("{:<28} {:<8} {}", panel.id, state, panel.title);
    }
    for slider in &snapshot.master.sliders {
        println!("master {} = {}", slider.slider_id, slider.value);
    }
}
