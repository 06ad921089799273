//! Panelsync Remote
//!
//! Headless remote surface: mirrors the primary's panels and sends
//! playback and slider commands typed on stdin.
//!
//! # Usage
//!
//! ```bash
//! PANELSYNC_RELAY_URL=ws://stage.local:8765/ws panelsync-remote
//! ```

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{info, warn};

use panelsync_core::runtime::console::{self, ConsoleCommand, ConsoleError};
use panelsync_core::{load_config, RemoteHandle, RemoteRuntime, ViewStatus};

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
    info!(relay = %config.client.relay_url, "Starting panelsync remote");

    let (runtime, handle) =
        RemoteRuntime::new(config.client.relay_url.clone(), config.client.reconnect);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(runtime.run(async {
        let _ = shutdown_rx.await;
    }));
    tokio::spawn(report_status(handle.clone()));

    run_console(&handle).await;

    info!("Shutting down");
    let _ = shutdown_tx.send(());
    task.await.context("Remote runtime panicked")?;
    Ok(())
}

/// Log every change of the view's status
async fn report_status(handle: RemoteHandle) {
    let mut view = handle.view_watch();
    let mut last = ViewStatus::Disconnected;
    while view.changed().await.is_ok() {
        let status = view.borrow_and_update().status();
        if status != last {
            info!(?status, "View status changed");
            last = status;
        }
    }
}

async fn run_console(handle: &RemoteHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match console::parse_remote(&line) {
                    Ok(ConsoleCommand::Run(command)) => {
                        if !handle.send(command).await {
                            break;
                        }
                    }
                    Ok(ConsoleCommand::List) => print_view(handle),
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

fn print_view(handle: &RemoteHandle) {
    let view = handle.view();
    println!("status: {:?}", view.status());
    if !view.controls_enabled() {
        return;
    }
    for panel in view.panels() {
        let state = match (panel.playing, panel.stale) {
            (true, true) => "stale",
            (true, false) => "playing",
            (false, _) => "paused",
        };
        println!("{:<28} {:<8} {}", panel.id, state, panel.title);
        for slider in &panel.sliders {
            println!("    {} = {}", slider.slider_id, slider.value);
        }
    }
    for slider in view.master_sliders() {
        println!("master {} = {}", slider.slider_id, slider.value);
    }
}
