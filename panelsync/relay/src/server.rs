//! Relay Server Implementation
//!
//! HTTP and WebSocket front end for the [`Relay`] router:
//! - `/ws` upgrades to a WebSocket and hands every text frame to the router
//! - `/health` reports connection counts by role
//! - anything else is served from the static directory, when one is set
//!
//! # Connection Lifecycle
//!
//! ```text
//!               RelayServer
//!                    │
//!     ┌──────────────┼──────────────┐
//!     │              │              │
//!  primary        remote         remote
//!  (conn-1)       (conn-2)       (conn-3)
//!     │              │              │
//!  reader ──► Relay::on_text ──► registry ──► writer task
//! ```
//!
//! Each socket is split in two: a reader loop on the connection's own task
//! and a writer task draining the connection's bounded outbound channel.
//! The router only ever `try_send`s into that channel, so one slow socket
//! cannot stall fan-out to the others.
//!
//! Upgraded sockets outlive the HTTP connection that carried them, so on
//! shutdown every open socket is told to close before the server returns.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn, Instrument};

use panelsync_core::{ConnectionRegistry, ConnectionRole, RegistrySummary, Relay, RelayConfig};

/// How long a closing socket may take to flush its writer
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// State shared by every request handler
#[derive(Clone)]
struct AppState {
    relay: Relay,
    max_message_size: usize,
    channel_capacity: usize,
    closing: watch::Receiver<bool>,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Always `"ok"` while the server answers
    pub status: &'static str,
    /// Whether a primary is registered
    pub primary_connected: bool,
    /// Connection counts
    #[serde(flatten)]
    pub connections: RegistrySummary,
}

/// The relay daemon server
pub struct RelayServer {
    config: RelayConfig,
    relay: Relay,
    closing: watch::Sender<bool>,
}

impl RelayServer {
    /// Create a server with a fresh registry
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        let relay = Relay::new(ConnectionRegistry::new(), config.max_message_size);
        let (closing, _) = watch::channel(false);
        Self {
            config,
            relay,
            closing,
        }
    }

    /// The router behind the sockets
    #[must_use]
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Server configuration
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Build the HTTP routes
    pub fn router(&self) -> Router {
        let state = AppState {
            relay: self.relay.clone(),
            max_message_size: self.config.max_message_size,
            channel_capacity: self.config.channel_capacity,
            closing: self.closing.subscribe(),
        };

        let router = Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(state);

        let router = match &self.config.static_dir {
            Some(dir) => {
                info!(path = %dir.display(), "Serving static files");
                router.fallback_service(ServeDir::new(dir))
            }
            None => router,
        };

        router.layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.config.bind_address)
            .await
            .with_context(|| format!("Failed to bind to {}", self.config.bind_address))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listener.local_addr()?;
        info!(%addr, "Relay listening");

        let cleanup = tokio::spawn(cleanup_loop(
            self.relay.clone(),
            self.config.cleanup_interval,
        ));

        let closing = self.closing.clone();
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Shutting down; closing open sockets");
                closing.send_replace(true);
            })
            .await
            .context("Relay server failed");

        // Also covers a serve error, where the shutdown future never ran
        self.closing.send_replace(true);
        cleanup.abort();
        info!(
            connections = self.relay.registry().count(),
            "Relay stopped"
        );
        result
    }
}

/// Sweep handles whose writer task has gone away
async fn cleanup_loop(relay: Relay, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        let removed = relay.registry().cleanup_disconnected();
        debug!(removed, "Cleanup sweep finished");
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    let registry = state.relay.registry();
    Json(HealthReport {
        status: "ok",
        primary_connected: registry.count_by_role(ConnectionRole::Primary) > 0,
        connections: registry.summary(),
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max = state.max_message_size;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<String>(state.channel_capacity);
    let id = state.relay.on_open(tx);
    let span = tracing::info_span!("connection", connection_id = %id);

    async move {
        info!("Connection opened");
        let (mut sink, mut stream) = socket.split();

        let mut writer = tokio::spawn(
            async move {
                while let Some(frame) = rx.recv().await {
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        debug!(error = %e, "Write failed; closing writer");
                        break;
                    }
                }
                let _ = sink.close().await;
            }
            .in_current_span(),
        );

        let closing = server_closing(state.closing.clone());
        tokio::pin!(closing);

        loop {
            let message = tokio::select! {
                message = stream.next() => message,
                () = &mut closing => {
                    debug!("Server closing");
                    break;
                }
            };
            let Some(message) = message else { break };
            match message {
                Ok(Message::Text(text)) => {
                    let outcome = state.relay.on_text(id, &text);
                    debug!(?outcome, "Frame routed");
                }
                Ok(Message::Binary(bytes)) => {
                    warn!(len = bytes.len(), "Dropping binary frame");
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(e) => {
                    debug!(error = %e, "Read failed");
                    break;
                }
            }
        }

        // Unregistering drops the last sender, so the writer sends a close
        // frame once its queue is flushed
        state.relay.on_close(&id);
        if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
            writer.abort();
        }
        info!("Connection closed");
    }
    .instrument(span)
    .await;
}

/// Resolves once the server starts shutting down
async fn server_closing(mut closing: watch::Receiver<bool>) {
    let closed = closing.wait_for(|closing| *closing).await.is_ok();
    if !closed {
        // Server handle dropped without serving; keep the socket open
        std::future::pending::<()>().await;
    }
}
