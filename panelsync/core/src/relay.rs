//! Relay Router
//!
//! Routes frames between connections by message type alone. The relay
//! never decodes panel payloads and holds no panel state; it forwards the
//! original frame text.
//!
//! | Inbound | Action |
//! |---|---|
//! | `client.register` | classify the sender; a remote triggers `server.requestFullState` to primaries |
//! | broadcast set, `client.syncPanels` | every remote |
//! | command set, `server.requestFullState` | every primary; dropped when none is connected |
//! | `server.primaryStatus` | relay-only; dropped |
//! | anything else | malformed; logged and dropped |
//!
//! When a primary registers, or the last primary disconnects, remotes get
//! `server.primaryStatus` so they can show the outage and re-run the
//! handshake when the primary is back.

use tokio::sync::mpsc;

use crate::protocol::{
    peek_kind, ClientType, LifecycleMessage, MessageKind, Route, WireMessage,
    DEFAULT_MAX_MESSAGE_SIZE,
};
use crate::registry::{
    ClassifyOutcome, ConnectionHandle, ConnectionId, ConnectionRegistry, ConnectionRole,
};
use crate::resync::ResyncCoordinator;

/// Why a frame was not forwarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Frame failed envelope or schema validation
    Malformed(String),
    /// Command arrived while no primary was connected
    NoPrimary,
    /// Kind may only originate from the relay
    RelayOnly(MessageKind),
}

/// What the relay did with a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Frame queued for every connection of the target role
    Forwarded {
        /// Message kind
        kind: MessageKind,
        /// Connections that accepted it
        delivered: usize,
        /// Connections that did not
        failed: usize,
    },
    /// `client.register` processed
    Registered {
        /// Role claimed
        role: ConnectionRole,
        /// Registry outcome
        outcome: ClassifyOutcome,
    },
    /// Frame discarded
    Dropped(DropReason),
}

/// Message router over a [`ConnectionRegistry`]
#[derive(Clone, Debug)]
pub struct Relay {
    registry: ConnectionRegistry,
    max_message_size: usize,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(ConnectionRegistry::new(), DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl Relay {
    /// Create a relay over `registry`
    #[must_use]
    pub fn new(registry: ConnectionRegistry, max_message_size: usize) -> Self {
        Self {
            registry,
            max_message_size,
        }
    }

    /// The underlying registry
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Track a newly opened connection whose frames are written to `tx`
    pub fn on_open(&self, tx: mpsc::Sender<String>) -> ConnectionId {
        self.registry
            .register(ConnectionHandle::new(ConnectionId::new(), tx))
    }

    /// Route one text frame received from `from`
    pub fn on_text(&self, from: ConnectionId, text: &str) -> RouteOutcome {
        let kind = match peek_kind(text, self.max_message_size) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!(connection_id = %from, error = %e, "Dropping malformed frame");
                return RouteOutcome::Dropped(DropReason::Malformed(e.to_string()));
            }
        };

        match kind.route() {
            Route::Register => self.handle_register(from, text),
            Route::RelayOnly => {
                tracing::warn!(connection_id = %from, %kind, "Dropping relay-only message");
                RouteOutcome::Dropped(DropReason::RelayOnly(kind))
            }
            Route::Remotes => self.forward(from, kind, ConnectionRole::Remote, text),
            Route::Primaries => {
                if self.registry.count_by_role(ConnectionRole::Primary) == 0 {
                    tracing::info!(connection_id = %from, %kind, "No primary connected; dropping command");
                    return RouteOutcome::Dropped(DropReason::NoPrimary);
                }
                self.forward(from, kind, ConnectionRole::Primary, text)
            }
        }
    }

    /// Forget a closed connection
    pub fn on_close(&self, id: &ConnectionId) {
        let Some(handle) = self.registry.unregister(id) else {
            return;
        };
        if handle.role == ConnectionRole::Primary
            && self.registry.count_by_role(ConnectionRole::Primary) == 0
        {
            tracing::warn!(connection_id = %id, "Primary disconnected");
            self.notify_remotes_primary_status(false);
        }
    }

    fn forward(
        &self,
        from: ConnectionId,
        kind: MessageKind,
        role: ConnectionRole,
        text: &str,
    ) -> RouteOutcome {
        let result = self.registry.send_to_role(role, text);
        tracing::debug!(
            connection_id = %from,
            %kind,
            %role,
            delivered = result.successful,
            "Forwarded frame"
        );
        RouteOutcome::Forwarded {
            kind,
            delivered: result.successful,
            failed: result.failed,
        }
    }

    fn handle_register(&self, from: ConnectionId, text: &str) -> RouteOutcome {
        let client_type = match serde_json::from_str::<LifecycleMessage>(text) {
            Ok(LifecycleMessage::Register { client_type }) => client_type,
            Ok(_) | Err(_) => {
                tracing::warn!(connection_id = %from, "Dropping malformed client.register");
                return RouteOutcome::Dropped(DropReason::Malformed(
                    "invalid client.register payload".to_string(),
                ));
            }
        };

        let role = ConnectionRole::from(client_type);
        let outcome = self.registry.classify(&from, role);

        match (outcome, client_type) {
            (ClassifyOutcome::Assigned | ClassifyOutcome::Unchanged, ClientType::Remote) => {
                self.request_full_state(from);
            }
            (ClassifyOutcome::Assigned, ClientType::Main) => {
                self.notify_remotes_primary_status(true);
            }
            _ => {}
        }

        RouteOutcome::Registered { role, outcome }
    }

    fn request_full_state(&self, remote: ConnectionId) {
        if self.registry.count_by_role(ConnectionRole::Primary) == 0 {
            tracing::info!(connection_id = %remote, "Remote registered with no primary connected");
            if let Some(frame) = encode(&LifecycleMessage::PrimaryStatus { connected: false }.into()) {
                self.registry.send_to(&remote, &frame);
            }
            return;
        }

        if let Some(frame) = encode(&ResyncCoordinator::request()) {
            let result = self.registry.send_to_role(ConnectionRole::Primary, &frame);
            tracing::debug!(
                connection_id = %remote,
                primaries = result.successful,
                "Requested full state for remote"
            );
        }
    }

    fn notify_remotes_primary_status(&self, connected: bool) {
        if let Some(frame) = encode(&LifecycleMessage::PrimaryStatus { connected }.into()) {
            let result = self.registry.send_to_role(ConnectionRole::Remote, &frame);
            tracing::info!(connected, remotes = result.successful, "Sent primary status");
        }
    }
}

fn encode(message: &WireMessage) -> Option<String> {
    match message.to_json() {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode relay message");
            None
        }
    }
}
