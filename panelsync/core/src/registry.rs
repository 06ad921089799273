//! Connection Registry
//!
//! Every open relay connection, its outbound channel and its role. A
//! connection starts `Unclassified`; its first `client.register` fixes the
//! role for the rest of its lifetime.
//!
//! # Architecture
//!
//! ```text
//!                    ConnectionRegistry
//!           ┌──────────────────────────────────────────┐
//!           │ HashMap<ConnectionId, ConnectionHandle>  │
//!           │   - wrapped in Arc<RwLock<>>             │
//!           └──────────────────┬───────────────────────┘
//!                              │
//!         ┌────────────────────┼────────────────────┐
//!         │                    │                    │
//!   ┌─────▼─────┐        ┌─────▼─────┐        ┌─────▼─────┐
//!   │  primary  │        │  remote   │        │  remote   │
//!   │  conn-1   │        │  conn-2   │        │  conn-3   │
//!   └───────────┘        └───────────┘        └───────────┘
//! ```
//!
//! # Thread Safety
//!
//! Each connection's handler runs on its own task, so the registry
//! serializes writes (open, close, classify) behind a `RwLock` while
//! fan-out sends only take the read lock. Sends use `try_send` and never
//! wait on a slow peer while the lock is held.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::protocol::ClientType;

/// Unique identifier for a relay connection
///
/// Stable for the lifetime of the connection; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new unique connection ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Create a connection ID from a raw value
    #[cfg(test)]
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Role of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    /// Opened but not yet registered
    Unclassified,
    /// The authoritative client
    Primary,
    /// A thin remote surface
    Remote,
}

impl From<ClientType> for ConnectionRole {
    fn from(value: ClientType) -> Self {
        match value {
            ClientType::Main => Self::Primary,
            ClientType::Remote => Self::Remote,
        }
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unclassified => write!(f, "unclassified"),
            Self::Primary => write!(f, "primary"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Handle to an open connection
///
/// The relay writes raw frame text into `tx`; the connection's writer task
/// drains it onto the socket.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Unique connection identifier
    pub id: ConnectionId,
    /// Current role
    pub role: ConnectionRole,
    /// Outbound frame channel
    pub tx: mpsc::Sender<String>,
    /// When the connection opened
    pub connected_at: Instant,
}

impl ConnectionHandle {
    /// Create an unclassified handle
    #[must_use]
    pub fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            role: ConnectionRole::Unclassified,
            tx,
            connected_at: Instant::now(),
        }
    }

    /// Try to queue a frame without waiting
    ///
    /// Returns false when the connection is gone or its queue is full.
    #[must_use]
    pub fn try_send(&self, frame: &str) -> bool {
        self.is_connected() && self.tx.try_send(frame.to_string()).is_ok()
    }

    /// Check if the connection's writer is still alive
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Connection uptime in seconds
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.connected_at.elapsed().as_secs()
    }
}

/// Result of a registration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyOutcome {
    /// Role set for the first time
    Assigned,
    /// Same role claimed again; nothing changed
    Unchanged,
    /// A different role was claimed; ignored
    Conflict {
        /// Role the connection keeps
        current: ConnectionRole,
    },
    /// No such connection
    Unknown,
}

/// Result of a fan-out send
#[derive(Debug, Clone, Default)]
pub struct BroadcastResult {
    /// Number of connections that accepted the frame
    pub successful: usize,
    /// Number of connections that did not
    pub failed: usize,
    /// IDs of connections that did not
    pub failed_ids: Vec<ConnectionId>,
}

impl BroadcastResult {
    /// Check if all recipients received the frame
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Number of recipients attempted
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.successful + self.failed
    }
}

/// Connection counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySummary {
    /// All open connections
    pub total_connections: usize,
    /// Registered primaries
    pub primaries: usize,
    /// Registered remotes
    pub remotes: usize,
    /// Not yet registered
    pub unclassified: usize,
}

/// Registry of open relay connections
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a newly opened connection
    pub fn register(&self, handle: ConnectionHandle) -> ConnectionId {
        let id = handle.id;
        self.inner.write().insert(id, handle);
        tracing::info!(connection_id = %id, "Connection opened");
        id
    }

    /// Remove a connection
    ///
    /// Returns the handle if it was registered.
    pub fn unregister(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        let handle = self.inner.write().remove(id);
        if let Some(handle) = &handle {
            tracing::info!(
                connection_id = %id,
                role = %handle.role,
                uptime_secs = handle.uptime_secs(),
                "Connection closed"
            );
        }
        handle
    }

    /// Set a connection's role from its first registration
    pub fn classify(&self, id: &ConnectionId, role: ConnectionRole) -> ClassifyOutcome {
        let mut inner = self.inner.write();
        let Some(handle) = inner.get_mut(id) else {
            return ClassifyOutcome::Unknown;
        };

        match handle.role {
            ConnectionRole::Unclassified => {
                handle.role = role;
                tracing::info!(connection_id = %id, %role, "Connection registered");
                ClassifyOutcome::Assigned
            }
            current if current == role => ClassifyOutcome::Unchanged,
            current => {
                tracing::warn!(
                    connection_id = %id,
                    %current,
                    claimed = %role,
                    "Ignoring conflicting role claim"
                );
                ClassifyOutcome::Conflict { current }
            }
        }
    }

    /// Number of open connections
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.read().len()
    }

    /// Check if a connection is registered
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Role of a connection
    #[must_use]
    pub fn role_of(&self, id: &ConnectionId) -> Option<ConnectionRole> {
        self.inner.read().get(id).map(|h| h.role)
    }

    /// Number of connections with `role`
    #[must_use]
    pub fn count_by_role(&self, role: ConnectionRole) -> usize {
        self.inner.read().values().filter(|h| h.role == role).count()
    }

    /// Queue a frame for one connection
    ///
    /// Returns true if the frame was queued.
    pub fn send_to(&self, id: &ConnectionId, frame: &str) -> bool {
        let inner = self.inner.read();
        if let Some(handle) = inner.get(id) {
            handle.try_send(frame)
        } else {
            tracing::warn!(connection_id = %id, "Attempted to send to unknown connection");
            false
        }
    }

    /// Queue a frame for every connection with `role`
    #[must_use]
    pub fn send_to_role(&self, role: ConnectionRole, frame: &str) -> BroadcastResult {
        let inner = self.inner.read();
        let mut result = BroadcastResult::default();

        for (id, handle) in inner.iter().filter(|(_, h)| h.role == role) {
            if handle.try_send(frame) {
                result.successful += 1;
            } else {
                result.failed += 1;
                result.failed_ids.push(*id);
            }
        }

        if result.failed > 0 {
            tracing::warn!(
                %role,
                failed = result.failed,
                "Some connections did not accept a frame"
            );
        }
        result
    }

    /// Connection counts by role
    #[must_use]
    pub fn summary(&self) -> RegistrySummary {
        let inner = self.inner.read();
        let mut summary = RegistrySummary {
            total_connections: inner.len(),
            ..RegistrySummary::default()
        };
        for handle in inner.values() {
            match handle.role {
                ConnectionRole::Primary => summary.primaries += 1,
                ConnectionRole::Remote => summary.remotes += 1,
                ConnectionRole::Unclassified => summary.unclassified += 1,
            }
        }
        summary
    }

    /// Remove connections whose writer has gone away
    ///
    /// Returns the number of connections removed.
    pub fn cleanup_disconnected(&self) -> usize {
        let mut inner = self.inner.write();
        let before = inner.len();

        inner.retain(|id, handle| {
            let connected = handle.is_connected();
            if !connected {
                tracing::info!(connection_id = %id, "Removing disconnected connection");
            }
            connected
        });

        let removed = before - inner.len();
        if removed > 0 {
            tracing::info!(
                removed,
                remaining = inner.len(),
                "Cleaned up disconnected connections"
            );
        }
        removed
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &inner.len())
            .field("connections", &inner.keys().collect::<Vec<_>>())
            .finish()
    }
}
