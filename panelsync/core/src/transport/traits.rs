//! Transport Types
//!
//! Errors and status shared by the client side of the relay connection.

use std::fmt;

use thiserror::Error;

use crate::protocol::ProtocolError;

/// Errors that can occur on the relay connection
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the relay
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection attempt exceeded its timeout
    #[error("Connection timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The connection was closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// A frame could not be queued for sending
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Frame could not be encoded or decoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Connection status as shown to the user
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection; a retry may be scheduled
    #[default]
    Disconnected,
    /// Attempt in progress
    Connecting,
    /// Connected to the relay
    Connected,
}

impl ConnectionStatus {
    /// Whether messages can be sent
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}
