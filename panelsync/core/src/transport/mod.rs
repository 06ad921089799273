//! Relay Transport
//!
//! Client side of the WebSocket link between the primary or a remote and
//! the relay.
//!
//! # Module Structure
//!
//! - `traits`: error and status types
//! - `websocket`: [`RelayClient`], the split reader/writer connection
//! - `reconnect`: fixed-delay retry timing

mod reconnect;
mod traits;
mod websocket;

pub use reconnect::{
    ReconnectPolicy, ReconnectTimer, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECONNECT_DELAY,
};
pub use traits::{ConnectionStatus, TransportError};
pub use websocket::RelayClient;
