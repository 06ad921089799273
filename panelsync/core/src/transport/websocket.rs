//! WebSocket Relay Client
//!
//! One connection from a primary or remote to the relay. The socket is
//! split into a reader task and a writer task that talk to the owner over
//! channels:
//!
//! ```text
//!   send() ──▶ outgoing ──▶ [writer task] ──▶ ws sink
//!   recv() ◀── incoming ◀── [reader task] ◀── ws stream
//! ```
//!
//! Sending is guarded: a message handed to a disconnected client is
//! dropped and reported, never queued for later.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::traits::{ConnectionStatus, TransportError};
use crate::protocol::{WireMessage, DEFAULT_MAX_MESSAGE_SIZE};

/// Buffer size for the per-connection channels
const CHANNEL_CAPACITY: usize = 256;

/// Client end of the relay connection
pub struct RelayClient {
    url: String,
    max_message_size: usize,
    connected: Arc<AtomicBool>,
    outgoing: Option<mpsc::Sender<String>>,
    incoming: Option<mpsc::Receiver<WireMessage>>,
    reader: Option<JoinHandle<()>>,
}

impl RelayClient {
    /// Create a disconnected client for `url`
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            connected: Arc::new(AtomicBool::new(false)),
            outgoing: None,
            incoming: None,
            reader: None,
        }
    }

    /// Limit on inbound frame size
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Relay URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the socket is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.outgoing.is_some() && self.connected.load(Ordering::Acquire)
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        if self.is_connected() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    /// Open the socket, giving up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns an error if already connected, if the handshake fails, or if
    /// it does not finish in time.
    pub async fn connect(&mut self, timeout: Duration) -> Result<(), TransportError> {
        if self.is_connected() {
            return Err(TransportError::InvalidState("already connected".to_string()));
        }
        self.disconnect();

        tracing::debug!(url = %self.url, "Connecting to relay");
        let (ws_stream, _response) = tokio::time::timeout(timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<WireMessage>(CHANNEL_CAPACITY);

        self.connected.store(true, Ordering::Release);

        let connected = Arc::clone(&self.connected);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    tracing::warn!(error = %e, "Relay write failed");
                    break;
                }
            }
            connected.store(false, Ordering::Release);
            let _ = sink.close().await;
        });

        let connected = Arc::clone(&self.connected);
        let max = self.max_message_size;
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match WireMessage::parse_limited(&text, max) {
                        Ok(message) => {
                            if in_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Dropping invalid frame from relay"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Relay read failed");
                        break;
                    }
                }
            }
            connected.store(false, Ordering::Release);
        });

        self.outgoing = Some(out_tx);
        self.incoming = Some(in_rx);
        self.reader = Some(reader);

        tracing::info!(url = %self.url, "Connected to relay");
        Ok(())
    }

    /// Queue `message` for the relay
    ///
    /// Returns `false` (and logs) when the client is disconnected or the
    /// frame cannot be queued.
    pub fn send(&self, message: &WireMessage) -> bool {
        let kind = message.kind();
        let Some(outgoing) = self.outgoing.as_ref().filter(|_| self.is_connected()) else {
            tracing::debug!(%kind, "Not connected; message dropped");
            return false;
        };

        let frame = match message.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(%kind, error = %e, "Failed to encode message");
                return false;
            }
        };

        match outgoing.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%kind, error = %e, "Failed to queue message");
                false
            }
        }
    }

    /// Next message from the relay
    ///
    /// Returns `None` once the connection has ended. Never completes while
    /// disconnected, so it can sit in a `select!` loop permanently.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        match self.incoming.as_mut() {
            Some(incoming) => incoming.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Close the socket and forget the connection
    pub fn disconnect(&mut self) {
        self.connected.store(false, Ordering::Release);
        self.outgoing = None;
        self.incoming = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("url", &self.url)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClientType;

    #[test]
    fn test_new_client_is_disconnected() {
        let client = RelayClient::new("ws://127.0.0.1:1/ws");
        assert!(!client.is_connected());
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert_eq!(client.url(), "ws://127.0.0.1:1/ws");
    }

    #[test]
    fn test_send_while_disconnected_is_dropped() {
        let client = RelayClient::new("ws://127.0.0.1:1/ws");
        assert!(!client.send(&WireMessage::register(ClientType::Remote)));
    }

    #[tokio::test]
    async fn test_recv_while_disconnected_pends() {
        let mut client = RelayClient::new("ws://127.0.0.1:1/ws");
        let result = tokio::time::timeout(Duration::from_millis(20), client.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = RelayClient::new(format!("ws://127.0.0.1:{port}/ws"));
        let result = client.connect(Duration::from_secs(2)).await;
        assert!(result.is_err());
        assert!(!client.is_connected());
    }
}
