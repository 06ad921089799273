//! Remote Runtime
//!
//! Drives a [`RemoteView`] from the relay connection. Commands from the
//! remote's UI are forwarded only while the view is live; before the
//! baseline arrives there are no controls to issue them from.

use std::future::Future;

use tokio::sync::{mpsc, watch};

use crate::protocol::{ClientType, CommandMessage, LifecycleMessage, WireMessage};
use crate::transport::{ConnectionStatus, ReconnectPolicy, ReconnectTimer, RelayClient};
use crate::view::RemoteView;

/// Capacity of the command channel
const COMMAND_CAPACITY: usize = 64;

/// Handle for driving a running [`RemoteRuntime`]
#[derive(Clone, Debug)]
pub struct RemoteHandle {
    commands: mpsc::Sender<CommandMessage>,
    view: watch::Receiver<RemoteView>,
    status: watch::Receiver<ConnectionStatus>,
}

impl RemoteHandle {
    /// Queue a command for the primary
    ///
    /// Returns `false` when the runtime has stopped.
    pub async fn send(&self, command: CommandMessage) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Copy of the current view
    #[must_use]
    pub fn view(&self) -> RemoteView {
        self.view.borrow().clone()
    }

    /// Watch the view; changes with every applied message
    #[must_use]
    pub fn view_watch(&self) -> watch::Receiver<RemoteView> {
        self.view.clone()
    }

    /// Relay connection status
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }
}

/// A thin remote surface
pub struct RemoteRuntime {
    client: RelayClient,
    policy: ReconnectPolicy,
    reconnect: ReconnectTimer,
    commands: mpsc::Receiver<CommandMessage>,
    view: watch::Sender<RemoteView>,
    status: watch::Sender<ConnectionStatus>,
}

impl RemoteRuntime {
    /// Build a runtime that will connect to `relay_url`
    #[must_use]
    pub fn new(relay_url: impl Into<String>, policy: ReconnectPolicy) -> (Self, RemoteHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (view, view_rx) = watch::channel(RemoteView::new());
        let (status, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let runtime = Self {
            client: RelayClient::new(relay_url),
            policy,
            reconnect: ReconnectTimer::immediate(),
            commands,
            view,
            status,
        };
        let handle = RemoteHandle {
            commands: commands_tx,
            view: view_rx,
            status: status_rx,
        };
        (runtime, handle)
    }

    /// Run until `shutdown` completes
    pub async fn run<S>(mut self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!(url = %self.client.url(), "Remote runtime started");

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                () = self.reconnect.fired() => self.connect().await,
                message = self.client.recv() => match message {
                    Some(message) => self.handle_relay(&message),
                    None => self.connection_lost(),
                },
                Some(command) = self.commands.recv() => self.forward(command),
            }
        }

        self.client.disconnect();
        self.view.send_modify(RemoteView::disconnected);
        self.status.send_replace(ConnectionStatus::Disconnected);
        tracing::info!("Remote runtime stopped");
    }

    async fn connect(&mut self) {
        self.status.send_replace(ConnectionStatus::Connecting);
        match self.client.connect(self.policy.connect_timeout).await {
            Ok(()) => {
                self.status.send_replace(ConnectionStatus::Connected);
                self.register();
            }
            Err(e) => {
                tracing::warn!(error = %e, retry_in = ?self.policy.delay, "Relay connection failed");
                self.status.send_replace(ConnectionStatus::Disconnected);
                self.reconnect.arm(self.policy.delay);
            }
        }
    }

    fn register(&mut self) {
        if self.client.send(&WireMessage::register(ClientType::Remote)) {
            self.view.send_modify(RemoteView::registered);
        }
    }

    fn connection_lost(&mut self) {
        tracing::warn!(retry_in = ?self.policy.delay, "Relay connection lost");
        self.client.disconnect();
        self.view.send_modify(RemoteView::disconnected);
        self.status.send_replace(ConnectionStatus::Disconnected);
        self.reconnect.arm(self.policy.delay);
    }

    fn handle_relay(&mut self, message: &WireMessage) {
        self.view.send_if_modified(|view| view.apply(message));

        // The primary came back: its state may have changed while it was
        // away, so run the handshake again.
        if let WireMessage::Lifecycle(LifecycleMessage::PrimaryStatus { connected: true }) = message {
            tracing::info!("Primary reconnected; re-registering");
            self.register();
        }
    }

    fn forward(&self, command: CommandMessage) {
        if !self.view.borrow().controls_enabled() {
            tracing::debug!(?command, "Controls disabled; command dropped");
            return;
        }
        self.client.send(&WireMessage::Command(command));
    }
}
