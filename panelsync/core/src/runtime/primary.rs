//! Primary Runtime
//!
//! Owns the [`StateAuthority`] and its relay connection. A single task
//! serializes everything that touches the authority:
//!
//! ```text
//!   relay frames ──┐
//!   local commands ┼──▶ [select loop] ──▶ StateAuthority ──▶ outbox ──▶ relay
//!   timer events ──┘          │
//!                             └── reconnect timer (fixed delay)
//! ```
//!
//! On every (re)connect the primary registers as `main` and pushes
//! `client.syncPanels` so remotes that were waiting get a baseline.

use std::future::Future;

use tokio::sync::{mpsc, oneshot, watch};

use crate::authority::{AuthorityConfig, AuthorityEvent, Collaborators, SliderOrigin, StateAuthority};
use crate::model::{PanelConfig, SliderScope, StateSnapshot};
use crate::persistence::PersistenceError;
use crate::protocol::{ClientType, LifecycleMessage, PanelId, Position, Size, WireMessage};
use crate::transport::{ConnectionStatus, ReconnectPolicy, ReconnectTimer, RelayClient};

/// Capacity of the local command channel
const LOCAL_COMMAND_CAPACITY: usize = 64;

/// An operation requested by the primary's own UI
#[derive(Debug)]
pub enum LocalCommand {
    /// Create a panel; the new ID is sent to `reply` if given
    CreatePanel {
        /// Initial settings
        config: PanelConfig,
        /// Receives the new panel's ID
        reply: Option<oneshot::Sender<PanelId>>,
    },
    /// Delete a panel
    DeletePanel(PanelId),
    /// Rename a panel
    RenamePanel {
        /// Panel
        id: PanelId,
        /// New title
        title: String,
    },
    /// Replace a panel's source
    SetPanelCode {
        /// Panel
        id: PanelId,
        /// New source
        code: String,
    },
    /// Move or resize a panel
    MovePanel {
        /// Panel
        id: PanelId,
        /// New position
        position: Option<Position>,
        /// New size
        size: Option<Size>,
    },
    /// Start a panel
    Play(PanelId),
    /// Stop a panel
    Pause(PanelId),
    /// Flip a panel between playing and paused
    Toggle(PanelId),
    /// Re-evaluate a panel
    Update(PanelId),
    /// Stop every panel
    StopAll,
    /// Re-evaluate every stale panel
    UpdateAll,
    /// Replace the master's source
    SetMasterCode(String),
    /// Collapse or expand the master
    SetMasterCompact(bool),
    /// Evaluate the master now
    EvaluateMaster,
    /// Move a slider from the local editor
    SliderChange {
        /// Slider owner
        scope: SliderScope,
        /// Slider ID
        slider_id: String,
        /// New value
        value: f64,
    },
    /// Copy of the current state
    Snapshot(oneshot::Sender<StateSnapshot>),
}

/// Handle for driving a running [`PrimaryRuntime`]
#[derive(Clone, Debug)]
pub struct PrimaryHandle {
    commands: mpsc::Sender<LocalCommand>,
    status: watch::Receiver<ConnectionStatus>,
}

impl PrimaryHandle {
    /// Queue a local command
    ///
    /// Returns `false` when the runtime has stopped.
    pub async fn send(&self, command: LocalCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Create a panel and wait for its ID
    pub async fn create_panel(&self, config: PanelConfig) -> Option<PanelId> {
        let (reply, rx) = oneshot::channel();
        if !self
            .send(LocalCommand::CreatePanel {
                config,
                reply: Some(reply),
            })
            .await
        {
            return None;
        }
        rx.await.ok()
    }

    /// Current state of the authority
    pub async fn snapshot(&self) -> Option<StateSnapshot> {
        let (reply, rx) = oneshot::channel();
        if !self.send(LocalCommand::Snapshot(reply)).await {
            return None;
        }
        rx.await.ok()
    }

    /// Relay connection status
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch the relay connection status
    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }
}

/// The primary client: authority plus relay connection
pub struct PrimaryRuntime {
    authority: StateAuthority,
    events: mpsc::Receiver<AuthorityEvent>,
    outbox: mpsc::UnboundedReceiver<WireMessage>,
    commands: mpsc::Receiver<LocalCommand>,
    client: RelayClient,
    policy: ReconnectPolicy,
    reconnect: ReconnectTimer,
    status: watch::Sender<ConnectionStatus>,
}

impl PrimaryRuntime {
    /// Build a runtime that will connect to `relay_url`
    #[must_use]
    pub fn new(
        relay_url: impl Into<String>,
        policy: ReconnectPolicy,
        config: AuthorityConfig,
        collab: Collaborators,
    ) -> (Self, PrimaryHandle) {
        let (outbox_tx, outbox) = mpsc::unbounded_channel();
        let (authority, events) = StateAuthority::new(config, collab, outbox_tx);
        let (commands_tx, commands) = mpsc::channel(LOCAL_COMMAND_CAPACITY);
        let (status, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let runtime = Self {
            authority,
            events,
            outbox,
            commands,
            client: RelayClient::new(relay_url),
            policy,
            reconnect: ReconnectTimer::immediate(),
            status,
        };
        let handle = PrimaryHandle {
            commands: commands_tx,
            status: status_rx,
        };
        (runtime, handle)
    }

    /// The authority
    #[must_use]
    pub fn authority(&self) -> &StateAuthority {
        &self.authority
    }

    /// Restore persisted panels; call before [`PrimaryRuntime::run`]
    ///
    /// # Errors
    ///
    /// Returns the storage backend's error.
    pub async fn load(&mut self) -> Result<usize, PersistenceError> {
        self.authority.load().await
    }

    /// Run until `shutdown` completes
    pub async fn run<S>(mut self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!(url = %self.client.url(), "Primary runtime started");

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                () = self.reconnect.fired() => self.connect().await,
                message = self.client.recv() => match message {
                    Some(message) => self.handle_relay(message).await,
                    None => self.connection_lost(),
                },
                Some(event) = self.events.recv() => self.authority.handle_event(event).await,
                Some(command) = self.commands.recv() => {
                    dispatch_local(&mut self.authority, command).await;
                }
                Some(message) = self.outbox.recv() => {
                    self.client.send(&message);
                }
            }
        }

        self.authority.cancel_timers();
        self.client.disconnect();
        self.status.send_replace(ConnectionStatus::Disconnected);
        tracing::info!("Primary runtime stopped");
    }

    async fn connect(&mut self) {
        self.status.send_replace(ConnectionStatus::Connecting);
        match self.client.connect(self.policy.connect_timeout).await {
            Ok(()) => {
                self.status.send_replace(ConnectionStatus::Connected);
                self.client.send(&WireMessage::register(ClientType::Main));
                self.client.send(&self.authority.sync_message());
            }
            Err(e) => {
                tracing::warn!(error = %e, retry_in = ?self.policy.delay, "Relay connection failed");
                self.status.send_replace(ConnectionStatus::Disconnected);
                self.reconnect.arm(self.policy.delay);
            }
        }
    }

    fn connection_lost(&mut self) {
        tracing::warn!(retry_in = ?self.policy.delay, "Relay connection lost");
        self.client.disconnect();
        self.status.send_replace(ConnectionStatus::Disconnected);
        self.reconnect.arm(self.policy.delay);
    }

    async fn handle_relay(&mut self, message: WireMessage) {
        match message {
            WireMessage::Lifecycle(LifecycleMessage::RequestFullState) => {
                self.authority.publish_full_state();
            }
            WireMessage::Command(command) => {
                if let Err(e) = self.authority.handle_command(command).await {
                    tracing::warn!(error = %e, "Remote command failed");
                }
            }
            other => {
                tracing::debug!(kind = %other.kind(), "Ignoring message not meant for the primary");
            }
        }
    }
}

/// Apply one local command to the authority
///
/// Failures are logged; the UI learns about them through highlights.
pub async fn dispatch_local(authority: &mut StateAuthority, command: LocalCommand) {
    let result = match command {
        LocalCommand::CreatePanel { config, reply } => {
            let id = authority.create_panel(config).await;
            if let Some(reply) = reply {
                let _ = reply.send(id);
            }
            Ok(())
        }
        LocalCommand::DeletePanel(id) => authority.delete_panel(&id).await,
        LocalCommand::RenamePanel { id, title } => authority.rename_panel(&id, title).await,
        LocalCommand::SetPanelCode { id, code } => {
            authority.set_panel_code(&id, code).await.map(|_| ())
        }
        LocalCommand::MovePanel { id, position, size } => {
            authority.move_panel(&id, position, size).await
        }
        LocalCommand::Play(id) => authority.play_panel(&id).await,
        LocalCommand::Pause(id) => authority.pause_panel(&id).await,
        LocalCommand::Toggle(id) => authority.toggle_panel(&id).await,
        LocalCommand::Update(id) => authority.update_panel(&id).await,
        LocalCommand::StopAll => {
            authority.stop_all().await;
            Ok(())
        }
        LocalCommand::UpdateAll => {
            authority.update_all().await;
            Ok(())
        }
        LocalCommand::SetMasterCode(code) => {
            authority.set_master_code(code).await;
            Ok(())
        }
        LocalCommand::SetMasterCompact(compact) => {
            authority.set_master_compact(compact).await;
            Ok(())
        }
        LocalCommand::EvaluateMaster => authority.evaluate_master().await,
        LocalCommand::SliderChange {
            scope,
            slider_id,
            value,
        } => authority.update_slider_value(scope, slider_id, value, SliderOrigin::Local),
        LocalCommand::Snapshot(reply) => {
            let _ = reply.send(authority.snapshot());
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::warn!(error = %e, "Local command failed");
    }
}
