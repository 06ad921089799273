//! In-memory stage for integration tests
//!
//! Wires a [`Relay`], a primary's [`StateAuthority`] and any number of
//! [`RemoteView`]s together with plain channels, so whole sync flows run
//! without sockets. Frames still cross the relay as JSON text.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use panelsync_core::{
    AuthorityConfig, AuthorityEvent, ClientType, Collaborators, CommandMessage, ConnectionId,
    EvalError, EvalTarget, Evaluator, LifecycleMessage, MemoryPersistence, Relay, RemoteView,
    StateAuthority, TracingSurface, WireMessage,
};

/// Evaluator that accepts everything except registered sources
#[derive(Default)]
pub struct ScriptedEvaluator {
    rejected: Mutex<HashSet<String>>,
    evaluations: Mutex<Vec<String>>,
}

impl ScriptedEvaluator {
    pub fn reject(&self, source: &str) {
        self.rejected.lock().insert(source.to_string());
    }

    pub fn evaluations(&self) -> Vec<String> {
        self.evaluations.lock().clone()
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn evaluate(&self, target: &EvalTarget, source: &str) -> Result<(), EvalError> {
        self.evaluations.lock().push(target.to_string());
        if self.rejected.lock().contains(source) {
            return Err(EvalError::rejected(target, "unexpected token"));
        }
        Ok(())
    }

    async fn silence(&self, _target: &EvalTarget) -> Result<(), EvalError> {
        Ok(())
    }
}

/// The primary: authority plus its relay connection
pub struct Primary {
    pub id: ConnectionId,
    pub authority: StateAuthority,
    pub evaluator: Arc<ScriptedEvaluator>,
    pub events: mpsc::Receiver<AuthorityEvent>,
    connected: bool,
    inbox: mpsc::Receiver<String>,
    outbox: mpsc::UnboundedReceiver<WireMessage>,
}

impl Primary {
    /// Push everything the authority emitted through the relay
    ///
    /// While disconnected the frames are lost, as with the real client.
    pub fn flush(&mut self, relay: &Relay) {
        while let Ok(message) = self.outbox.try_recv() {
            if !self.connected {
                continue;
            }
            let frame = message.to_json().unwrap();
            relay.on_text(self.id, &frame);
        }
    }

    /// Handle every frame the relay delivered, then flush
    pub async fn process(&mut self, relay: &Relay) {
        self.flush(relay);
        while let Ok(frame) = self.inbox.try_recv() {
            match WireMessage::parse(&frame).unwrap() {
                WireMessage::Lifecycle(LifecycleMessage::RequestFullState) => {
                    self.authority.publish_full_state();
                }
                WireMessage::Command(command) => {
                    let _ = self.authority.handle_command(command).await;
                }
                _ => {}
            }
            self.flush(relay);
        }
    }

    /// Reopen the relay connection the way the runtime does
    pub fn reconnect(&mut self, relay: &Relay) {
        let (tx, inbox) = mpsc::channel(256);
        self.id = relay.on_open(tx);
        self.inbox = inbox;
        self.connected = true;
        register(relay, self.id, ClientType::Main);
        let sync = self.authority.sync_message().to_json().unwrap();
        relay.on_text(self.id, &sync);
    }

    /// Drop the relay connection without telling the authority
    pub fn drop_connection(&mut self, relay: &Relay) {
        relay.on_close(&self.id);
        self.connected = false;
        while self.inbox.try_recv().is_ok() {}
    }
}

/// A remote: view plus its relay connection
pub struct Remote {
    pub id: ConnectionId,
    pub view: RemoteView,
    pub received: Vec<WireMessage>,
    inbox: mpsc::Receiver<String>,
}

impl Remote {
    /// Apply every delivered frame; re-register when the primary returns
    pub fn sync(&mut self, relay: &Relay) {
        while let Ok(frame) = self.inbox.try_recv() {
            let message = WireMessage::parse(&frame).unwrap();
            self.view.apply(&message);
            if let WireMessage::Lifecycle(LifecycleMessage::PrimaryStatus { connected: true }) =
                message
            {
                register(relay, self.id, ClientType::Remote);
                self.view.registered();
            }
            self.received.push(message);
        }
    }

    /// Lose the relay connection
    pub fn drop_connection(&mut self, relay: &Relay) {
        relay.on_close(&self.id);
        self.view.disconnected();
        while self.inbox.try_recv().is_ok() {}
    }

    /// Reopen the relay connection and register again
    pub fn reconnect(&mut self, relay: &Relay) {
        let (tx, inbox) = mpsc::channel(256);
        self.id = relay.on_open(tx);
        self.inbox = inbox;
        register(relay, self.id, ClientType::Remote);
        self.view.registered();
    }

    /// Send a command through the relay
    pub fn send(&self, relay: &Relay, command: CommandMessage) {
        let frame = WireMessage::Command(command).to_json().unwrap();
        relay.on_text(self.id, &frame);
    }

    /// Kinds received so far, then forget them
    pub fn take_received(&mut self) -> Vec<WireMessage> {
        std::mem::take(&mut self.received)
    }
}

/// Relay plus the clients attached to it
pub struct Stage {
    pub relay: Relay,
}

impl Stage {
    pub fn new() -> Self {
        Self {
            relay: Relay::default(),
        }
    }

    /// Primary with default timing and a scripted evaluator
    pub fn connect_primary(&self) -> Primary {
        self.connect_primary_with(AuthorityConfig::default())
    }

    pub fn connect_primary_with(&self, config: AuthorityConfig) -> Primary {
        let evaluator = Arc::new(ScriptedEvaluator::default());
        let (outbox_tx, outbox) = mpsc::unbounded_channel();
        let (authority, events) = StateAuthority::new(
            config,
            Collaborators {
                evaluator: evaluator.clone(),
                surface: Arc::new(TracingSurface),
                persistence: Arc::new(MemoryPersistence::new()),
            },
            outbox_tx,
        );

        let (tx, inbox) = mpsc::channel(256);
        let id = self.relay.on_open(tx);
        let mut primary = Primary {
            id,
            authority,
            evaluator,
            events,
            connected: true,
            inbox,
            outbox,
        };
        register(&self.relay, id, ClientType::Main);
        let sync = primary.authority.sync_message().to_json().unwrap();
        self.relay.on_text(id, &sync);
        primary.flush(&self.relay);
        primary
    }

    /// Remote that has sent `client.register`
    pub fn connect_remote(&self) -> Remote {
        let (tx, inbox) = mpsc::channel(256);
        let id = self.relay.on_open(tx);
        let mut view = RemoteView::new();
        register(&self.relay, id, ClientType::Remote);
        view.registered();
        Remote {
            id,
            view,
            received: Vec::new(),
            inbox,
        }
    }

    /// Run message exchange until nothing is left in flight
    pub async fn settle(&self, primary: &mut Primary, remotes: &mut [&mut Remote]) {
        for _ in 0..4 {
            primary.process(&self.relay).await;
            for remote in remotes.iter_mut() {
                remote.sync(&self.relay);
            }
        }
    }
}

fn register(relay: &Relay, id: ConnectionId, client_type: ClientType) {
    let frame = WireMessage::register(client_type).to_json().unwrap();
    relay.on_text(id, &frame);
}
