//! Panelsync Core - Control-Plane Sync for Live-Coded Performance Panels
//!
//! This crate keeps any number of thin remote surfaces in step with one
//! authoritative primary client. It carries control data only (panel
//! lifecycle, play/pause/stale flags, slider values); audio never leaves
//! the primary.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐                     ┌──────────────────────┐
//! │        PRIMARY           │                     │       REMOTES        │
//! │  ┌────────────────────┐  │                     │  ┌────────────────┐  │
//! │  │  StateAuthority    │  │     ┌─────────┐     │  │  RemoteView    │  │
//! │  │  ├ StalenessTracker│──┼────▶│  RELAY  │────▶│  │  (baseline +   │  │
//! │  │  ├ SliderExtractor │  │     │ routes  │     │  │   deltas)      │  │
//! │  │  └ Persistence     │◀─┼─────│ by type │◀────┼──│                │  │
//! │  └─────────┬──────────┘  │     └─────────┘     │  └────────────────┘  │
//! │            │             │   commands  ▲       │                      │
//! │   Evaluator / Surface    │             │       │                      │
//! └──────────────────────────┘   ConnectionRegistry└──────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`StateAuthority`]: the primary's store of panels, master and sliders
//! - [`Relay`]: stateless router between connections
//! - [`ConnectionRegistry`]: open connections and their roles
//! - [`RemoteView`]: a remote's mirror of the primary's state
//! - [`WireMessage`]: every message that crosses the relay
//! - [`StalenessTracker`]: per-panel paused/synced/stale state machine
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use panelsync_core::{
//!     AuthorityConfig, Collaborators, LoggingEvaluator, MemoryPersistence,
//!     PanelConfig, StateAuthority, TracingSurface,
//! };
//! use tokio::sync::mpsc;
//!
//! let (outbox, mut frames) = mpsc::unbounded_channel();
//! let collab = Collaborators {
//!     evaluator: Arc::new(LoggingEvaluator::new()),
//!     surface: Arc::new(TracingSurface),
//!     persistence: Arc::new(MemoryPersistence::new()),
//! };
//! let (mut authority, _events) = StateAuthority::new(AuthorityConfig::default(), collab, outbox);
//!
//! let id = authority.create_panel(PanelConfig::titled("Drums").with_source("s(\"bd sd\")")).await;
//! authority.play_panel(&id).await?;
//!
//! while let Ok(frame) = frames.try_recv() {
//!     // panel_created, state.update ... ready for the relay
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod authority;
pub mod config;
pub mod debounce;
pub mod evaluator;
pub mod model;
pub mod persistence;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod resync;
pub mod runtime;
pub mod sliders;
pub mod staleness;
pub mod surface;
pub mod transport;
pub mod view;

// Re-exports for convenience
pub use authority::{
    AuthorityConfig, AuthorityError, AuthorityEvent, Collaborators, SliderOrigin, StateAuthority,
};
pub use config::{
    default_config_path, load_config, load_config_from_path, ClientConfig, ConfigError,
    ConfigOverrides, ConfigSource, PanelsyncConfig, RelayConfig,
};
pub use evaluator::{EvalError, EvalTarget, Evaluator, LoggingEvaluator};
pub use model::{MasterUnit, Panel, PanelConfig, SliderScope, StateSnapshot};
pub use persistence::{
    JsonFilePersistence, MemoryPersistence, PersistedState, Persistence, PersistenceError,
};
pub use protocol::{
    BroadcastMessage, ClientType, CommandMessage, LifecycleMessage, MessageCategory, MessageKind,
    PanelFlags, PanelId, PanelSummary, Position, ProtocolError, Size, SliderWidget, WireMessage,
};
pub use registry::{
    BroadcastResult, ClassifyOutcome, ConnectionHandle, ConnectionId, ConnectionRegistry,
    ConnectionRole, RegistrySummary,
};
pub use relay::{DropReason, Relay, RouteOutcome};
pub use resync::{HandshakeState, ResyncCoordinator};
pub use runtime::{LocalCommand, PrimaryHandle, PrimaryRuntime, RemoteHandle, RemoteRuntime};
pub use sliders::{SliderDeclaration, SliderExtractor};
pub use staleness::{PlaybackState, StalenessTracker};
pub use surface::{Highlight, LocalSurface, TracingSurface};
pub use transport::{ConnectionStatus, ReconnectPolicy, RelayClient, TransportError};
pub use view::{RemotePanel, RemoteView, ViewStatus};
