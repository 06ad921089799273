//! Wire Protocol
//!
//! JSON text frames exchanged between the relay, the primary client and
//! remote clients. Every frame is an envelope `{type, ...payload}`.
//!
//! # Design Philosophy
//!
//! Message types form three closed categories:
//!
//! - [`LifecycleMessage`]: registration and handshake plumbing
//! - [`CommandMessage`]: remote intent, routed to the primary
//! - [`BroadcastMessage`]: authoritative state, routed to every remote
//!
//! The relay only needs the `type` tag to route a frame, so
//! [`peek_kind`] classifies a frame into a [`MessageKind`] without
//! decoding its payload. Clients decode the full frame with
//! [`WireMessage::parse`]. Tags outside the protocol are rejected as
//! malformed rather than passed through.
//!
//! # Routing
//!
//! ```text
//!   remote ──Command──▶ relay ──▶ primary
//!   primary ─Broadcast▶ relay ──▶ every remote
//!   remote ──client.register──▶ relay ──server.requestFullState──▶ primary
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum frame size accepted when no explicit limit is configured (1 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

// ============================================================================
// Identifiers and shared payload types
// ============================================================================

/// Unique identifier for a panel
///
/// Generated by the primary from the wall clock plus a process-local
/// counter, so IDs stay unique across restarts and within a millisecond.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PanelId(pub String);

impl PanelId {
    /// Create a new time-based panel ID
    #[must_use]
    pub fn generate() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let millis = chrono::Utc::now().timestamp_millis();
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("panel_{millis}_{seq}"))
    }

    /// Borrow the raw string form
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PanelId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PanelId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Role a client declares in `client.register`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// The primary (authoritative) client
    Main,
    /// A thin remote surface
    Remote,
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Panel position in the primary's workspace
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal offset
    pub x: f64,
    /// Vertical offset
    pub y: f64,
}

impl Position {
    /// Create a position
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Panel size in the primary's workspace
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Size {
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            width: 600.0,
            height: 400.0,
        }
    }
}

/// A numeric control extracted from source code
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliderWidget {
    /// Stable slider ID (`master_<name>` or `<panelId>_<name>`)
    pub slider_id: String,
    /// Human-readable label
    pub label: String,
    /// Current value
    pub value: f64,
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
    /// Step increment
    pub step: f64,
}

/// Per-panel entry of `full_state` and `client.syncPanels`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PanelSummary {
    /// Panel ID
    pub id: PanelId,
    /// Display title
    pub title: String,
    /// Whether the panel is playing
    pub playing: bool,
    /// Whether the playing source diverged from the edited source
    pub stale: bool,
    /// Workspace position
    #[serde(default)]
    pub position: Position,
}

/// Per-panel entry of `state.update`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelFlags {
    /// Panel ID
    pub panel: PanelId,
    /// Whether the panel is playing
    pub playing: bool,
    /// Whether the playing source diverged from the edited source
    pub stale: bool,
}

// ============================================================================
// Message categories
// ============================================================================

/// Registration and handshake messages
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LifecycleMessage {
    /// First message on every connection; fixes the connection's role
    #[serde(rename = "client.register")]
    Register {
        /// Declared role
        #[serde(rename = "clientType")]
        client_type: ClientType,
    },

    /// Primary pushes its panel list after (re)connecting
    #[serde(rename = "client.syncPanels")]
    SyncPanels {
        /// Every panel, in insertion order
        panels: Vec<PanelSummary>,
    },

    /// Relay asks the primary for a baseline on behalf of a new remote
    #[serde(rename = "server.requestFullState")]
    RequestFullState,

    /// Relay tells remotes whether a primary is reachable
    #[serde(rename = "server.primaryStatus")]
    PrimaryStatus {
        /// True once a primary has registered
        connected: bool,
    },
}

/// Remote intent, routed to the primary
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CommandMessage {
    /// Start (or re-evaluate) a panel
    #[serde(rename = "panel.play")]
    PanelPlay {
        /// Target panel
        panel: PanelId,
    },

    /// Silence a panel
    #[serde(rename = "panel.pause")]
    PanelPause {
        /// Target panel
        panel: PanelId,
    },

    /// Play if paused, pause if playing
    #[serde(rename = "panel.toggle")]
    PanelToggle {
        /// Target panel
        panel: PanelId,
    },

    /// Re-evaluate a panel's current source
    #[serde(rename = "panel.update")]
    PanelUpdate {
        /// Target panel
        panel: PanelId,
    },

    /// Silence every playing panel
    #[serde(rename = "global.stopAll")]
    StopAll,

    /// Re-evaluate every stale panel
    #[serde(rename = "global.updateAll")]
    UpdateAll,

    /// Move a master slider
    #[serde(rename = "master.sliderChange")]
    MasterSliderChange {
        /// Slider ID
        #[serde(rename = "sliderId")]
        slider_id: String,
        /// New value
        value: f64,
    },

    /// Move a panel slider
    #[serde(rename = "panel.sliderChange")]
    PanelSliderChange {
        /// Owning panel
        #[serde(rename = "panelId")]
        panel_id: PanelId,
        /// Slider ID
        #[serde(rename = "sliderId")]
        slider_id: String,
        /// New value
        value: f64,
    },
}

/// Authoritative state, routed to every remote
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BroadcastMessage {
    /// Runtime flags of every panel
    #[serde(rename = "state.update")]
    StateUpdate {
        /// Whole-object flags per panel
        panels: Vec<PanelFlags>,
    },

    /// Baseline snapshot answering `server.requestFullState`
    #[serde(rename = "full_state")]
    FullState {
        /// Every panel, in insertion order
        panels: Vec<PanelSummary>,
        /// Snapshot instant in Unix milliseconds
        timestamp: i64,
    },

    /// A panel was created on the primary
    #[serde(rename = "panel_created")]
    PanelCreated {
        /// Panel ID
        id: PanelId,
        /// Display number
        number: u32,
        /// Display title
        title: String,
        /// Workspace position
        position: Position,
        /// Workspace size
        size: Size,
    },

    /// A panel was deleted on the primary
    #[serde(rename = "panel_deleted")]
    PanelDeleted {
        /// Panel ID
        id: PanelId,
    },

    /// A panel's title settled after editing
    #[serde(rename = "panel_renamed")]
    PanelRenamed {
        /// Panel ID
        id: PanelId,
        /// New title
        title: String,
    },

    /// Master sliders after an evaluation
    #[serde(rename = "master.sliders")]
    MasterSliders {
        /// Replacement slider set
        sliders: Vec<SliderWidget>,
    },

    /// A master slider moved
    #[serde(rename = "master.sliderValue")]
    MasterSliderValue {
        /// Slider ID
        #[serde(rename = "sliderId")]
        slider_id: String,
        /// New value
        value: f64,
    },

    /// Panel sliders after an evaluation
    #[serde(rename = "panel.sliders")]
    PanelSliders {
        /// Owning panel
        #[serde(rename = "panelId")]
        panel_id: PanelId,
        /// Replacement slider set
        sliders: Vec<SliderWidget>,
    },

    /// A panel slider moved
    #[serde(rename = "panel.sliderValue")]
    PanelSliderValue {
        /// Owning panel
        #[serde(rename = "panelId")]
        panel_id: PanelId,
        /// Slider ID
        #[serde(rename = "sliderId")]
        slider_id: String,
        /// New value
        value: f64,
    },
}

/// Any protocol message
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireMessage {
    /// Registration and handshake
    Lifecycle(LifecycleMessage),
    /// Remote intent
    Command(CommandMessage),
    /// Authoritative state
    Broadcast(BroadcastMessage),
}

impl WireMessage {
    /// Decode a frame, rejecting unknown tags and oversized frames
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the frame is too large, has no
    /// string `type`, carries an unknown tag, or its payload does not
    /// match the tag's schema.
    pub fn parse_limited(text: &str, max_size: usize) -> Result<Self, ProtocolError> {
        let kind = peek_kind(text, max_size)?;
        let message = match kind.category() {
            MessageCategory::Lifecycle => Self::Lifecycle(serde_json::from_str(text)?),
            MessageCategory::Command => Self::Command(serde_json::from_str(text)?),
            MessageCategory::Broadcast => Self::Broadcast(serde_json::from_str(text)?),
        };
        Ok(message)
    }

    /// Decode a frame with the default size limit
    ///
    /// # Errors
    ///
    /// See [`WireMessage::parse_limited`].
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Self::parse_limited(text, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Encode as a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if a payload cannot be serialized.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// The message's type tag
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Lifecycle(msg) => match msg {
                LifecycleMessage::Register { .. } => MessageKind::Register,
                LifecycleMessage::SyncPanels { .. } => MessageKind::SyncPanels,
                LifecycleMessage::RequestFullState => MessageKind::RequestFullState,
                LifecycleMessage::PrimaryStatus { .. } => MessageKind::PrimaryStatus,
            },
            Self::Command(msg) => match msg {
                CommandMessage::PanelPlay { .. } => MessageKind::PanelPlay,
                CommandMessage::PanelPause { .. } => MessageKind::PanelPause,
                CommandMessage::PanelToggle { .. } => MessageKind::PanelToggle,
                CommandMessage::PanelUpdate { .. } => MessageKind::PanelUpdate,
                CommandMessage::StopAll => MessageKind::StopAll,
                CommandMessage::UpdateAll => MessageKind::UpdateAll,
                CommandMessage::MasterSliderChange { .. } => MessageKind::MasterSliderChange,
                CommandMessage::PanelSliderChange { .. } => MessageKind::PanelSliderChange,
            },
            Self::Broadcast(msg) => match msg {
                BroadcastMessage::StateUpdate { .. } => MessageKind::StateUpdate,
                BroadcastMessage::FullState { .. } => MessageKind::FullState,
                BroadcastMessage::PanelCreated { .. } => MessageKind::PanelCreated,
                BroadcastMessage::PanelDeleted { .. } => MessageKind::PanelDeleted,
                BroadcastMessage::PanelRenamed { .. } => MessageKind::PanelRenamed,
                BroadcastMessage::MasterSliders { .. } => MessageKind::MasterSliders,
                BroadcastMessage::MasterSliderValue { .. } => MessageKind::MasterSliderValue,
                BroadcastMessage::PanelSliders { .. } => MessageKind::PanelSliders,
                BroadcastMessage::PanelSliderValue { .. } => MessageKind::PanelSliderValue,
            },
        }
    }

    /// Convenience constructor for `client.register`
    #[must_use]
    pub fn register(client_type: ClientType) -> Self {
        Self::Lifecycle(LifecycleMessage::Register { client_type })
    }
}

impl FromStr for WireMessage {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<LifecycleMessage> for WireMessage {
    fn from(value: LifecycleMessage) -> Self {
        Self::Lifecycle(value)
    }
}

impl From<CommandMessage> for WireMessage {
    fn from(value: CommandMessage) -> Self {
        Self::Command(value)
    }
}

impl From<BroadcastMessage> for WireMessage {
    fn from(value: BroadcastMessage) -> Self {
        Self::Broadcast(value)
    }
}

// ============================================================================
// Tag classification
// ============================================================================

/// Category a message type belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageCategory {
    /// Registration and handshake
    Lifecycle,
    /// Remote intent
    Command,
    /// Authoritative state
    Broadcast,
}

/// Where the relay sends a frame of a given kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    /// Handled by the relay itself (`client.register`)
    Register,
    /// Every remote connection
    Remotes,
    /// Every primary connection
    Primaries,
    /// Only the relay may emit this kind; inbound copies are dropped
    RelayOnly,
}

/// Closed set of protocol type tags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `client.register`
    Register,
    /// `client.syncPanels`
    SyncPanels,
    /// `server.requestFullState`
    RequestFullState,
    /// `server.primaryStatus`
    PrimaryStatus,
    /// `panel.play`
    PanelPlay,
    /// `panel.pause`
    PanelPause,
    /// `panel.toggle`
    PanelToggle,
    /// `panel.update`
    PanelUpdate,
    /// `global.stopAll`
    StopAll,
    /// `global.updateAll`
    UpdateAll,
    /// `master.sliderChange`
    MasterSliderChange,
    /// `panel.sliderChange`
    PanelSliderChange,
    /// `state.update`
    StateUpdate,
    /// `full_state`
    FullState,
    /// `panel_created`
    PanelCreated,
    /// `panel_deleted`
    PanelDeleted,
    /// `panel_renamed`
    PanelRenamed,
    /// `master.sliders`
    MasterSliders,
    /// `master.sliderValue`
    MasterSliderValue,
    /// `panel.sliders`
    PanelSliders,
    /// `panel.sliderValue`
    PanelSliderValue,
}

impl MessageKind {
    /// Every kind, in protocol-table order
    pub const ALL: [Self; 21] = [
        Self::Register,
        Self::SyncPanels,
        Self::RequestFullState,
        Self::PrimaryStatus,
        Self::PanelPlay,
        Self::PanelPause,
        Self::PanelToggle,
        Self::PanelUpdate,
        Self::StopAll,
        Self::UpdateAll,
        Self::MasterSliderChange,
        Self::PanelSliderChange,
        Self::StateUpdate,
        Self::FullState,
        Self::PanelCreated,
        Self::PanelDeleted,
        Self::PanelRenamed,
        Self::MasterSliders,
        Self::MasterSliderValue,
        Self::PanelSliders,
        Self::PanelSliderValue,
    ];

    /// The wire tag
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Register => "client.register",
            Self::SyncPanels => "client.syncPanels",
            Self::RequestFullState => "server.requestFullState",
            Self::PrimaryStatus => "server.primaryStatus",
            Self::PanelPlay => "panel.play",
            Self::PanelPause => "panel.pause",
            Self::PanelToggle => "panel.toggle",
            Self::PanelUpdate => "panel.update",
            Self::StopAll => "global.stopAll",
            Self::UpdateAll => "global.updateAll",
            Self::MasterSliderChange => "master.sliderChange",
            Self::PanelSliderChange => "panel.sliderChange",
            Self::StateUpdate => "state.update",
            Self::FullState => "full_state",
            Self::PanelCreated => "panel_created",
            Self::PanelDeleted => "panel_deleted",
            Self::PanelRenamed => "panel_renamed",
            Self::MasterSliders => "master.sliders",
            Self::MasterSliderValue => "master.sliderValue",
            Self::PanelSliders => "panel.sliders",
            Self::PanelSliderValue => "panel.sliderValue",
        }
    }

    /// Look up a kind by wire tag
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// The category this kind belongs to
    #[must_use]
    pub fn category(self) -> MessageCategory {
        match self {
            Self::Register | Self::SyncPanels | Self::RequestFullState | Self::PrimaryStatus => {
                MessageCategory::Lifecycle
            }
            Self::PanelPlay
            | Self::PanelPause
            | Self::PanelToggle
            | Self::PanelUpdate
            | Self::StopAll
            | Self::UpdateAll
            | Self::MasterSliderChange
            | Self::PanelSliderChange => MessageCategory::Command,
            Self::StateUpdate
            | Self::FullState
            | Self::PanelCreated
            | Self::PanelDeleted
            | Self::PanelRenamed
            | Self::MasterSliders
            | Self::MasterSliderValue
            | Self::PanelSliders
            | Self::PanelSliderValue => MessageCategory::Broadcast,
        }
    }

    /// Where the relay sends frames of this kind
    ///
    /// `client.syncPanels` is a baseline push and goes to remotes.
    /// `server.requestFullState` from a client is treated as an explicit
    /// resync request and goes to primaries.
    #[must_use]
    pub fn route(self) -> Route {
        match self {
            Self::Register => Route::Register,
            Self::PrimaryStatus => Route::RelayOnly,
            Self::SyncPanels => Route::Remotes,
            Self::RequestFullState => Route::Primaries,
            other => match other.category() {
                MessageCategory::Command => Route::Primaries,
                MessageCategory::Broadcast | MessageCategory::Lifecycle => Route::Remotes,
            },
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Classify a frame by its `type` tag without decoding the payload
///
/// # Errors
///
/// Returns [`ProtocolError`] when the frame exceeds `max_size`, is not a
/// JSON object, lacks a string `type`, or carries an unknown tag.
pub fn peek_kind(text: &str, max_size: usize) -> Result<MessageKind, ProtocolError> {
    if text.len() > max_size {
        return Err(ProtocolError::TooLarge {
            size: text.len(),
            max: max_size,
        });
    }

    let mut object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
    match object.remove("type") {
        Some(serde_json::Value::String(tag)) => {
            MessageKind::from_tag(&tag).ok_or(ProtocolError::UnknownType(tag))
        }
        Some(_) | None => Err(ProtocolError::MissingType),
    }
}

/// Errors produced while decoding or encoding frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON or does not match its tag's schema
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame has no string `type` field
    #[error("frame has no string `type` field")]
    MissingType,

    /// Frame's `type` is not part of the protocol
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Frame exceeds the configured size limit
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    TooLarge {
        /// Frame size in bytes
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Message could not be serialized
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}
