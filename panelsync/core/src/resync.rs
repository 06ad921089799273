//! Resync Coordinator
//!
//! The full-state handshake that gives a newly connected remote a complete
//! baseline instead of only future deltas.
//!
//! ```text
//!   remote                relay                  primary
//!     │ client.register     │                       │
//!     │────────────────────▶│ server.requestFullState
//!     │                     │──────────────────────▶│
//!     │                     │       full_state      │
//!     │      full_state     │◀──────────────────────│
//!     │◀────────────────────│     master.sliders    │
//!     │    master.sliders   │◀──────────────────────│
//!     │◀────────────────────│                       │
//! ```
//!
//! A remote renders no panel controls until it holds one baseline
//! ([`HandshakeState::Complete`]). Deltas that arrive earlier cannot be
//! trusted to describe the full panel set.

use crate::model::StateSnapshot;
use crate::protocol::{BroadcastMessage, LifecycleMessage, WireMessage};

/// Builds the messages on either side of the handshake
#[derive(Clone, Copy, Debug, Default)]
pub struct ResyncCoordinator;

impl ResyncCoordinator {
    /// What the relay sends a primary when a remote registers
    #[must_use]
    pub fn request() -> WireMessage {
        LifecycleMessage::RequestFullState.into()
    }

    /// The primary's answer: `full_state`, then `master.sliders` when the
    /// master has sliders
    #[must_use]
    pub fn baseline(snapshot: &StateSnapshot) -> Vec<WireMessage> {
        let mut messages = vec![BroadcastMessage::FullState {
            panels: snapshot.panels.clone(),
            timestamp: snapshot.timestamp,
        }
        .into()];
        if !snapshot.master.sliders.is_empty() {
            messages.push(
                BroadcastMessage::MasterSliders {
                    sliders: snapshot.master.sliders.clone(),
                }
                .into(),
            );
        }
        messages
    }
}

/// Remote-side progress through the handshake
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HandshakeState {
    /// Not registered on the current connection
    #[default]
    Idle,
    /// Registered; waiting for `full_state` or `client.syncPanels`
    AwaitingBaseline,
    /// Holds a baseline; deltas apply
    Complete,
}

impl HandshakeState {
    /// Whether deltas may be applied and controls rendered
    #[must_use]
    pub fn has_baseline(self) -> bool {
        matches!(self, Self::Complete)
    }
}
