//! Staleness Tracker
//!
//! Per-panel state machine deciding whether a playing panel's source has
//! diverged from the source it was last evaluated with.
//!
//! ```text
//!              play / update
//!   ┌────────┐ ───────────────▶ ┌────────┐  edit (code differs)  ┌───────┐
//!   │ Paused │                  │ Synced │ ───────────────────▶ │ Stale │
//!   └────────┘ ◀─────────────── └────────┘ ◀─────────────────── └───────┘
//!        ▲          pause          ▲     edit back / play / update   │
//!        └─────────────────────────┼─────────────────────────────────┘
//!                                  pause
//! ```
//!
//! `playing` and `stale` are derived from the single [`PlaybackState`],
//! so `stale ⇒ playing` cannot be violated by any sequence of calls.

use std::fmt;

/// Runtime state of a panel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    /// Not producing sound
    #[default]
    Paused,
    /// Playing the code currently in the editor
    Synced,
    /// Playing, but the editor holds code that differs from what plays
    Stale,
}

impl PlaybackState {
    /// Whether the panel is producing sound
    #[must_use]
    pub fn is_playing(self) -> bool {
        matches!(self, Self::Synced | Self::Stale)
    }

    /// Whether the playing code differs from the edited code
    #[must_use]
    pub fn is_stale(self) -> bool {
        matches!(self, Self::Stale)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paused => write!(f, "paused"),
            Self::Synced => write!(f, "synced"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

/// Before/after pair returned by every tracker operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// State before the operation
    pub from: PlaybackState,
    /// State after the operation
    pub to: PlaybackState,
}

impl Transition {
    /// Whether the operation changed the state
    #[must_use]
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Staleness state machine for one panel
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StalenessTracker {
    state: PlaybackState,
    last_evaluated_code: String,
}

impl StalenessTracker {
    /// Create a tracker in the `Paused` state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Whether the panel is producing sound
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    /// Whether the playing code differs from the edited code
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.state.is_stale()
    }

    /// Source text of the last successful evaluation
    ///
    /// Retained across pauses; empty until the first evaluation.
    #[must_use]
    pub fn last_evaluated_code(&self) -> &str {
        &self.last_evaluated_code
    }

    /// Record a successful evaluation of `code` (play or update)
    ///
    /// Any state moves to `Synced`.
    pub fn evaluated(&mut self, code: &str) -> Transition {
        code.clone_into(&mut self.last_evaluated_code);
        self.transition(PlaybackState::Synced)
    }

    /// Record an edit of the panel's source
    ///
    /// A playing panel becomes `Stale` when `code` differs from the last
    /// evaluated source and `Synced` again when the edit restores it.
    /// A paused panel is unaffected.
    pub fn edited(&mut self, code: &str) -> Transition {
        let next = match self.state {
            PlaybackState::Paused => PlaybackState::Paused,
            PlaybackState::Synced | PlaybackState::Stale => {
                if code == self.last_evaluated_code {
                    PlaybackState::Synced
                } else {
                    PlaybackState::Stale
                }
            }
        };
        self.transition(next)
    }

    /// Record that the panel was silenced
    pub fn paused(&mut self) -> Transition {
        self.transition(PlaybackState::Paused)
    }

    fn transition(&mut self, to: PlaybackState) -> Transition {
        let from = self.state;
        self.state = to;
        Transition { from, to }
    }
}
