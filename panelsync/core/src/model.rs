//! Authoritative Data Model
//!
//! Records owned by the [`StateAuthority`](crate::authority::StateAuthority):
//! panels, the singleton master unit, and the immutable snapshot handed to
//! the resync handshake.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::{PanelFlags, PanelId, PanelSummary, Position, Size, SliderWidget};
use crate::staleness::{PlaybackState, StalenessTracker};

/// Which unit a slider belongs to
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SliderScope {
    /// The master unit
    Master,
    /// An ordinary panel
    Panel(PanelId),
}

impl SliderScope {
    /// Prefix used for slider IDs declared in this scope
    #[must_use]
    pub fn id_prefix(&self) -> &str {
        match self {
            Self::Master => "master",
            Self::Panel(id) => id.as_str(),
        }
    }
}

impl fmt::Display for SliderScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Panel(id) => write!(f, "panel:{id}"),
        }
    }
}

/// Options for creating a panel
#[derive(Clone, Debug, Default)]
pub struct PanelConfig {
    /// Title; defaults to `Panel <number>`
    pub title: Option<String>,
    /// Initial source code
    pub source_code: String,
    /// Initial position; defaults to a cascade from the panel number
    pub position: Option<Position>,
    /// Initial size
    pub size: Option<Size>,
}

impl PanelConfig {
    /// Config with a title and empty source
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Set the initial source code
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_code = source.into();
        self
    }
}

/// An independently playable unit of source code
#[derive(Clone, Debug)]
pub struct Panel {
    /// Unique ID
    pub id: PanelId,
    /// Display number (max existing + 1 at creation)
    pub number: u32,
    /// Display title
    pub title: String,
    /// Source code as currently edited
    pub source_code: String,
    /// Workspace position
    pub position: Position,
    /// Workspace size
    pub size: Size,
    /// Stacking order; higher is on top
    pub z_index: u32,
    /// Sliders extracted by the last evaluation
    pub sliders: Vec<SliderWidget>,
    pub(crate) tracker: StalenessTracker,
}

impl Panel {
    pub(crate) fn new(id: PanelId, number: u32, z_index: u32, config: PanelConfig) -> Self {
        let offset = f64::from(number.saturating_sub(1) % 10) * 30.0;
        Self {
            id,
            number,
            title: config.title.unwrap_or_else(|| format!("Panel {number}")),
            source_code: config.source_code,
            position: config
                .position
                .unwrap_or_else(|| Position::new(40.0 + offset, 40.0 + offset)),
            size: config.size.unwrap_or_default(),
            z_index,
            sliders: Vec::new(),
            tracker: StalenessTracker::new(),
        }
    }

    /// Current playback state
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.tracker.state()
    }

    /// Whether the panel is producing sound
    #[must_use]
    pub fn playing(&self) -> bool {
        self.tracker.is_playing()
    }

    /// Whether the playing code differs from the edited code
    #[must_use]
    pub fn stale(&self) -> bool {
        self.tracker.is_stale()
    }

    /// Source of the last successful evaluation
    #[must_use]
    pub fn last_evaluated_code(&self) -> &str {
        self.tracker.last_evaluated_code()
    }

    /// Runtime flags as carried by `state.update`
    #[must_use]
    pub fn flags(&self) -> PanelFlags {
        PanelFlags {
            panel: self.id.clone(),
            playing: self.playing(),
            stale: self.stale(),
        }
    }

    /// Summary as carried by `full_state`
    #[must_use]
    pub fn summary(&self) -> PanelSummary {
        PanelSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            playing: self.playing(),
            stale: self.stale(),
            position: self.position,
        }
    }
}

/// The singleton global-control unit
#[derive(Clone, Debug, Default)]
pub struct MasterUnit {
    /// Collapsed presentation flag
    pub compact: bool,
    /// Source code as currently edited
    pub source_code: String,
    /// Sliders extracted by the last evaluation
    pub sliders: Vec<SliderWidget>,
    pub(crate) last_evaluated_code: Option<String>,
}

impl MasterUnit {
    /// Whether the master has been evaluated at least once
    #[must_use]
    pub fn has_been_evaluated(&self) -> bool {
        self.last_evaluated_code.is_some()
    }

    /// Whether the master must be evaluated before panels
    ///
    /// True when it has non-blank source that differs from the last
    /// evaluated source.
    #[must_use]
    pub fn needs_evaluation(&self) -> bool {
        !self.source_code.trim().is_empty()
            && self.last_evaluated_code.as_deref() != Some(self.source_code.as_str())
    }
}

/// Master portion of a [`StateSnapshot`]
#[derive(Clone, Debug, PartialEq)]
pub struct MasterSummary {
    /// Collapsed presentation flag
    pub compact: bool,
    /// Current slider set
    pub sliders: Vec<SliderWidget>,
}

/// Immutable point-in-time copy of all panels and the master
#[derive(Clone, Debug, PartialEq)]
pub struct StateSnapshot {
    /// Every panel, in insertion order
    pub panels: Vec<PanelSummary>,
    /// Master state
    pub master: MasterSummary,
    /// Snapshot instant in Unix milliseconds
    pub timestamp: i64,
}
