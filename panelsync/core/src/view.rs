//! Remote View
//!
//! A remote's non-authoritative copy of the primary's state, built from
//! broadcasts. Baselines (`full_state`, `client.syncPanels`) replace the
//! panel list; deltas patch it. Every delta is whole-object per panel, so
//! applying the same message twice yields the same view.

use std::collections::HashMap;

use crate::model::SliderScope;
use crate::protocol::{
    BroadcastMessage, LifecycleMessage, PanelId, PanelSummary, Position, SliderWidget, WireMessage,
};
use crate::resync::HandshakeState;

/// What a remote should show
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewStatus {
    /// No relay connection, or no primary behind it
    Disconnected,
    /// Connected and registered; waiting for a baseline
    Loading,
    /// Baseline received; controls are live
    Live,
}

/// One panel as seen by a remote
#[derive(Clone, Debug, PartialEq)]
pub struct RemotePanel {
    /// Panel ID
    pub id: PanelId,
    /// Display title
    pub title: String,
    /// Whether the panel is playing
    pub playing: bool,
    /// Whether the playing source diverged from the edited source
    pub stale: bool,
    /// Workspace position
    pub position: Position,
    /// Display number, when announced by `panel_created`
    pub number: Option<u32>,
    /// Sliders from the last `panel.sliders`
    pub sliders: Vec<SliderWidget>,
}

impl RemotePanel {
    fn from_summary(summary: PanelSummary) -> Self {
        Self {
            id: summary.id,
            title: summary.title,
            playing: summary.playing,
            stale: summary.stale,
            position: summary.position,
            number: None,
            sliders: Vec::new(),
        }
    }
}

/// A remote's view of the shared state
#[derive(Clone, Debug)]
pub struct RemoteView {
    panels: Vec<RemotePanel>,
    master_sliders: Vec<SliderWidget>,
    slider_values: HashMap<(SliderScope, String), f64>,
    handshake: HandshakeState,
    connected: bool,
    primary_online: bool,
    last_baseline_at: Option<i64>,
}

impl Default for RemoteView {
    fn default() -> Self {
        Self {
            panels: Vec::new(),
            master_sliders: Vec::new(),
            slider_values: HashMap::new(),
            handshake: HandshakeState::Idle,
            connected: false,
            primary_online: true,
            last_baseline_at: None,
        }
    }
}

impl RemoteView {
    /// Empty, disconnected view
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// What the remote should show
    #[must_use]
    pub fn status(&self) -> ViewStatus {
        if !self.connected || !self.primary_online {
            ViewStatus::Disconnected
        } else if self.handshake.has_baseline() {
            ViewStatus::Live
        } else {
            ViewStatus::Loading
        }
    }

    /// Whether panel controls may be rendered
    #[must_use]
    pub fn controls_enabled(&self) -> bool {
        self.status() == ViewStatus::Live
    }

    /// Handshake progress
    #[must_use]
    pub fn handshake(&self) -> HandshakeState {
        self.handshake
    }

    /// Panels in the primary's insertion order
    #[must_use]
    pub fn panels(&self) -> &[RemotePanel] {
        &self.panels
    }

    /// Look up a panel
    #[must_use]
    pub fn panel(&self, id: &PanelId) -> Option<&RemotePanel> {
        self.panels.iter().find(|p| &p.id == id)
    }

    /// Master sliders
    #[must_use]
    pub fn master_sliders(&self) -> &[SliderWidget] {
        &self.master_sliders
    }

    /// Last known value of a slider
    #[must_use]
    pub fn slider_value(&self, scope: &SliderScope, slider_id: &str) -> Option<f64> {
        self.slider_values
            .get(&(scope.clone(), slider_id.to_string()))
            .copied()
    }

    /// Timestamp of the last `full_state`
    #[must_use]
    pub fn last_baseline_at(&self) -> Option<i64> {
        self.last_baseline_at
    }

    /// The connection is up and `client.register` was sent
    ///
    /// The relay answers with `server.primaryStatus{connected:false}` when
    /// no primary is registered, so the primary is presumed online until
    /// told otherwise.
    pub fn registered(&mut self) {
        self.connected = true;
        self.primary_online = true;
        self.handshake = HandshakeState::AwaitingBaseline;
    }

    /// The connection dropped; a new handshake is required
    pub fn disconnected(&mut self) {
        self.connected = false;
        self.handshake = HandshakeState::Idle;
    }

    /// Apply an inbound message
    ///
    /// Returns true when the view changed. Messages not addressed to
    /// remotes are ignored.
    pub fn apply(&mut self, message: &WireMessage) -> bool {
        match message {
            WireMessage::Lifecycle(LifecycleMessage::SyncPanels { panels }) => {
                self.replace_panels(panels);
                true
            }
            WireMessage::Lifecycle(LifecycleMessage::PrimaryStatus { connected }) => {
                let changed = self.primary_online != *connected;
                self.primary_online = *connected;
                if !connected {
                    self.handshake = HandshakeState::Idle;
                }
                changed
            }
            WireMessage::Lifecycle(_) | WireMessage::Command(_) => false,
            WireMessage::Broadcast(broadcast) => self.apply_broadcast(broadcast),
        }
    }

    fn apply_broadcast(&mut self, message: &BroadcastMessage) -> bool {
        match message {
            BroadcastMessage::FullState { panels, timestamp } => {
                self.replace_panels(panels);
                self.last_baseline_at = Some(*timestamp);
                true
            }
            BroadcastMessage::StateUpdate { panels } => {
                if !self.handshake.has_baseline() {
                    tracing::debug!("Ignoring state.update before baseline");
                    return false;
                }
                let mut changed = false;
                for flags in panels {
                    if let Some(panel) = self.panels.iter_mut().find(|p| p.id == flags.panel) {
                        changed |= panel.playing != flags.playing || panel.stale != flags.stale;
                        panel.playing = flags.playing;
                        panel.stale = flags.stale;
                    }
                }
                changed
            }
            BroadcastMessage::PanelCreated {
                id,
                number,
                title,
                position,
                ..
            } => {
                if let Some(panel) = self.panels.iter_mut().find(|p| &p.id == id) {
                    panel.title.clone_from(title);
                    panel.number = Some(*number);
                    panel.position = *position;
                } else {
                    self.panels.push(RemotePanel {
                        id: id.clone(),
                        title: title.clone(),
                        playing: false,
                        stale: false,
                        position: *position,
                        number: Some(*number),
                        sliders: Vec::new(),
                    });
                }
                true
            }
            BroadcastMessage::PanelDeleted { id } => {
                let before = self.panels.len();
                self.panels.retain(|p| &p.id != id);
                let scope = SliderScope::Panel(id.clone());
                self.slider_values.retain(|(s, _), _| s != &scope);
                before != self.panels.len()
            }
            BroadcastMessage::PanelRenamed { id, title } => {
                match self.panels.iter_mut().find(|p| &p.id == id) {
                    Some(panel) if &panel.title != title => {
                        panel.title.clone_from(title);
                        true
                    }
                    _ => false,
                }
            }
            BroadcastMessage::MasterSliders { sliders } => {
                self.master_sliders.clone_from(sliders);
                self.seed_values(&SliderScope::Master, sliders);
                true
            }
            BroadcastMessage::MasterSliderValue { slider_id, value } => {
                if let Some(w) = self
                    .master_sliders
                    .iter_mut()
                    .find(|w| &w.slider_id == slider_id)
                {
                    w.value = *value;
                }
                self.store_value(SliderScope::Master, slider_id, *value)
            }
            BroadcastMessage::PanelSliders { panel_id, sliders } => {
                match self.panels.iter_mut().find(|p| &p.id == panel_id) {
                    Some(panel) => panel.sliders.clone_from(sliders),
                    None => return false,
                }
                self.seed_values(&SliderScope::Panel(panel_id.clone()), sliders);
                true
            }
            BroadcastMessage::PanelSliderValue {
                panel_id,
                slider_id,
                value,
            } => {
                if let Some(w) = self
                    .panels
                    .iter_mut()
                    .find(|p| &p.id == panel_id)
                    .and_then(|p| p.sliders.iter_mut().find(|w| &w.slider_id == slider_id))
                {
                    w.value = *value;
                }
                self.store_value(SliderScope::Panel(panel_id.clone()), slider_id, *value)
            }
        }
    }

    fn replace_panels(&mut self, summaries: &[PanelSummary]) {
        let mut previous: HashMap<PanelId, RemotePanel> =
            self.panels.drain(..).map(|p| (p.id.clone(), p)).collect();

        self.panels = summaries
            .iter()
            .map(|summary| {
                let mut panel = RemotePanel::from_summary(summary.clone());
                if let Some(old) = previous.remove(&summary.id) {
                    panel.number = old.number;
                    panel.sliders = old.sliders;
                }
                panel
            })
            .collect();

        for gone in previous.keys() {
            let scope = SliderScope::Panel(gone.clone());
            self.slider_values.retain(|(s, _), _| s != &scope);
        }

        // Only a live primary produces a baseline
        self.primary_online = true;
        self.handshake = HandshakeState::Complete;
        tracing::debug!(panels = self.panels.len(), "Baseline applied");
    }

    fn seed_values(&mut self, scope: &SliderScope, sliders: &[SliderWidget]) {
        self.slider_values.retain(|(s, _), _| s != scope);
        for widget in sliders {
            self.slider_values
                .insert((scope.clone(), widget.slider_id.clone()), widget.value);
        }
    }

    fn store_value(&mut self, scope: SliderScope, slider_id: &str, value: f64) -> bool {
        let previous = self
            .slider_values
            .insert((scope, slider_id.to_string()), value);
        previous != Some(value)
    }
}
