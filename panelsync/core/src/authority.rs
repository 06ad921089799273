//! State Authority
//!
//! The single in-memory store of panel and master state, living inside the
//! primary client. Every mutation of ground truth goes through here; the
//! relay and remotes only ever see what this module emits.
//!
//! # Architecture
//!
//! ```text
//!   local editor ──LocalCommand──┐
//!                                ▼
//!   relay ──CommandMessage──▶ StateAuthority ──WireMessage──▶ outbox ──▶ relay
//!                             │    │     │
//!                   Evaluator ┘    │     └ Persistence
//!                           LocalSurface
//! ```
//!
//! Outgoing messages go to an unbounded outbox so emitting never blocks
//! command handling. Debounced work (rename broadcasts, master
//! re-evaluation) runs on [`Debouncer`] timers; master re-evaluation comes
//! back as an [`AuthorityEvent`] that the owning runtime feeds to
//! [`StateAuthority::handle_event`].
//!
//! # Failure Semantics
//!
//! An evaluation failure leaves the panel's state untouched and is shown
//! on the local surface only. Silence failures are logged and the state
//! change proceeds. Persistence failures are logged and never abort a
//! command.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::debounce::Debouncer;
use crate::evaluator::{EvalError, EvalTarget, Evaluator};
use crate::model::{MasterSummary, MasterUnit, Panel, PanelConfig, SliderScope, StateSnapshot};
use crate::persistence::{
    PersistedMaster, PersistedPanel, PersistedState, Persistence, PersistenceError, STATE_VERSION,
};
use crate::protocol::{
    BroadcastMessage, CommandMessage, LifecycleMessage, PanelId, Position, Size, SliderWidget,
    WireMessage,
};
use crate::resync::ResyncCoordinator;
use crate::sliders::SliderExtractor;
use crate::staleness::PlaybackState;
use crate::surface::{Highlight, LocalSurface};

/// Timing knobs for the authority
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorityConfig {
    /// Quiet window before a rename is broadcast
    pub rename_debounce: Duration,
    /// Quiet window before edited master code is re-evaluated
    pub master_debounce: Duration,
    /// Gap between activations in "update all"
    pub update_spacing: Duration,
    /// Length of the flash cue shown on each updated panel
    pub flash_duration: Duration,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            rename_debounce: Duration::from_millis(500),
            master_debounce: Duration::from_millis(300),
            update_spacing: Duration::from_millis(50),
            flash_duration: Duration::from_millis(300),
        }
    }
}

/// External collaborators the authority drives
#[derive(Clone)]
pub struct Collaborators {
    /// Pattern/audio engine
    pub evaluator: Arc<dyn Evaluator>,
    /// Local editor surface
    pub surface: Arc<dyn LocalSurface>,
    /// Storage backend
    pub persistence: Arc<dyn Persistence>,
}

/// Timer events fed back into the authority by its runtime
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorityEvent {
    /// Master code stopped changing; re-evaluate it
    MasterDebounceElapsed,
}

/// Where a slider change came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliderOrigin {
    /// The primary's own editor
    Local,
    /// A remote, via the relay
    Remote,
}

/// Errors from authority operations
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// No panel with this ID exists
    #[error("unknown panel: {0}")]
    UnknownPanel(PanelId),

    /// The evaluator rejected the source; no state changed
    #[error(transparent)]
    Evaluation(#[from] EvalError),
}

/// The primary's authoritative store
pub struct StateAuthority {
    config: AuthorityConfig,
    collab: Collaborators,
    panels: Vec<Panel>,
    master: MasterUnit,
    slider_values: HashMap<(SliderScope, String), f64>,
    extractor: SliderExtractor,
    outbox: mpsc::UnboundedSender<WireMessage>,
    events: mpsc::Sender<AuthorityEvent>,
    rename_timers: Debouncer<PanelId>,
    master_timer: Debouncer<()>,
}

impl StateAuthority {
    /// Create an empty authority
    ///
    /// Returns the authority and the receiver for its timer events; the
    /// owner must pass each event to [`StateAuthority::handle_event`].
    #[must_use]
    pub fn new(
        config: AuthorityConfig,
        collab: Collaborators,
        outbox: mpsc::UnboundedSender<WireMessage>,
    ) -> (Self, mpsc::Receiver<AuthorityEvent>) {
        let (events, events_rx) = mpsc::channel(16);
        let authority = Self {
            config,
            collab,
            panels: Vec::new(),
            master: MasterUnit::default(),
            slider_values: HashMap::new(),
            extractor: SliderExtractor::new(),
            outbox,
            events,
            rename_timers: Debouncer::new(),
            master_timer: Debouncer::new(),
        };
        (authority, events_rx)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Panels in insertion order
    #[must_use]
    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    /// Look up a panel
    #[must_use]
    pub fn panel(&self, id: &PanelId) -> Option<&Panel> {
        self.panels.iter().find(|p| &p.id == id)
    }

    /// The master unit
    #[must_use]
    pub fn master(&self) -> &MasterUnit {
        &self.master
    }

    /// Stored value of a slider
    #[must_use]
    pub fn slider_value(&self, scope: &SliderScope, slider_id: &str) -> Option<f64> {
        self.slider_values
            .get(&(scope.clone(), slider_id.to_string()))
            .copied()
    }

    /// Timing configuration
    #[must_use]
    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    /// Immutable copy of every panel and the master
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            panels: self.panels.iter().map(Panel::summary).collect(),
            master: MasterSummary {
                compact: self.master.compact,
                sliders: self.master.sliders.clone(),
            },
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// `client.syncPanels` carrying every panel
    #[must_use]
    pub fn sync_message(&self) -> WireMessage {
        LifecycleMessage::SyncPanels {
            panels: self.panels.iter().map(Panel::summary).collect(),
        }
        .into()
    }

    /// `state.update` carrying the flags of every panel
    #[must_use]
    pub fn state_update_message(&self) -> WireMessage {
        BroadcastMessage::StateUpdate {
            panels: self.panels.iter().map(Panel::flags).collect(),
        }
        .into()
    }

    fn index_of(&self, id: &PanelId) -> Result<usize, AuthorityError> {
        self.panels
            .iter()
            .position(|p| &p.id == id)
            .ok_or_else(|| AuthorityError::UnknownPanel(id.clone()))
    }

    // ========================================================================
    // Startup and persistence
    // ========================================================================

    /// Restore panels and master from persistence
    ///
    /// Everything loads paused. Returns the number of panels restored.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when stored state cannot be read.
    pub async fn load(&mut self) -> Result<usize, PersistenceError> {
        let Some(state) = self.collab.persistence.load().await? else {
            return Ok(0);
        };

        let mut panels = Vec::with_capacity(state.panels.len());
        for stored in state.panels {
            let mut panel = Panel::new(
                stored.id,
                stored.number,
                stored.z_index,
                PanelConfig {
                    title: Some(stored.title),
                    source_code: stored.source_code,
                    position: Some(stored.position),
                    size: Some(stored.size),
                },
            );
            let scope = SliderScope::Panel(panel.id.clone());
            panel.sliders = self.extractor.extract(&scope, &panel.source_code);
            self.replace_slider_values(&scope, &panel.sliders);
            panels.push(panel);
        }
        self.panels = panels;

        self.master.compact = state.master.compact;
        self.master.source_code = state.master.source_code;
        self.master.sliders = self
            .extractor
            .extract(&SliderScope::Master, &self.master.source_code);
        let master_sliders = self.master.sliders.clone();
        self.replace_slider_values(&SliderScope::Master, &master_sliders);

        tracing::info!(panels = self.panels.len(), "Restored state");
        Ok(self.panels.len())
    }

    fn persisted_state(&self) -> PersistedState {
        PersistedState {
            version: STATE_VERSION,
            panels: self
                .panels
                .iter()
                .map(|p| PersistedPanel {
                    id: p.id.clone(),
                    number: p.number,
                    title: p.title.clone(),
                    source_code: p.source_code.clone(),
                    position: p.position,
                    size: p.size,
                    z_index: p.z_index,
                })
                .collect(),
            master: PersistedMaster {
                compact: self.master.compact,
                source_code: self.master.source_code.clone(),
            },
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.collab.persistence.save(&self.persisted_state()).await {
            tracing::error!(error = %e, "Failed to save state");
        }
    }

    // ========================================================================
    // Emission
    // ========================================================================

    fn emit(&self, message: impl Into<WireMessage>) {
        let message = message.into();
        let kind = message.kind();
        if self.outbox.send(message).is_err() {
            tracing::debug!(%kind, "Outbox closed; message dropped");
        }
    }

    fn broadcast_state(&self) {
        self.emit(self.state_update_message());
    }

    /// Emit the resync baseline (`full_state`, then `master.sliders`)
    pub fn publish_full_state(&self) {
        let snapshot = self.snapshot();
        tracing::info!(panels = snapshot.panels.len(), "Publishing full state");
        for message in ResyncCoordinator::baseline(&snapshot) {
            self.emit(message);
        }
    }

    // ========================================================================
    // Panel lifecycle
    // ========================================================================

    /// Create a panel and announce it
    pub async fn create_panel(&mut self, config: PanelConfig) -> PanelId {
        let number = self.panels.iter().map(|p| p.number).max().unwrap_or(0) + 1;
        let z_index = self.top_z_index() + 1;
        let id = PanelId::generate();
        let panel = Panel::new(id.clone(), number, z_index, config);

        tracing::info!(panel_id = %id, number, title = %panel.title, "Panel created");
        self.emit(BroadcastMessage::PanelCreated {
            id: id.clone(),
            number,
            title: panel.title.clone(),
            position: panel.position,
            size: panel.size,
        });
        self.panels.push(panel);
        self.persist().await;
        id
    }

    /// Silence (if playing), remove and announce a panel
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::UnknownPanel`] if no such panel exists.
    pub async fn delete_panel(&mut self, id: &PanelId) -> Result<(), AuthorityError> {
        let idx = self.index_of(id)?;

        if self.panels[idx].playing() {
            let target = EvalTarget::Panel(id.clone());
            if let Err(e) = self.collab.evaluator.silence(&target).await {
                tracing::warn!(panel_id = %id, error = %e, "Silence failed; removing anyway");
            }
        }

        self.rename_timers.cancel(id);
        self.panels.remove(idx);
        let scope = SliderScope::Panel(id.clone());
        self.slider_values.retain(|(s, _), _| s != &scope);

        tracing::info!(panel_id = %id, "Panel deleted");
        self.emit(BroadcastMessage::PanelDeleted { id: id.clone() });
        self.persist().await;
        Ok(())
    }

    /// Change a panel's title; the broadcast is debounced per panel
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::UnknownPanel`] if no such panel exists.
    pub async fn rename_panel(
        &mut self,
        id: &PanelId,
        title: impl Into<String>,
    ) -> Result<(), AuthorityError> {
        let idx = self.index_of(id)?;
        let title = title.into();
        if self.panels[idx].title == title {
            return Ok(());
        }
        self.panels[idx].title.clone_from(&title);

        let outbox = self.outbox.clone();
        let message: WireMessage = BroadcastMessage::PanelRenamed {
            id: id.clone(),
            title,
        }
        .into();
        self.rename_timers
            .schedule(id.clone(), self.config.rename_debounce, async move {
                let _ = outbox.send(message);
            });

        self.persist().await;
        Ok(())
    }

    /// Replace a panel's source and recompute staleness
    ///
    /// Local only: nothing is broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::UnknownPanel`] if no such panel exists.
    pub async fn set_panel_code(
        &mut self,
        id: &PanelId,
        code: impl Into<String>,
    ) -> Result<PlaybackState, AuthorityError> {
        let idx = self.index_of(id)?;
        let state = self.apply_edit(idx, code.into());
        self.persist().await;
        Ok(state)
    }

    fn apply_edit(&mut self, idx: usize, code: String) -> PlaybackState {
        let panel = &mut self.panels[idx];
        panel.source_code = code;
        let transition = panel.tracker.edited(&panel.source_code);
        if transition.changed() {
            tracing::debug!(
                panel_id = %panel.id,
                from = %transition.from,
                to = %transition.to,
                "Staleness changed"
            );
            self.collab.surface.render_flags(&panel.flags());
        }
        transition.to
    }

    /// Move or resize a panel and bring it to the top
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::UnknownPanel`] if no such panel exists.
    pub async fn move_panel(
        &mut self,
        id: &PanelId,
        position: Option<Position>,
        size: Option<Size>,
    ) -> Result<(), AuthorityError> {
        let idx = self.index_of(id)?;
        let top = self.top_z_index();
        let shares_top = self.panels.iter().filter(|p| p.z_index == top).count() > 1;
        let panel = &mut self.panels[idx];
        if let Some(position) = position {
            panel.position = position;
        }
        if let Some(size) = size {
            panel.size = size;
        }
        if panel.z_index < top || shares_top {
            panel.z_index = top + 1;
        }
        self.persist().await;
        Ok(())
    }

    fn top_z_index(&self) -> u32 {
        self.panels.iter().map(|p| p.z_index).max().unwrap_or(0)
    }

    // ========================================================================
    // Playback
    // ========================================================================

    /// Evaluate a panel and broadcast flags
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::UnknownPanel`] or the evaluation failure;
    /// on failure nothing is broadcast and the panel keeps its state.
    pub async fn play_panel(&mut self, id: &PanelId) -> Result<(), AuthorityError> {
        self.activate(id).await?;
        self.broadcast_state();
        Ok(())
    }

    /// Re-evaluate a panel's current source
    ///
    /// Behaves like [`StateAuthority::play_panel`] for a paused panel.
    ///
    /// # Errors
    ///
    /// See [`StateAuthority::play_panel`].
    pub async fn update_panel(&mut self, id: &PanelId) -> Result<(), AuthorityError> {
        self.play_panel(id).await
    }

    /// Silence a panel and broadcast flags
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::UnknownPanel`] if no such panel exists.
    pub async fn pause_panel(&mut self, id: &PanelId) -> Result<(), AuthorityError> {
        let idx = self.index_of(id)?;
        self.silence(idx).await;
        self.broadcast_state();
        Ok(())
    }

    /// Pause a playing panel, play a paused one
    ///
    /// # Errors
    ///
    /// See [`StateAuthority::play_panel`].
    pub async fn toggle_panel(&mut self, id: &PanelId) -> Result<(), AuthorityError> {
        let idx = self.index_of(id)?;
        if self.panels[idx].playing() {
            self.pause_panel(id).await
        } else {
            self.play_panel(id).await
        }
    }

    /// Silence every playing panel, then broadcast flags once
    pub async fn stop_all(&mut self) {
        let mut stopped = 0usize;
        for idx in 0..self.panels.len() {
            if self.panels[idx].playing() {
                self.silence(idx).await;
                stopped += 1;
            }
        }
        tracing::info!(stopped, "Stopped all panels");
        self.broadcast_state();
    }

    /// Re-evaluate every stale panel in insertion order
    ///
    /// The master goes first when its source changed. Activations are
    /// spaced by the configured gap, each with a flash cue. Failures are
    /// logged and skipped. Flags are broadcast once at the end.
    ///
    /// Returns the number of panels successfully re-evaluated.
    pub async fn update_all(&mut self) -> usize {
        self.evaluate_master_if_needed().await;

        let stale: Vec<PanelId> = self
            .panels
            .iter()
            .filter(|p| p.stale())
            .map(|p| p.id.clone())
            .collect();

        let mut updated = 0usize;
        for (i, id) in stale.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.update_spacing).await;
            }
            self.collab.surface.highlight(
                &EvalTarget::Panel(id.clone()),
                Highlight::Flash {
                    duration: self.config.flash_duration,
                },
            );
            match self.activate(id).await {
                Ok(()) => updated += 1,
                Err(e) => tracing::warn!(panel_id = %id, error = %e, "Skipping panel in update all"),
            }
        }

        tracing::info!(stale = stale.len(), updated, "Updated stale panels");
        self.broadcast_state();
        updated
    }

    /// Evaluate a panel without broadcasting
    async fn activate(&mut self, id: &PanelId) -> Result<(), AuthorityError> {
        let idx = self.index_of(id)?;
        let target = EvalTarget::Panel(id.clone());

        if let Some(current) = self.collab.surface.current_source(&target) {
            if current != self.panels[idx].source_code {
                self.apply_edit(idx, current);
            }
        }

        self.evaluate_master_if_needed().await;

        let code = self.panels[idx].source_code.clone();
        if let Err(e) = self.collab.evaluator.evaluate(&target, &code).await {
            tracing::warn!(panel_id = %id, error = %e, "Evaluation failed; state unchanged");
            self.collab.surface.highlight(
                &target,
                Highlight::Error {
                    message: e.to_string(),
                },
            );
            return Err(e.into());
        }

        let scope = SliderScope::Panel(id.clone());
        let sliders = self.extractor.extract(&scope, &code);
        let panel = &mut self.panels[idx];
        let transition = panel.tracker.evaluated(&code);
        let had_sliders = !panel.sliders.is_empty();
        panel.sliders.clone_from(&sliders);
        let flags = panel.flags();

        tracing::debug!(
            panel_id = %id,
            from = %transition.from,
            to = %transition.to,
            "Panel evaluated"
        );
        self.collab.surface.highlight(&target, Highlight::Clear);
        self.collab.surface.render_flags(&flags);
        self.replace_slider_values(&scope, &sliders);
        if had_sliders || !sliders.is_empty() {
            self.emit(BroadcastMessage::PanelSliders {
                panel_id: id.clone(),
                sliders,
            });
        }
        Ok(())
    }

    async fn silence(&mut self, idx: usize) {
        let id = self.panels[idx].id.clone();
        if !self.panels[idx].playing() {
            return;
        }
        if let Err(e) = self
            .collab
            .evaluator
            .silence(&EvalTarget::Panel(id.clone()))
            .await
        {
            tracing::warn!(panel_id = %id, error = %e, "Silence failed; marking paused");
        }
        let panel = &mut self.panels[idx];
        panel.tracker.paused();
        self.collab.surface.render_flags(&panel.flags());
    }

    // ========================================================================
    // Master unit
    // ========================================================================

    /// Replace the master source
    ///
    /// Once the master has been evaluated, edits schedule a debounced
    /// re-evaluation.
    pub async fn set_master_code(&mut self, code: impl Into<String>) {
        self.master.source_code = code.into();
        if self.master.has_been_evaluated() {
            let events = self.events.clone();
            self.master_timer
                .schedule((), self.config.master_debounce, async move {
                    let _ = events.send(AuthorityEvent::MasterDebounceElapsed).await;
                });
        }
        self.persist().await;
    }

    /// Collapse or expand the master presentation
    pub async fn set_master_compact(&mut self, compact: bool) {
        self.master.compact = compact;
        self.persist().await;
    }

    /// Evaluate the master source
    ///
    /// # Errors
    ///
    /// Returns the evaluation failure; the master keeps its previous
    /// evaluated source and sliders.
    pub async fn evaluate_master(&mut self) -> Result<(), AuthorityError> {
        if let Some(current) = self.collab.surface.current_source(&EvalTarget::Master) {
            self.master.source_code = current;
        }

        let code = self.master.source_code.clone();
        if let Err(e) = self
            .collab
            .evaluator
            .evaluate(&EvalTarget::Master, &code)
            .await
        {
            tracing::warn!(error = %e, "Master evaluation failed");
            self.collab.surface.highlight(
                &EvalTarget::Master,
                Highlight::Error {
                    message: e.to_string(),
                },
            );
            return Err(e.into());
        }

        let sliders = self.extractor.extract(&SliderScope::Master, &code);
        let had_sliders = !self.master.sliders.is_empty();
        self.master.last_evaluated_code = Some(code);
        self.master.sliders.clone_from(&sliders);
        self.replace_slider_values(&SliderScope::Master, &sliders);
        self.collab
            .surface
            .highlight(&EvalTarget::Master, Highlight::Clear);

        tracing::debug!(sliders = sliders.len(), "Master evaluated");
        if had_sliders || !sliders.is_empty() {
            self.emit(BroadcastMessage::MasterSliders { sliders });
        }
        Ok(())
    }

    async fn evaluate_master_if_needed(&mut self) {
        if self.master.needs_evaluation() {
            if let Err(e) = self.evaluate_master().await {
                tracing::warn!(error = %e, "Continuing without master update");
            }
        }
    }

    // ========================================================================
    // Sliders
    // ========================================================================

    fn replace_slider_values(&mut self, scope: &SliderScope, sliders: &[SliderWidget]) {
        self.slider_values.retain(|(s, _), _| s != scope);
        for widget in sliders {
            self.slider_values
                .insert((scope.clone(), widget.slider_id.clone()), widget.value);
        }
    }

    /// Store a slider value, render it locally and share it with remotes
    ///
    /// Local and remote changes take the same path. Concurrent changes
    /// resolve last-write-wins in arrival order. Non-finite values are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::UnknownPanel`] for a panel scope whose
    /// panel does not exist.
    pub fn update_slider_value(
        &mut self,
        scope: SliderScope,
        slider_id: impl Into<String>,
        value: f64,
        origin: SliderOrigin,
    ) -> Result<(), AuthorityError> {
        let slider_id = slider_id.into();
        if !value.is_finite() {
            tracing::warn!(%scope, slider_id = %slider_id, "Ignoring non-finite slider value");
            return Ok(());
        }

        let widgets = match &scope {
            SliderScope::Master => &mut self.master.sliders,
            SliderScope::Panel(id) => {
                let idx = self.index_of(id)?;
                &mut self.panels[idx].sliders
            }
        };
        if let Some(widget) = widgets.iter_mut().find(|w| w.slider_id == slider_id) {
            widget.value = value;
        }

        self.slider_values
            .insert((scope.clone(), slider_id.clone()), value);
        self.collab.surface.render_slider(&scope, &slider_id, value);
        tracing::debug!(%scope, slider_id = %slider_id, value, ?origin, "Slider value stored");

        match scope {
            SliderScope::Master => self.emit(BroadcastMessage::MasterSliderValue { slider_id, value }),
            SliderScope::Panel(panel_id) => self.emit(BroadcastMessage::PanelSliderValue {
                panel_id,
                slider_id,
                value,
            }),
        }
        Ok(())
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Apply a command received from a remote
    ///
    /// # Errors
    ///
    /// Returns the failing operation's error.
    pub async fn handle_command(&mut self, command: CommandMessage) -> Result<(), AuthorityError> {
        match command {
            CommandMessage::PanelPlay { panel } => self.play_panel(&panel).await,
            CommandMessage::PanelPause { panel } => self.pause_panel(&panel).await,
            CommandMessage::PanelToggle { panel } => self.toggle_panel(&panel).await,
            CommandMessage::PanelUpdate { panel } => self.update_panel(&panel).await,
            CommandMessage::StopAll => {
                self.stop_all().await;
                Ok(())
            }
            CommandMessage::UpdateAll => {
                self.update_all().await;
                Ok(())
            }
            CommandMessage::MasterSliderChange { slider_id, value } => {
                self.update_slider_value(SliderScope::Master, slider_id, value, SliderOrigin::Remote)
            }
            CommandMessage::PanelSliderChange {
                panel_id,
                slider_id,
                value,
            } => self.update_slider_value(
                SliderScope::Panel(panel_id),
                slider_id,
                value,
                SliderOrigin::Remote,
            ),
        }
    }

    /// Process a timer event
    pub async fn handle_event(&mut self, event: AuthorityEvent) {
        match event {
            AuthorityEvent::MasterDebounceElapsed => {
                if self.master.needs_evaluation() {
                    if let Err(e) = self.evaluate_master().await {
                        tracing::debug!(error = %e, "Debounced master evaluation failed");
                    }
                }
            }
        }
    }

    /// Cancel every pending debounce timer
    pub fn cancel_timers(&mut self) {
        self.rename_timers.cancel_all();
        self.master_timer.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use crate::protocol::{MessageKind, PanelFlags};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeEvaluator {
        calls: Mutex<Vec<String>>,
        rejected: Mutex<HashSet<String>>,
    }

    impl FakeEvaluator {
        fn reject(&self, source: &str) {
            self.rejected.lock().insert(source.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Evaluator for FakeEvaluator {
        fn name(&self) -> &str {
            "fake"
        }

        async fn evaluate(&self, target: &EvalTarget, source: &str) -> Result<(), EvalError> {
            self.calls.lock().push(format!("eval {target}"));
            if self.rejected.lock().contains(source) {
                return Err(EvalError::rejected(target, "bad pattern"));
            }
            Ok(())
        }

        async fn silence(&self, target: &EvalTarget) -> Result<(), EvalError> {
            self.calls.lock().push(format!("silence {target}"));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSurface {
        highlights: Mutex<Vec<(EvalTarget, Highlight)>>,
        editor: Mutex<HashMap<EvalTarget, String>>,
        sliders: Mutex<Vec<(String, f64)>>,
    }

    impl LocalSurface for FakeSurface {
        fn current_source(&self, target: &EvalTarget) -> Option<String> {
            self.editor.lock().get(target).cloned()
        }

        fn highlight(&self, target: &EvalTarget, highlight: Highlight) {
            self.highlights.lock().push((target.clone(), highlight));
        }

        fn render_slider(&self, _scope: &SliderScope, slider_id: &str, value: f64) {
            self.sliders.lock().push((slider_id.to_string(), value));
        }
    }

    struct Harness {
        authority: StateAuthority,
        events: mpsc::Receiver<AuthorityEvent>,
        outbox: mpsc::UnboundedReceiver<WireMessage>,
        evaluator: Arc<FakeEvaluator>,
        surface: Arc<FakeSurface>,
        persistence: Arc<MemoryPersistence>,
    }

    impl Harness {
        fn drain(&mut self) -> Vec<WireMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.outbox.try_recv() {
                out.push(msg);
            }
            out
        }

        fn drain_kind(&mut self, kind: MessageKind) -> Vec<WireMessage> {
            self.drain().into_iter().filter(|m| m.kind() == kind).collect()
        }
    }

    fn harness() -> Harness {
        let evaluator = Arc::new(FakeEvaluator::default());
        let surface = Arc::new(FakeSurface::default());
        let persistence = Arc::new(MemoryPersistence::new());
        let (tx, outbox) = mpsc::unbounded_channel();
        let (authority, events) = StateAuthority::new(
            AuthorityConfig::default(),
            Collaborators {
                evaluator: evaluator.clone(),
                surface: surface.clone(),
                persistence: persistence.clone(),
            },
            tx,
        );
        Harness {
            authority,
            events,
            outbox,
            evaluator,
            surface,
            persistence,
        }
    }

    fn assert_invariant(authority: &StateAuthority) {
        for panel in authority.panels() {
            assert!(!panel.stale() || panel.playing(), "stale without playing");
        }
    }

    #[tokio::test]
    async fn test_create_panel_emits_panel_created() {
        let mut h = harness();
        let id = h
            .authority
            .create_panel(PanelConfig::titled("Bass"))
            .await;

        let msgs = h.drain();
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            WireMessage::Broadcast(BroadcastMessage::PanelCreated {
                id: created,
                number,
                title,
                ..
            }) => {
                assert_eq!(created, &id);
                assert_eq!(*number, 1);
                assert_eq!(title, "Bass");
            }
            other => panic!("unexpected: {other:?}"),
        }

        let panel = h.authority.panel(&id).unwrap();
        assert!(!panel.playing());
        assert!(!panel.stale());
        assert_eq!(h.persistence.save_count(), 1);
    }

    #[tokio::test]
    async fn test_numbering_is_max_plus_one() {
        let mut h = harness();
        let a = h.authority.create_panel(PanelConfig::default()).await;
        let _b = h.authority.create_panel(PanelConfig::default()).await;
        h.authority.delete_panel(&a).await.unwrap();
        let c = h.authority.create_panel(PanelConfig::default()).await;
        assert_eq!(h.authority.panel(&c).unwrap().number, 3);
    }

    #[tokio::test]
    async fn test_play_from_paused_broadcasts_flags() {
        let mut h = harness();
        let id = h
            .authority
            .create_panel(PanelConfig::titled("Bass").with_source("note(\"c2\")"))
            .await;
        h.drain();

        h.authority.play_panel(&id).await.unwrap();

        let panel = h.authority.panel(&id).unwrap();
        assert_eq!(panel.state(), PlaybackState::Synced);
        assert_eq!(panel.last_evaluated_code(), "note(\"c2\")");

        let updates = h.drain_kind(MessageKind::StateUpdate);
        assert_eq!(
            updates,
            vec![WireMessage::Broadcast(BroadcastMessage::StateUpdate {
                panels: vec![PanelFlags {
                    panel: id,
                    playing: true,
                    stale: false
                }]
            })]
        );
    }

    #[tokio::test]
    async fn test_failed_play_rolls_back_and_stays_local() {
        let mut h = harness();
        let id = h
            .authority
            .create_panel(PanelConfig::default().with_source("broken("))
            .await;
        h.drain();
        h.evaluator.reject("broken(");

        let err = h.authority.play_panel(&id).await.unwrap_err();
        assert!(matches!(err, AuthorityError::Evaluation(_)));
        assert_eq!(h.authority.panel(&id).unwrap().state(), PlaybackState::Paused);
        assert!(h.drain().is_empty());

        let highlights = h.surface.highlights.lock();
        assert!(matches!(highlights.last(), Some((_, Highlight::Error { .. }))));
    }

    #[tokio::test]
    async fn test_failed_update_keeps_stale_panel_playing() {
        let mut h = harness();
        let id = h
            .authority
            .create_panel(PanelConfig::default().with_source("a"))
            .await;
        h.authority.play_panel(&id).await.unwrap();
        h.authority.set_panel_code(&id, "a(").await.unwrap();
        h.evaluator.reject("a(");

        assert!(h.authority.update_panel(&id).await.is_err());
        let panel = h.authority.panel(&id).unwrap();
        // Rolled back to the prior state, not forced to paused
        assert!(panel.playing());
        assert_eq!(panel.state(), PlaybackState::Stale);
        assert_eq!(panel.last_evaluated_code(), "a");
        assert_eq!(panel.source_code, "a(");
        assert_invariant(&h.authority);
    }

    #[tokio::test]
    async fn test_edit_while_synced_goes_stale_without_broadcast() {
        let mut h = harness();
        let id = h
            .authority
            .create_panel(PanelConfig::default().with_source("s(\"bd\")"))
            .await;
        h.authority.play_panel(&id).await.unwrap();
        h.drain();

        let state = h
            .authority
            .set_panel_code(&id, "s(\"bd sd\")")
            .await
            .unwrap();

        assert_eq!(state, PlaybackState::Stale);
        assert!(h.drain().is_empty());
        assert_invariant(&h.authority);
    }

    #[tokio::test]
    async fn test_pause_clears_stale_and_broadcasts() {
        let mut h = harness();
        let id = h
            .authority
            .create_panel(PanelConfig::default().with_source("a"))
            .await;
        h.authority.play_panel(&id).await.unwrap();
        h.authority.set_panel_code(&id, "b").await.unwrap();
        h.drain();

        h.authority.pause_panel(&id).await.unwrap();

        let panel = h.authority.panel(&id).unwrap();
        assert!(!panel.playing());
        assert!(!panel.stale());
        assert_eq!(h.drain_kind(MessageKind::StateUpdate).len(), 1);
        assert!(h.evaluator.calls().contains(&format!("silence {id}")));
    }

    #[tokio::test]
    async fn test_toggle_alternates() {
        let mut h = harness();
        let id = h
            .authority
            .create_panel(PanelConfig::default().with_source("a"))
            .await;

        h.authority.toggle_panel(&id).await.unwrap();
        assert!(h.authority.panel(&id).unwrap().playing());
        h.authority.toggle_panel(&id).await.unwrap();
        assert!(!h.authority.panel(&id).unwrap().playing());
    }

    #[tokio::test]
    async fn test_play_uses_newer_editor_source() {
        let mut h = harness();
        let id = h
            .authority
            .create_panel(PanelConfig::default().with_source("old"))
            .await;
        h.surface
            .editor
            .lock()
            .insert(EvalTarget::Panel(id.clone()), "new".to_string());

        h.authority.play_panel(&id).await.unwrap();

        let panel = h.authority.panel(&id).unwrap();
        assert_eq!(panel.source_code, "new");
        assert_eq!(panel.last_evaluated_code(), "new");
    }

    #[tokio::test]
    async fn test_delete_silences_before_removal() {
        let mut h = harness();
        let id = h
            .authority
            .create_panel(PanelConfig::default().with_source("a"))
            .await;
        h.authority.play_panel(&id).await.unwrap();
        h.drain();

        h.authority.delete_panel(&id).await.unwrap();

        assert!(h.authority.panel(&id).is_none());
        assert_eq!(h.evaluator.calls().last(), Some(&format!("silence {id}")));
        assert_eq!(
            h.drain(),
            vec![WireMessage::Broadcast(BroadcastMessage::PanelDeleted { id })]
        );
    }

    #[tokio::test]
    async fn test_unknown_panel_errors() {
        let mut h = harness();
        let ghost = PanelId::from("ghost");
        assert!(matches!(
            h.authority.play_panel(&ghost).await,
            Err(AuthorityError::UnknownPanel(_))
        ));
        assert!(matches!(
            h.authority.delete_panel(&ghost).await,
            Err(AuthorityError::UnknownPanel(_))
        ));
        assert!(h.authority.update_slider_value(
            SliderScope::Panel(ghost),
            "x",
            1.0,
            SliderOrigin::Remote
        )
        .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rename_is_debounced() {
        let mut h = harness();
        let id = h.authority.create_panel(PanelConfig::default()).await;
        h.drain();

        h.authority.rename_panel(&id, "B").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.authority.rename_panel(&id, "Ba").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.authority.rename_panel(&id, "Bass").await.unwrap();
        assert!(h.drain().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(
            h.drain(),
            vec![WireMessage::Broadcast(BroadcastMessage::PanelRenamed {
                id: id.clone(),
                title: "Bass".to_string()
            })]
        );
        assert_eq!(h.authority.panel(&id).unwrap().title, "Bass");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_cancels_pending_rename() {
        let mut h = harness();
        let id = h.authority.create_panel(PanelConfig::default()).await;
        h.authority.rename_panel(&id, "Gone").await.unwrap();
        h.authority.delete_panel(&id).await.unwrap();
        h.drain();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.drain_kind(MessageKind::PanelRenamed).is_empty());
    }

    #[tokio::test]
    async fn test_stop_all_silences_playing_panels_once() {
        let mut h = harness();
        let a = h
            .authority
            .create_panel(PanelConfig::default().with_source("a"))
            .await;
        let b = h
            .authority
            .create_panel(PanelConfig::default().with_source("b"))
            .await;
        let _c = h.authority.create_panel(PanelConfig::default()).await;
        h.authority.play_panel(&a).await.unwrap();
        h.authority.play_panel(&b).await.unwrap();
        h.drain();

        h.authority.stop_all().await;

        assert!(h.authority.panels().iter().all(|p| !p.playing()));
        assert_eq!(h.drain_kind(MessageKind::StateUpdate).len(), 1);
        let silences = h
            .evaluator
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("silence"))
            .count();
        assert_eq!(silences, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_all_in_insertion_order_with_spacing() {
        let mut h = harness();
        let mut ids = Vec::new();
        for src in ["a", "b", "c"] {
            let id = h
                .authority
                .create_panel(PanelConfig::default().with_source(src))
                .await;
            h.authority.play_panel(&id).await.unwrap();
            ids.push(id);
        }
        h.authority.set_panel_code(&ids[0], "a2").await.unwrap();
        h.authority.set_panel_code(&ids[2], "c2").await.unwrap();
        h.evaluator.calls.lock().clear();
        h.drain();

        let started = tokio::time::Instant::now();
        let updated = h.authority.update_all().await;

        assert_eq!(updated, 2);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(
            h.evaluator.calls(),
            vec![format!("eval {}", ids[0]), format!("eval {}", ids[2])]
        );
        assert!(h.authority.panels().iter().all(|p| !p.stale()));
        assert_eq!(h.drain_kind(MessageKind::StateUpdate).len(), 1);

        let flashes = h
            .surface
            .highlights
            .lock()
            .iter()
            .filter(|(_, hl)| matches!(hl, Highlight::Flash { .. }))
            .count();
        assert_eq!(flashes, 2);
    }

    #[tokio::test]
    async fn test_master_evaluated_before_panel() {
        let mut h = harness();
        h.authority.set_master_code("tempo = slider(30, 10, 60, 1)").await;
        let id = h
            .authority
            .create_panel(PanelConfig::default().with_source("a"))
            .await;
        h.drain();

        h.authority.play_panel(&id).await.unwrap();

        assert_eq!(
            h.evaluator.calls(),
            vec!["eval master".to_string(), format!("eval {id}")]
        );
        let sliders = h.drain_kind(MessageKind::MasterSliders);
        assert_eq!(sliders.len(), 1);
        assert_eq!(
            h.authority.slider_value(&SliderScope::Master, "master_tempo"),
            Some(30.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_master_edit_after_evaluation_is_debounced() {
        let mut h = harness();
        h.authority.set_master_code("setcps(0.5)").await;
        h.authority.evaluate_master().await.unwrap();
        h.evaluator.calls.lock().clear();

        h.authority.set_master_code("setcps(0.6)").await;
        h.authority.set_master_code("setcps(0.7)").await;

        let event = h.events.recv().await.unwrap();
        assert_eq!(event, AuthorityEvent::MasterDebounceElapsed);
        h.authority.handle_event(event).await;

        assert_eq!(h.evaluator.calls(), vec!["eval master".to_string()]);
        assert!(!h.authority.master().needs_evaluation());
    }

    #[tokio::test]
    async fn test_panel_sliders_replaced_on_evaluation() {
        let mut h = harness();
        let id = h
            .authority
            .create_panel(PanelConfig::default().with_source("gain = slider(0.5)"))
            .await;
        h.authority.play_panel(&id).await.unwrap();
        let slider_id = format!("{id}_gain");
        assert_eq!(h.authority.panel(&id).unwrap().sliders[0].slider_id, slider_id);

        h.authority
            .set_panel_code(&id, "lpf = slider(800, 100, 4000)")
            .await
            .unwrap();
        h.authority.update_panel(&id).await.unwrap();

        let scope = SliderScope::Panel(id.clone());
        assert_eq!(h.authority.slider_value(&scope, &slider_id), None);
        assert_eq!(
            h.authority.slider_value(&scope, &format!("{id}_lpf")),
            Some(800.0)
        );
    }

    #[tokio::test]
    async fn test_slider_last_write_wins() {
        let mut h = harness();
        for value in [30.0, 36.0] {
            h.authority
                .handle_command(CommandMessage::MasterSliderChange {
                    slider_id: "master_tempo".to_string(),
                    value,
                })
                .await
                .unwrap();
        }

        assert_eq!(
            h.authority.slider_value(&SliderScope::Master, "master_tempo"),
            Some(36.0)
        );
        let values = h.drain_kind(MessageKind::MasterSliderValue);
        assert_eq!(values.len(), 2);
        assert_eq!(
            values.last(),
            Some(&WireMessage::Broadcast(BroadcastMessage::MasterSliderValue {
                slider_id: "master_tempo".to_string(),
                value: 36.0
            }))
        );
        assert_eq!(h.surface.sliders.lock().last(), Some(&("master_tempo".to_string(), 36.0)));
    }

    #[tokio::test]
    async fn test_non_finite_slider_value_ignored() {
        let mut h = harness();
        h.authority
            .update_slider_value(SliderScope::Master, "master_x", f64::NAN, SliderOrigin::Local)
            .unwrap();
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_full_state_reflects_store() {
        let mut h = harness();
        let id = h
            .authority
            .create_panel(PanelConfig::titled("Bass").with_source("a"))
            .await;
        h.authority.play_panel(&id).await.unwrap();
        h.drain();

        h.authority.publish_full_state();

        match h.drain().first() {
            Some(WireMessage::Broadcast(BroadcastMessage::FullState { panels, .. })) => {
                assert_eq!(panels, &vec![h.authority.panel(&id).unwrap().summary()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_restores_paused_panels() {
        let mut h = harness();
        let id = h
            .authority
            .create_panel(PanelConfig::titled("Keys").with_source("v = slider(0.3)"))
            .await;
        h.authority.play_panel(&id).await.unwrap();
        h.authority.set_master_compact(true).await;
        let saved = h.persistence.snapshot().unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut restored, _events) = StateAuthority::new(
            AuthorityConfig::default(),
            Collaborators {
                evaluator: Arc::new(FakeEvaluator::default()),
                surface: Arc::new(FakeSurface::default()),
                persistence: Arc::new(MemoryPersistence::with_state(saved)),
            },
            tx,
        );
        assert_eq!(restored.load().await.unwrap(), 1);

        let panel = restored.panel(&id).unwrap();
        assert_eq!(panel.title, "Keys");
        assert!(!panel.playing());
        assert_eq!(panel.sliders.len(), 1);
        assert!(restored.master().compact);
    }

    #[tokio::test]
    async fn test_move_panel_brings_to_front() {
        let mut h = harness();
        let a = h.authority.create_panel(PanelConfig::default()).await;
        let b = h.authority.create_panel(PanelConfig::default()).await;
        assert!(h.authority.panel(&b).unwrap().z_index > h.authority.panel(&a).unwrap().z_index);

        h.authority
            .move_panel(&a, Some(Position::new(5.0, 6.0)), None)
            .await
            .unwrap();

        let moved = h.authority.panel(&a).unwrap();
        assert!(moved.z_index > h.authority.panel(&b).unwrap().z_index);
        assert_eq!(moved.position, Position::new(5.0, 6.0));
    }
}
