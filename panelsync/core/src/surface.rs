//! Local Editor Surface
//!
//! The primary's own UI: the editor that holds panel source text and
//! renders decorations. The state authority asks it for current source on
//! demand and sends it highlight instructions; it never reaches the wire.

use std::time::Duration;

use crate::evaluator::EvalTarget;
use crate::model::SliderScope;
use crate::protocol::PanelFlags;

/// Decoration instruction for a panel or the master editor
#[derive(Clone, Debug, PartialEq)]
pub enum Highlight {
    /// Brief cue that the unit was (re)activated; the surface clears it
    /// after `duration` on its own
    Flash {
        /// How long the cue stays visible
        duration: Duration,
    },
    /// Evaluation failed; shown until the next successful evaluation
    Error {
        /// Message to display
        message: String,
    },
    /// Remove any error decoration
    Clear,
}

/// The primary's local editor
///
/// All methods are synchronous and must return promptly; surfaces that
/// animate (the flash cue) do so on their own schedule.
pub trait LocalSurface: Send + Sync {
    /// Current editor text for `target`, if the editor holds a newer
    /// version than the authority
    fn current_source(&self, _target: &EvalTarget) -> Option<String> {
        None
    }

    /// Apply a decoration
    fn highlight(&self, target: &EvalTarget, highlight: Highlight);

    /// Move a rendered slider to `value`
    fn render_slider(&self, scope: &SliderScope, slider_id: &str, value: f64);

    /// Panel runtime flags changed
    fn render_flags(&self, _flags: &PanelFlags) {}
}

/// Surface that logs decorations via `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSurface;

impl LocalSurface for TracingSurface {
    fn highlight(&self, target: &EvalTarget, highlight: Highlight) {
        match highlight {
            Highlight::Error { message } => {
                tracing::error!(target_unit = %target, %message, "Evaluation error");
            }
            Highlight::Flash { duration } => {
                tracing::debug!(target_unit = %target, ?duration, "Flash");
            }
            Highlight::Clear => {
                tracing::debug!(target_unit = %target, "Cleared decorations");
            }
        }
    }

    fn render_slider(&self, scope: &SliderScope, slider_id: &str, value: f64) {
        tracing::debug!(%scope, slider_id, value, "Slider moved");
    }

    fn render_flags(&self, flags: &PanelFlags) {
        tracing::info!(
            panel_id = %flags.panel,
            playing = flags.playing,
            stale = flags.stale,
            "Panel flags"
        );
    }
}
