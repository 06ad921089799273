//! Evaluator Traits
//!
//! Trait definition for the external pattern/audio engine. Implementations
//! wrap whatever actually turns source code into sound; the state
//! authority only needs to know whether an evaluation succeeded.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::PanelId;

/// Unit an evaluation applies to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EvalTarget {
    /// The master unit
    Master,
    /// An ordinary panel
    Panel(PanelId),
}

impl fmt::Display for EvalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Panel(id) => write!(f, "{id}"),
        }
    }
}

/// Failure reported by an evaluator
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    /// The source was rejected (syntax or runtime error)
    #[error("evaluation of {target} failed: {message}")]
    Rejected {
        /// Target that failed, rendered for display
        target: String,
        /// Engine-provided message
        message: String,
    },

    /// The engine could not be reached
    #[error("evaluator unavailable: {0}")]
    Unavailable(String),
}

impl EvalError {
    /// Build a rejection for `target`
    pub fn rejected(target: &EvalTarget, message: impl Into<String>) -> Self {
        Self::Rejected {
            target: target.to_string(),
            message: message.into(),
        }
    }
}

/// Pattern/audio engine
///
/// Implement this trait to connect a real synthesis engine.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &str;

    /// Evaluate `source` for `target`, replacing whatever it played before
    async fn evaluate(&self, target: &EvalTarget, source: &str) -> Result<(), EvalError>;

    /// Stop whatever `target` is playing
    async fn silence(&self, target: &EvalTarget) -> Result<(), EvalError>;

    /// Check whether the engine is ready
    async fn health_check(&self) -> bool {
        true
    }
}
