//! Logging Evaluator
//!
//! Accepts every evaluation and logs it. Used by the headless primary and
//! anywhere no real engine is attached.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::traits::{EvalError, EvalTarget, Evaluator};

/// Evaluator that only records what it was asked to do
#[derive(Debug, Default)]
pub struct LoggingEvaluator {
    evaluations: AtomicUsize,
}

impl LoggingEvaluator {
    /// Create a new logging evaluator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of evaluations accepted so far
    #[must_use]
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Evaluator for LoggingEvaluator {
    fn name(&self) -> &str {
        "logging"
    }

    async fn evaluate(&self, target: &EvalTarget, source: &str) -> Result<(), EvalError> {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            target_unit = %target,
            source_len = source.len(),
            "Evaluating source"
        );
        Ok(())
    }

    async fn silence(&self, target: &EvalTarget) -> Result<(), EvalError> {
        tracing::info!(target_unit = %target, "Silencing");
        Ok(())
    }
}
