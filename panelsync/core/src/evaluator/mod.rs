//! Pattern Evaluator Integration
//!
//! The core never parses or sounds patterns itself. It hands source text
//! to an [`Evaluator`] and reacts to success or failure.
//!
//! # Available Evaluators
//!
//! - **Logging**: accepts every evaluation and records it via `tracing`
//!   (headless runs and the console primary)
//!
//! # Usage
//!
//! ```ignore
//! use panelsync_core::evaluator::{EvalTarget, Evaluator, LoggingEvaluator};
//!
//! let evaluator = LoggingEvaluator::new();
//! evaluator.evaluate(&EvalTarget::Master, "setcps(0.5)").await?;
//! ```

mod logging;
mod traits;

pub use logging::LoggingEvaluator;
pub use traits::{EvalError, EvalTarget, Evaluator};
