//! Nonlinear batch optimization.
//!
//! The smoother re-optimizes its whole factor graph in place on every
//! update. The driver here is a damped Gauss-Newton (Levenberg-Marquardt)
//! loop over a sparse QR solve, with optional frozen variables that keep an
//! externally pinned linearization point untouched through every iteration.

use crate::core::Values;
use thiserror::Error;

pub mod levenberg_marquardt;

pub use levenberg_marquardt::{LevenbergMarquardt, LevenbergMarquardtConfig};

/// Errors raised while driving the optimization loop
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// The damped linear system could not be solved
    #[error("linear solve failed: {0}")]
    LinearSolveFailed(String),
}

/// Final state of one optimization run
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    /// Optimized values, including any frozen entries
    pub values: Values,
    /// Error of the full graph at `values`
    pub error: f64,
    /// Number of accepted iterations
    pub iterations: usize,
}

impl OptimizationOutcome {
    /// Outcome for a run that never entered the iteration loop
    pub fn converged_at(values: Values, error: f64) -> Self {
        Self {
            values,
            error,
            iterations: 0,
        }
    }
}
