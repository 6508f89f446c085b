//! Linear algebra for sparse elimination and the damped optimizer step.
//!
//! This module provides the linear layer the smoother is built on:
//! - Gaussian conditionals and the linear factor forms they are produced from
//! - Sparse elimination via QR, one frontal variable at a time
//! - The clique tree assembled during elimination, with cached marginals
//! - Constrained fill-reducing orderings
//! - A sparse least-squares solver (faer) for the damped optimizer step
//!
//! Dense per-clique work uses nalgebra; the global damped system uses faer.

pub mod clique_tree;
pub mod conditional;
pub mod elimination;
pub mod factor;
pub mod ordering;
pub mod sparse;

pub use clique_tree::{Clique, CliqueId, CliqueTree};
pub use conditional::GaussianConditional;
pub use elimination::{eliminate_one, eliminate_partial};
pub use factor::{InformationFactor, JacobianFactor, LinearCost, LinearFactor};
pub use ordering::constrained_ordering;
pub use sparse::SparseQrSolver;

use crate::core::Key;
use thiserror::Error;

/// Type alias for sparse matrices using faer
pub type SparseMatrix = faer::sparse::SparseColMat<usize, f64>;

/// Type alias for faer matrices (used for vectors)
pub type FaerMatrix = faer::Mat<f64>;

/// Errors raised by the linear layer
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Elimination could not determine a variable from the available rows
    #[error("system is singular while eliminating variable {key}")]
    SingularSystem { key: Key },

    /// A Cholesky factorization failed
    #[error("matrix is not positive definite: {0}")]
    NonPositiveDefinite(String),

    /// A noise sigma of zero was encountered where whitening is required
    #[error("sigma is zero at row {row}; constrained noise is not supported here")]
    ConstrainedNoise { row: usize },

    /// A negative noise sigma was provided
    #[error("sigma is negative at row {row}")]
    InvalidNoise { row: usize },

    /// Matrix shapes did not line up
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A factor named the same variable twice
    #[error("variable {key} appears more than once in a factor")]
    DuplicateBlock { key: Key },

    /// A conditional was solved without a value for one of its parents
    #[error("missing value for parent variable {key}")]
    MissingParent { key: Key },

    /// A linear factor was evaluated without a value for one of its variables
    #[error("missing value for variable {key}")]
    MissingVariable { key: Key },

    /// A variable was encountered that the elimination ordering does not cover
    #[error("variable {key} is not covered by the elimination ordering")]
    UnorderedKey { key: Key },

    /// A factor did not have the restricted shape a conversion requires
    #[error("unsupported factor shape: {0}")]
    UnsupportedShape(String),

    /// Sparse matrix assembly failed
    #[error("sparse matrix assembly failed: {0}")]
    Sparse(String),
}
