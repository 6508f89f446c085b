//! Error types for the tandem-smoother library
//!
//! This module provides the main error and result types used throughout the
//! library. All errors use the `thiserror` crate for automatic trait
//! implementations. Module-specific error enums convert into [`TandemError`]
//! so that public entry points can return a single error type.

use crate::core::CoreError;
use crate::linalg::LinAlgError;
use crate::optimizer::OptimizerError;
use thiserror::Error;

/// Main result type used throughout the tandem-smoother library
pub type TandemResult<T> = Result<T, TandemError>;

/// Main error type for the tandem-smoother library
#[derive(Debug, Clone, Error)]
pub enum TandemError {
    /// Linear algebra related errors (elimination, factorization, shapes)
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),

    /// Factor graph and value container errors
    #[error("Graph error: {0}")]
    Graph(String),

    /// Optimizer related errors
    #[error("Solver error: {0}")]
    Solver(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// General computation errors
    #[error("Computation error: {0}")]
    Computation(String),
}

// Convert module-specific errors to TandemError

impl From<LinAlgError> for TandemError {
    fn from(err: LinAlgError) -> Self {
        TandemError::LinearAlgebra(err.to_string())
    }
}

impl From<CoreError> for TandemError {
    fn from(err: CoreError) -> Self {
        TandemError::Graph(err.to_string())
    }
}

impl From<OptimizerError> for TandemError {
    fn from(err: OptimizerError) -> Self {
        TandemError::Solver(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tandem_error_display() {
        let error = TandemError::LinearAlgebra("matrix is singular".to_string());
        assert_eq!(error.to_string(), "Linear algebra error: matrix is singular");
    }

    #[test]
    fn test_tandem_error_from_core() {
        let core_error = CoreError::DuplicateKey { key: 7 };
        let error = TandemError::from(core_error);

        match error {
            TandemError::Graph(msg) => assert!(msg.contains('7')),
            _ => panic!("Expected graph error"),
        }
    }

    #[test]
    fn test_tandem_error_from_linalg() {
        let linalg_error = LinAlgError::SingularSystem { key: 3 };
        let error = TandemError::from(linalg_error);

        match error {
            TandemError::LinearAlgebra(msg) => assert!(msg.contains('3')),
            _ => panic!("Expected linear algebra error"),
        }
    }

    #[test]
    fn test_tandem_result_ok() {
        let result: TandemResult<i32> = Ok(42);
        assert!(result.is_ok());
        if let Ok(value) = result {
            assert_eq!(value, 42);
        }
    }
}
