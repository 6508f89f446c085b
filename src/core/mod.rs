//! Core data types shared across the library.
//!
//! This module contains the variable key type, the nonlinear and linear value
//! containers, and the slot-indexed factor store that the smoother maintains
//! its graph in.

pub mod key;
pub mod store;
pub mod values;

pub use key::{Key, KeySet, format_key, symbol};
pub use store::FactorStore;
pub use values::{Values, VectorValues};

use thiserror::Error;

/// Errors raised by the core containers
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A value was inserted under a key that is already present
    #[error("key {key} is already present")]
    DuplicateKey { key: Key },

    /// A value was requested or updated under a key that is not present
    #[error("key {key} is not present")]
    MissingKey { key: Key },

    /// A factor slot was addressed but holds no factor
    #[error("factor slot {slot} is empty")]
    EmptySlot { slot: usize },

    /// A value did not have the dimension an operation required
    #[error("dimension mismatch for key {key}: expected {expected}, got {actual}")]
    DimensionMismatch {
        key: Key,
        expected: usize,
        actual: usize,
    },
}
