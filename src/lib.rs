//! Batch smoother core for concurrent filtering and smoothing on factor
//! graphs: slot-based factor storage, QR elimination into a clique tree,
//! a damped batch optimizer with frozen root variables, and the
//! synchronization protocol that exchanges summaries with a filter.

pub mod core;
pub mod error;
pub mod factors;
pub mod linalg;
pub mod logger;
pub mod optimizer;
pub mod smoother;

pub use crate::core::{FactorStore, Key, KeySet, Values, VectorValues, format_key, symbol};
pub use error::{TandemError, TandemResult};
pub use factors::{BetweenFactor, Factor, PriorFactor};
pub use logger::{init_logger, init_logger_with_level};
pub use optimizer::{LevenbergMarquardt, LevenbergMarquardtConfig};
pub use smoother::{BatchSmoother, SmootherResult, marginalize_keys_from_factor};
