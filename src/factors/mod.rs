//! Nonlinear factor types.
//!
//! A factor measures some subset of the variables and scores a candidate
//! assignment through a noise-weighted residual. The smoother stores factors
//! as trait objects and only ever talks to them through [`Factor`], so new
//! measurement types plug in without touching the optimization machinery.
//!
//! # Module Structure
//!
//! - `basic`: unary priors and binary offset measurements on vector variables
//! - `linearized`: factors frozen at a linearization point, used to carry
//!   summarized information between estimators

use crate::core::{Key, Values};
use crate::error::TandemResult;
use crate::linalg::LinearFactor;
use std::fmt;

pub mod basic;
pub mod linearized;

pub use basic::{BetweenFactor, PriorFactor};
pub use linearized::{
    LinearizedInformationFactor, LinearizedJacobianFactor, linearized_factor_from,
};

/// Interface every nonlinear factor exposes to the smoother.
///
/// `error` and `linearize` must agree: the error of the linearization at the
/// linearization point equals the nonlinear error there.
pub trait Factor: fmt::Debug + fmt::Display + Send + Sync {
    /// Keys of the variables this factor measures
    fn keys(&self) -> &[Key];

    /// Residual dimension
    fn dim(&self) -> usize;

    /// Noise-weighted error `0.5 * ||r / sigmas||^2` at `values`
    fn error(&self, values: &Values) -> TandemResult<f64>;

    /// Linear approximation of this factor at `values`
    fn linearize(&self, values: &Values) -> TandemResult<LinearFactor>;

    /// Clone into a new boxed trait object
    fn clone_box(&self) -> Box<dyn Factor>;
}

impl Clone for Box<dyn Factor> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
