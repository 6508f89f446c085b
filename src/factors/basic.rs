//! Prior and between factors on vector variables.
//!
//! These are the measurement types of a trajectory smoothing problem over
//! `R^n` states: an absolute prior pinning one variable and a relative offset
//! linking two. Both carry a diagonal noise model as per-component sigmas.
//!
//! # Mathematical Background
//!
//! ## Prior Factor
//! ```text
//! r(x) = x - z
//! ```
//! where `z` is the prior value.
//!
//! ## Between Factor
//! ```text
//! r(x_i, x_j) = (x_j - x_i) - z_ij
//! ```
//! where `z_ij` is the measured offset from `x_i` to `x_j`.
//!
//! Linearization divides every row by its sigma, so the produced linear
//! factors carry unit noise.

use crate::core::{CoreError, Key, Values, format_key};
use crate::error::{TandemError, TandemResult};
use crate::factors::Factor;
use crate::linalg::{JacobianFactor, LinearFactor};
use nalgebra::{DMatrix, DVector};
use std::fmt;

fn check_sigmas(sigmas: &DVector<f64>, dim: usize) -> TandemResult<()> {
    if sigmas.len() != dim {
        return Err(TandemError::InvalidInput(format!(
            "expected {} sigmas, got {}",
            dim,
            sigmas.len()
        )));
    }
    if sigmas.iter().any(|&s| s <= 0.0) {
        return Err(TandemError::InvalidInput(
            "sigmas must be strictly positive".to_string(),
        ));
    }
    Ok(())
}

fn checked_value<'a>(values: &'a Values, key: Key, dim: usize) -> TandemResult<&'a DVector<f64>> {
    let value = values.try_get(key)?;
    if value.len() != dim {
        return Err(CoreError::DimensionMismatch {
            key,
            expected: dim,
            actual: value.len(),
        }
        .into());
    }
    Ok(value)
}

/// Absolute measurement pulling one variable toward a fixed value
#[derive(Debug, Clone)]
pub struct PriorFactor {
    key: Key,
    prior: DVector<f64>,
    sigmas: DVector<f64>,
}

impl PriorFactor {
    pub fn new(key: Key, prior: DVector<f64>, sigmas: DVector<f64>) -> TandemResult<Self> {
        check_sigmas(&sigmas, prior.len())?;
        Ok(Self { key, prior, sigmas })
    }

    pub fn prior(&self) -> &DVector<f64> {
        &self.prior
    }

    pub fn sigmas(&self) -> &DVector<f64> {
        &self.sigmas
    }

    /// Unweighted residual `x - z`
    pub fn residual(&self, values: &Values) -> TandemResult<DVector<f64>> {
        let x = checked_value(values, self.key, self.prior.len())?;
        Ok(x - &self.prior)
    }
}

impl Factor for PriorFactor {
    fn keys(&self) -> &[Key] {
        std::slice::from_ref(&self.key)
    }

    fn dim(&self) -> usize {
        self.prior.len()
    }

    fn error(&self, values: &Values) -> TandemResult<f64> {
        let r = self.residual(values)?;
        Ok(0.5 * r.zip_map(&self.sigmas, |ri, si| ri / si).norm_squared())
    }

    fn linearize(&self, values: &Values) -> TandemResult<LinearFactor> {
        let r = self.residual(values)?;
        let dim = self.dim();
        let mut a = DMatrix::zeros(dim, dim);
        for i in 0..dim {
            a[(i, i)] = 1.0 / self.sigmas[i];
        }
        let b = DVector::from_fn(dim, |i, _| -r[i] / self.sigmas[i]);
        let factor = JacobianFactor::whitened(vec![(self.key, a)], b)?;
        Ok(LinearFactor::Jacobian(factor))
    }

    fn clone_box(&self) -> Box<dyn Factor> {
        Box::new(self.clone())
    }
}

impl fmt::Display for PriorFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PriorFactor({})", format_key(self.key))
    }
}

/// Relative offset measurement between two variables
#[derive(Debug, Clone)]
pub struct BetweenFactor {
    keys: [Key; 2],
    measured: DVector<f64>,
    sigmas: DVector<f64>,
}

impl BetweenFactor {
    pub fn new(
        key1: Key,
        key2: Key,
        measured: DVector<f64>,
        sigmas: DVector<f64>,
    ) -> TandemResult<Self> {
        if key1 == key2 {
            return Err(TandemError::InvalidInput(format!(
                "between factor needs two distinct keys, got {} twice",
                format_key(key1)
            )));
        }
        check_sigmas(&sigmas, measured.len())?;
        Ok(Self {
            keys: [key1, key2],
            measured,
            sigmas,
        })
    }

    pub fn measured(&self) -> &DVector<f64> {
        &self.measured
    }

    pub fn sigmas(&self) -> &DVector<f64> {
        &self.sigmas
    }

    /// Unweighted residual `(x_j - x_i) - z`
    pub fn residual(&self, values: &Values) -> TandemResult<DVector<f64>> {
        let dim = self.measured.len();
        let x1 = checked_value(values, self.keys[0], dim)?;
        let x2 = checked_value(values, self.keys[1], dim)?;
        Ok(x2 - x1 - &self.measured)
    }
}

impl Factor for BetweenFactor {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        self.measured.len()
    }

    fn error(&self, values: &Values) -> TandemResult<f64> {
        let r = self.residual(values)?;
        Ok(0.5 * r.zip_map(&self.sigmas, |ri, si| ri / si).norm_squared())
    }

    fn linearize(&self, values: &Values) -> TandemResult<LinearFactor> {
        let r = self.residual(values)?;
        let dim = self.dim();
        let mut a1 = DMatrix::zeros(dim, dim);
        let mut a2 = DMatrix::zeros(dim, dim);
        for i in 0..dim {
            a1[(i, i)] = -1.0 / self.sigmas[i];
            a2[(i, i)] = 1.0 / self.sigmas[i];
        }
        let b = DVector::from_fn(dim, |i, _| -r[i] / self.sigmas[i]);
        let factor =
            JacobianFactor::whitened(vec![(self.keys[0], a1), (self.keys[1], a2)], b)?;
        Ok(LinearFactor::Jacobian(factor))
    }

    fn clone_box(&self) -> Box<dyn Factor> {
        Box::new(self.clone())
    }
}

impl fmt::Display for BetweenFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BetweenFactor({} -> {})",
            format_key(self.keys[0]),
            format_key(self.keys[1])
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VectorValues;
    use nalgebra::dvector;

    const TOLERANCE: f64 = 1e-9;
    const FD_EPSILON: f64 = 1e-6;

    fn values(entries: &[(Key, DVector<f64>)]) -> Values {
        let mut v = Values::new();
        for (key, value) in entries {
            v.insert(*key, value.clone()).unwrap();
        }
        v
    }

    #[test]
    fn test_prior_error_vanishes_at_the_prior() {
        let factor = PriorFactor::new(0, dvector![1.0, -2.0], dvector![0.5, 0.5]).unwrap();
        let v = values(&[(0, dvector![1.0, -2.0])]);
        assert!(factor.error(&v).unwrap().abs() < TOLERANCE);
    }

    #[test]
    fn test_prior_error_is_noise_weighted() {
        let factor = PriorFactor::new(0, dvector![0.0], dvector![0.5]).unwrap();
        let v = values(&[(0, dvector![1.0])]);
        // r = 1, whitened r = 2, error = 0.5 * 4
        assert!((factor.error(&v).unwrap() - 2.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_prior_jacobian_matches_finite_differences() {
        let factor = PriorFactor::new(0, dvector![0.3, -0.1], dvector![1.0, 2.0]).unwrap();
        let x = dvector![0.7, 1.4];

        for j in 0..2 {
            let mut plus = x.clone();
            let mut minus = x.clone();
            plus[j] += FD_EPSILON;
            minus[j] -= FD_EPSILON;
            let r_plus = factor.residual(&values(&[(0, plus)])).unwrap();
            let r_minus = factor.residual(&values(&[(0, minus)])).unwrap();
            let column = (r_plus - r_minus) / (2.0 * FD_EPSILON);
            for i in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (column[i] - expected).abs() < 1e-6,
                    "jacobian entry ({i}, {j}) mismatch: {}",
                    column[i]
                );
            }
        }
    }

    #[test]
    fn test_between_residual_measures_offset() {
        let factor = BetweenFactor::new(0, 1, dvector![2.0], dvector![1.0]).unwrap();
        let v = values(&[(0, dvector![1.0]), (1, dvector![3.0])]);
        assert!(factor.residual(&v).unwrap()[0].abs() < TOLERANCE);
        assert!(factor.error(&v).unwrap().abs() < TOLERANCE);

        let off = values(&[(0, dvector![1.0]), (1, dvector![4.0])]);
        assert!((factor.error(&off).unwrap() - 0.5).abs() < TOLERANCE);
    }

    #[test]
    fn test_linearization_reproduces_error_exactly() {
        // Both factors are affine, so the linear model is exact for any step.
        let prior = PriorFactor::new(0, dvector![0.5], dvector![0.7]).unwrap();
        let between = BetweenFactor::new(0, 1, dvector![1.0], dvector![1.3]).unwrap();
        let at = values(&[(0, dvector![0.2]), (1, dvector![1.9])]);

        let delta0 = dvector![0.37];
        let delta1 = dvector![-0.81];
        let mut delta = VectorValues::new();
        delta.insert(0, delta0.clone()).unwrap();
        delta.insert(1, delta1.clone()).unwrap();

        let stepped = values(&[(0, dvector![0.2] + delta0), (1, dvector![1.9] + delta1)]);

        for factor in [&prior as &dyn Factor, &between as &dyn Factor] {
            let linear = factor.linearize(&at).unwrap();
            let predicted = linear.error(&delta).unwrap();
            let actual = factor.error(&stepped).unwrap();
            assert!(
                (predicted - actual).abs() < TOLERANCE,
                "{factor}: {predicted} vs {actual}"
            );
        }
    }

    #[test]
    fn test_linearization_error_at_zero_step_matches() {
        let factor = BetweenFactor::new(2, 5, dvector![0.3, 0.3], dvector![0.9, 1.1]).unwrap();
        let at = values(&[(2, dvector![0.0, 1.0]), (5, dvector![1.0, 0.5])]);

        let linear = factor.linearize(&at).unwrap();
        let mut zero = VectorValues::new();
        zero.insert(2, dvector![0.0, 0.0]).unwrap();
        zero.insert(5, dvector![0.0, 0.0]).unwrap();

        let nonlinear = factor.error(&at).unwrap();
        let linearized = linear.error(&zero).unwrap();
        assert!((nonlinear - linearized).abs() < TOLERANCE);
    }

    #[test]
    fn test_identical_keys_rejected() {
        let result = BetweenFactor::new(3, 3, dvector![0.0], dvector![1.0]);
        assert!(matches!(result, Err(TandemError::InvalidInput(_))));
    }

    #[test]
    fn test_nonpositive_sigmas_rejected() {
        assert!(PriorFactor::new(0, dvector![0.0], dvector![0.0]).is_err());
        assert!(PriorFactor::new(0, dvector![0.0], dvector![-1.0]).is_err());
        assert!(PriorFactor::new(0, dvector![0.0], dvector![1.0, 1.0]).is_err());
    }

    #[test]
    fn test_missing_value_surfaces_as_error() {
        let factor = PriorFactor::new(9, dvector![0.0], dvector![1.0]).unwrap();
        let empty = Values::new();
        assert!(matches!(
            factor.error(&empty),
            Err(TandemError::Graph(_))
        ));
    }
}
