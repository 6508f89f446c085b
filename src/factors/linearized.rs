//! Factors frozen at a linearization point.
//!
//! Summarization produces linear factors that are only valid relative to the
//! values they were linearized at. Wrapping them together with those values
//! turns them back into nonlinear factors: evaluation measures the deviation
//! from the recorded point, and relinearization shifts the right-hand side to
//! a new anchor instead of recomputing any Jacobian.

use crate::core::{Key, Values, VectorValues, format_key};
use crate::error::TandemResult;
use crate::factors::Factor;
use crate::linalg::{InformationFactor, JacobianFactor, LinearFactor};
use std::fmt;

/// Deviation of `values` from the recorded linearization point, per key
fn deviation(
    keys: &[Key],
    lin_points: &Values,
    values: &Values,
) -> TandemResult<VectorValues> {
    let mut delta = VectorValues::new();
    for &key in keys {
        let at = lin_points.try_get(key)?;
        let now = values.try_get(key)?;
        delta.insert(key, now - at)?;
    }
    Ok(delta)
}

/// Capture the entries of `values` this factor anchors to
fn capture(keys: &[Key], values: &Values) -> TandemResult<Values> {
    let mut points = Values::new();
    for &key in keys {
        points.insert(key, values.try_get(key)?.clone())?;
    }
    Ok(points)
}

/// Residual-form linear factor anchored at a linearization point
#[derive(Debug, Clone)]
pub struct LinearizedJacobianFactor {
    factor: JacobianFactor,
    lin_points: Values,
}

impl LinearizedJacobianFactor {
    /// Anchor `factor` at the entries of `values` it touches.
    ///
    /// The factor is whitened up front so evaluation is a plain norm.
    pub fn new(factor: &JacobianFactor, values: &Values) -> TandemResult<Self> {
        let factor = factor.whiten()?;
        let lin_points = capture(factor.keys(), values)?;
        Ok(Self { factor, lin_points })
    }

    pub fn lin_points(&self) -> &Values {
        &self.lin_points
    }

    pub fn jacobian(&self) -> &JacobianFactor {
        &self.factor
    }
}

impl Factor for LinearizedJacobianFactor {
    fn keys(&self) -> &[Key] {
        self.factor.keys()
    }

    fn dim(&self) -> usize {
        self.factor.rows()
    }

    fn error(&self, values: &Values) -> TandemResult<f64> {
        let delta = deviation(self.factor.keys(), &self.lin_points, values)?;
        Ok(self.factor.error(&delta)?)
    }

    fn linearize(&self, values: &Values) -> TandemResult<LinearFactor> {
        let delta = deviation(self.factor.keys(), &self.lin_points, values)?;
        // b' = b - A * delta keeps the model expressed around `values`.
        let shifted = -self.factor.unwhitened_residual(&delta)?;
        let blocks = self
            .factor
            .iter_blocks()
            .map(|(key, block)| (key, block.clone()))
            .collect();
        Ok(LinearFactor::Jacobian(JacobianFactor::whitened(
            blocks, shifted,
        )?))
    }

    fn clone_box(&self) -> Box<dyn Factor> {
        Box::new(self.clone())
    }
}

impl fmt::Display for LinearizedJacobianFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.keys().iter().map(|&k| format_key(k)).collect();
        write!(f, "LinearizedJacobianFactor({})", keys.join(" "))
    }
}

/// Information-form linear factor anchored at a linearization point
#[derive(Debug, Clone)]
pub struct LinearizedInformationFactor {
    factor: InformationFactor,
    lin_points: Values,
}

impl LinearizedInformationFactor {
    pub fn new(factor: &InformationFactor, values: &Values) -> TandemResult<Self> {
        let lin_points = capture(factor.keys(), values)?;
        Ok(Self {
            factor: factor.clone(),
            lin_points,
        })
    }

    pub fn lin_points(&self) -> &Values {
        &self.lin_points
    }

    pub fn information(&self) -> &InformationFactor {
        &self.factor
    }
}

impl Factor for LinearizedInformationFactor {
    fn keys(&self) -> &[Key] {
        self.factor.keys()
    }

    fn dim(&self) -> usize {
        self.factor.total_dim()
    }

    fn error(&self, values: &Values) -> TandemResult<f64> {
        let delta = deviation(self.factor.keys(), &self.lin_points, values)?;
        Ok(self.factor.error(&delta)?)
    }

    fn linearize(&self, values: &Values) -> TandemResult<LinearFactor> {
        let delta = deviation(self.factor.keys(), &self.lin_points, values)?;
        // eta' = eta - lambda * delta, and the constant absorbs the shift.
        let stacked = self.factor.stack(&delta)?;
        let eta = self.factor.eta() - self.factor.lambda() * &stacked;
        let constant = self.factor.error(&delta)?;
        let variables = self.factor.variables().collect();
        Ok(LinearFactor::Information(InformationFactor::new(
            variables,
            self.factor.lambda().clone(),
            eta,
            constant,
        )?))
    }

    fn clone_box(&self) -> Box<dyn Factor> {
        Box::new(self.clone())
    }
}

impl fmt::Display for LinearizedInformationFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.keys().iter().map(|&k| format_key(k)).collect();
        write!(f, "LinearizedInformationFactor({})", keys.join(" "))
    }
}

/// Anchor any linear factor at `values`, preserving its form.
pub fn linearized_factor_from(
    factor: &LinearFactor,
    values: &Values,
) -> TandemResult<Box<dyn Factor>> {
    match factor {
        LinearFactor::Jacobian(jacobian) => {
            Ok(Box::new(LinearizedJacobianFactor::new(jacobian, values)?))
        }
        LinearFactor::Information(information) => Ok(Box::new(
            LinearizedInformationFactor::new(information, values)?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    const TOLERANCE: f64 = 1e-9;

    fn anchor() -> Values {
        let mut v = Values::new();
        v.insert(0, dvector![1.0]).unwrap();
        v.insert(1, dvector![2.0]).unwrap();
        v
    }

    fn sample_jacobian() -> JacobianFactor {
        JacobianFactor::whitened(
            vec![(0, dmatrix![1.0; 0.5]), (1, dmatrix![-1.0; 0.25])],
            dvector![0.1, -0.2],
        )
        .unwrap()
    }

    #[test]
    fn test_error_at_the_anchor_is_the_residual_norm() {
        let factor = LinearizedJacobianFactor::new(&sample_jacobian(), &anchor()).unwrap();
        // delta = 0 at the anchor, so the error is 0.5 * ||b||^2
        let expected = 0.5 * (0.1f64 * 0.1 + 0.2 * 0.2);
        assert!((factor.error(&anchor()).unwrap() - expected).abs() < TOLERANCE);
    }

    #[test]
    fn test_error_tracks_deviation_from_anchor() {
        let factor = LinearizedJacobianFactor::new(&sample_jacobian(), &anchor()).unwrap();
        let mut moved = anchor();
        moved.update(0, dvector![1.5]).unwrap();

        // delta = (0.5, 0); rows of A*delta - b are (0.5 - 0.1, 0.25 + 0.2)
        let expected = 0.5 * (0.4f64 * 0.4 + 0.45 * 0.45);
        assert!((factor.error(&moved).unwrap() - expected).abs() < TOLERANCE);
    }

    #[test]
    fn test_relinearizing_at_the_anchor_is_the_identity() {
        let jacobian = sample_jacobian();
        let factor = LinearizedJacobianFactor::new(&jacobian, &anchor()).unwrap();
        let relinearized = factor.linearize(&anchor()).unwrap();
        match relinearized {
            LinearFactor::Jacobian(j) => assert!(j.equals(&jacobian, TOLERANCE)),
            LinearFactor::Information(_) => panic!("form must be preserved"),
        }
    }

    #[test]
    fn test_relinearized_model_is_exact() {
        let factor = LinearizedJacobianFactor::new(&sample_jacobian(), &anchor()).unwrap();
        let mut moved = anchor();
        moved.update(0, dvector![0.4]).unwrap();
        moved.update(1, dvector![2.6]).unwrap();

        let linear = factor.linearize(&moved).unwrap();
        let mut step = VectorValues::new();
        step.insert(0, dvector![0.3]).unwrap();
        step.insert(1, dvector![-0.2]).unwrap();

        let mut stepped = Values::new();
        stepped.insert(0, dvector![0.7]).unwrap();
        stepped.insert(1, dvector![2.4]).unwrap();

        let predicted = linear.error(&step).unwrap();
        let actual = factor.error(&stepped).unwrap();
        assert!((predicted - actual).abs() < TOLERANCE);
    }

    #[test]
    fn test_information_form_matches_jacobian_form() {
        let jacobian = sample_jacobian();
        // Same quadratic in information form: lambda = A'A, eta = A'b.
        let a = dmatrix![1.0, -1.0; 0.5, 0.25];
        let b = dvector![0.1, -0.2];
        let information = InformationFactor::new(
            vec![(0, 1), (1, 1)],
            a.transpose() * &a,
            a.transpose() * &b,
            0.5 * b.dot(&b),
        )
        .unwrap();

        let lj = LinearizedJacobianFactor::new(&jacobian, &anchor()).unwrap();
        let li = LinearizedInformationFactor::new(&information, &anchor()).unwrap();

        for (x0, x1) in [(1.0, 2.0), (0.2, 2.7), (-1.0, 0.0)] {
            let mut at = Values::new();
            at.insert(0, dvector![x0]).unwrap();
            at.insert(1, dvector![x1]).unwrap();
            let ej = lj.error(&at).unwrap();
            let ei = li.error(&at).unwrap();
            assert!((ej - ei).abs() < TOLERANCE, "({x0}, {x1}): {ej} vs {ei}");
        }
    }

    #[test]
    fn test_dispatch_preserves_the_form() {
        let jacobian = LinearFactor::Jacobian(sample_jacobian());
        let boxed = linearized_factor_from(&jacobian, &anchor()).unwrap();
        assert_eq!(boxed.keys(), [0, 1]);
        assert!(boxed.to_string().starts_with("LinearizedJacobianFactor"));

        let information = InformationFactor::new(
            vec![(0, 1)],
            dmatrix![2.0],
            dvector![1.0],
            0.0,
        )
        .unwrap();
        let boxed = linearized_factor_from(&LinearFactor::Information(information), &anchor())
            .unwrap();
        assert!(boxed.to_string().starts_with("LinearizedInformationFactor"));
    }

    #[test]
    fn test_anchor_requires_values_for_every_key() {
        let mut partial = Values::new();
        partial.insert(0, dvector![1.0]).unwrap();
        assert!(LinearizedJacobianFactor::new(&sample_jacobian(), &partial).is_err());
    }
}
