//! Linear factor forms.
//!
//! The elimination engine and the optimizer consume linear factors in one of
//! two closed forms: residual form ([`JacobianFactor`], `||A*x - b||` with
//! per-row sigmas) or information form ([`InformationFactor`], quadratic in
//! the information matrix). [`LinearFactor`] is the tagged union the rest of
//! the library passes around; any information-form factor converts to
//! residual form through a Cholesky factorization when elimination needs
//! rows.
//!
//! [`LinearCost`] is the restricted single-row cost form `c * x - b`. It is a
//! shape-validated conversion target, not a least-squares factor.

use super::LinAlgError;
use crate::core::{Key, VectorValues, format_key};
use nalgebra::{DMatrix, DVector};
use std::fmt;

const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Residual-form linear factor: `||A * x - b||` with per-row noise sigmas
#[derive(Debug, Clone)]
pub struct JacobianFactor {
    keys: Vec<Key>,
    blocks: Vec<DMatrix<f64>>,
    b: DVector<f64>,
    sigmas: DVector<f64>,
}

impl JacobianFactor {
    pub fn new(
        blocks: Vec<(Key, DMatrix<f64>)>,
        b: DVector<f64>,
        sigmas: DVector<f64>,
    ) -> Result<Self, LinAlgError> {
        if blocks.is_empty() {
            return Err(LinAlgError::UnsupportedShape(
                "a factor must involve at least one variable".to_string(),
            ));
        }
        let rows = b.len();
        if sigmas.len() != rows {
            return Err(LinAlgError::DimensionMismatch {
                context: "factor sigmas",
                expected: rows,
                actual: sigmas.len(),
            });
        }
        for row in 0..rows {
            if sigmas[row] < 0.0 {
                return Err(LinAlgError::InvalidNoise { row });
            }
        }
        let mut keys = Vec::with_capacity(blocks.len());
        let mut matrices = Vec::with_capacity(blocks.len());
        for (key, block) in blocks {
            if keys.contains(&key) {
                return Err(LinAlgError::DuplicateBlock { key });
            }
            if block.nrows() != rows {
                return Err(LinAlgError::DimensionMismatch {
                    context: "factor block rows",
                    expected: rows,
                    actual: block.nrows(),
                });
            }
            keys.push(key);
            matrices.push(block);
        }
        Ok(Self {
            keys,
            blocks: matrices,
            b,
            sigmas,
        })
    }

    /// Residual-form factor with unit sigmas
    pub fn whitened(
        blocks: Vec<(Key, DMatrix<f64>)>,
        b: DVector<f64>,
    ) -> Result<Self, LinAlgError> {
        let sigmas = DVector::from_element(b.len(), 1.0);
        Self::new(blocks, b, sigmas)
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn rows(&self) -> usize {
        self.b.len()
    }

    pub fn b(&self) -> &DVector<f64> {
        &self.b
    }

    pub fn sigmas(&self) -> &DVector<f64> {
        &self.sigmas
    }

    pub fn block(&self, key: Key) -> Option<&DMatrix<f64>> {
        self.keys
            .iter()
            .position(|&k| k == key)
            .map(|i| &self.blocks[i])
    }

    /// Column dimension of `key`'s block
    pub fn dim_of(&self, key: Key) -> Option<usize> {
        self.block(key).map(DMatrix::ncols)
    }

    pub fn iter_blocks(&self) -> impl Iterator<Item = (Key, &DMatrix<f64>)> {
        self.keys.iter().copied().zip(self.blocks.iter())
    }

    /// True if any row carries a zero sigma (a hard constraint)
    pub fn is_constrained(&self) -> bool {
        self.sigmas.iter().any(|&s| s == 0.0)
    }

    /// Scale every row by `1 / sigma`, producing a unit-sigma factor.
    pub fn whiten(&self) -> Result<JacobianFactor, LinAlgError> {
        for row in 0..self.rows() {
            if self.sigmas[row] == 0.0 {
                return Err(LinAlgError::ConstrainedNoise { row });
            }
        }
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for (key, block) in self.iter_blocks() {
            let mut scaled = block.clone();
            for row in 0..scaled.nrows() {
                let w = 1.0 / self.sigmas[row];
                for col in 0..scaled.ncols() {
                    scaled[(row, col)] *= w;
                }
            }
            blocks.push((key, scaled));
        }
        let b = DVector::from_fn(self.b.len(), |row, _| self.b[row] / self.sigmas[row]);
        JacobianFactor::whitened(blocks, b)
    }

    /// Whitened error `0.5 * || (A * x - b) / sigmas ||^2`
    pub fn error(&self, x: &VectorValues) -> Result<f64, LinAlgError> {
        let residual = self.unwhitened_residual(x)?;
        let mut total = 0.0;
        for row in 0..residual.len() {
            if self.sigmas[row] == 0.0 {
                return Err(LinAlgError::ConstrainedNoise { row });
            }
            let w = residual[row] / self.sigmas[row];
            total += w * w;
        }
        Ok(0.5 * total)
    }

    /// `A * x - b` without noise weighting
    pub fn unwhitened_residual(&self, x: &VectorValues) -> Result<DVector<f64>, LinAlgError> {
        let mut residual = -self.b.clone();
        for (key, block) in self.iter_blocks() {
            let value = x
                .get(key)
                .ok_or(LinAlgError::MissingVariable { key })?;
            if value.len() != block.ncols() {
                return Err(LinAlgError::DimensionMismatch {
                    context: "factor variable value",
                    expected: block.ncols(),
                    actual: value.len(),
                });
            }
            residual += block * value;
        }
        Ok(residual)
    }

    /// Element-wise comparison within an absolute tolerance, by key
    pub fn equals(&self, other: &JacobianFactor, tol: f64) -> bool {
        if self.keys.len() != other.keys.len() || self.rows() != other.rows() {
            return false;
        }
        let blocks_match = self.iter_blocks().all(|(key, block)| {
            other.block(key).is_some_and(|o| {
                o.shape() == block.shape() && (o - block).amax() <= tol
            })
        });
        blocks_match
            && (&self.b - &other.b).amax() <= tol
            && (&self.sigmas - &other.sigmas).amax() <= tol
    }
}

impl fmt::Display for JacobianFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.keys.iter().map(|&k| format_key(k)).collect();
        write!(f, "JacobianFactor({} rows on {})", self.rows(), keys.join(" "))
    }
}

/// Information-form linear factor: `0.5 * x' * L * x - eta' * x + c`
#[derive(Debug, Clone)]
pub struct InformationFactor {
    keys: Vec<Key>,
    dims: Vec<usize>,
    lambda: DMatrix<f64>,
    eta: DVector<f64>,
    constant: f64,
}

impl InformationFactor {
    pub fn new(
        variables: Vec<(Key, usize)>,
        lambda: DMatrix<f64>,
        eta: DVector<f64>,
        constant: f64,
    ) -> Result<Self, LinAlgError> {
        if variables.is_empty() {
            return Err(LinAlgError::UnsupportedShape(
                "a factor must involve at least one variable".to_string(),
            ));
        }
        let total: usize = variables.iter().map(|(_, d)| d).sum();
        if lambda.nrows() != total || lambda.ncols() != total {
            return Err(LinAlgError::DimensionMismatch {
                context: "information matrix",
                expected: total,
                actual: lambda.nrows().max(lambda.ncols()),
            });
        }
        if eta.len() != total {
            return Err(LinAlgError::DimensionMismatch {
                context: "information vector",
                expected: total,
                actual: eta.len(),
            });
        }
        if (&lambda - lambda.transpose()).amax() > SYMMETRY_TOLERANCE {
            return Err(LinAlgError::UnsupportedShape(
                "information matrix must be symmetric".to_string(),
            ));
        }
        let mut keys = Vec::with_capacity(variables.len());
        let mut dims = Vec::with_capacity(variables.len());
        for (key, dim) in variables {
            if keys.contains(&key) {
                return Err(LinAlgError::DuplicateBlock { key });
            }
            keys.push(key);
            dims.push(dim);
        }
        Ok(Self {
            keys,
            dims,
            lambda,
            eta,
            constant,
        })
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn dim_of(&self, key: Key) -> Option<usize> {
        self.keys
            .iter()
            .position(|&k| k == key)
            .map(|i| self.dims[i])
    }

    /// Keys and their block dimensions, in block order
    pub fn variables(&self) -> impl Iterator<Item = (Key, usize)> + '_ {
        self.keys.iter().copied().zip(self.dims.iter().copied())
    }

    pub fn total_dim(&self) -> usize {
        self.dims.iter().sum()
    }

    pub fn lambda(&self) -> &DMatrix<f64> {
        &self.lambda
    }

    pub fn eta(&self) -> &DVector<f64> {
        &self.eta
    }

    pub fn constant(&self) -> f64 {
        self.constant
    }

    /// Stack the values of this factor's variables in key-block order
    pub fn stack(&self, x: &VectorValues) -> Result<DVector<f64>, LinAlgError> {
        let mut stacked = DVector::zeros(self.total_dim());
        let mut offset = 0;
        for (i, &key) in self.keys.iter().enumerate() {
            let value = x
                .get(key)
                .ok_or(LinAlgError::MissingVariable { key })?;
            if value.len() != self.dims[i] {
                return Err(LinAlgError::DimensionMismatch {
                    context: "factor variable value",
                    expected: self.dims[i],
                    actual: value.len(),
                });
            }
            stacked.rows_mut(offset, self.dims[i]).copy_from(value);
            offset += self.dims[i];
        }
        Ok(stacked)
    }

    /// `0.5 * x' * lambda * x - eta' * x + constant`
    pub fn error(&self, x: &VectorValues) -> Result<f64, LinAlgError> {
        let stacked = self.stack(x)?;
        let quadratic = (&self.lambda * &stacked).dot(&stacked);
        Ok(0.5 * quadratic - self.eta.dot(&stacked) + self.constant)
    }

    /// Convert to residual form through a Cholesky factorization.
    ///
    /// With `lambda = R' * R` (R upper triangular) the produced factor is
    /// `||R * x - b||` with `b` solving `R' * b = eta`. The constant term is
    /// recomputed from `b`; an indefinite information matrix is an error.
    pub fn to_jacobian(&self) -> Result<JacobianFactor, LinAlgError> {
        let chol = self.lambda.clone().cholesky().ok_or_else(|| {
            LinAlgError::NonPositiveDefinite(
                "information matrix has no Cholesky factorization".to_string(),
            )
        })?;
        let l = chol.l();
        let b = l
            .solve_lower_triangular(&self.eta)
            .ok_or_else(|| {
                LinAlgError::NonPositiveDefinite(
                    "information matrix is rank deficient".to_string(),
                )
            })?;
        let r = l.transpose();

        let mut blocks = Vec::with_capacity(self.keys.len());
        let mut offset = 0;
        for (i, &key) in self.keys.iter().enumerate() {
            let block = r.columns(offset, self.dims[i]).into_owned();
            blocks.push((key, block));
            offset += self.dims[i];
        }
        JacobianFactor::whitened(blocks, b)
    }

    pub fn equals(&self, other: &InformationFactor, tol: f64) -> bool {
        self.keys == other.keys
            && self.dims == other.dims
            && (&self.lambda - &other.lambda).amax() <= tol
            && (&self.eta - &other.eta).amax() <= tol
            && (self.constant - other.constant).abs() <= tol
    }
}

impl fmt::Display for InformationFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.keys.iter().map(|&k| format_key(k)).collect();
        write!(
            f,
            "InformationFactor({} dims on {})",
            self.total_dim(),
            keys.join(" ")
        )
    }
}

/// The two linear factor forms the library works with
#[derive(Debug, Clone)]
pub enum LinearFactor {
    Jacobian(JacobianFactor),
    Information(InformationFactor),
}

impl LinearFactor {
    pub fn keys(&self) -> &[Key] {
        match self {
            LinearFactor::Jacobian(f) => f.keys(),
            LinearFactor::Information(f) => f.keys(),
        }
    }

    pub fn contains(&self, key: Key) -> bool {
        self.keys().contains(&key)
    }

    pub fn dim_of(&self, key: Key) -> Option<usize> {
        match self {
            LinearFactor::Jacobian(f) => f.dim_of(key),
            LinearFactor::Information(f) => f.dim_of(key),
        }
    }

    pub fn error(&self, x: &VectorValues) -> Result<f64, LinAlgError> {
        match self {
            LinearFactor::Jacobian(f) => f.error(x),
            LinearFactor::Information(f) => f.error(x),
        }
    }

    /// Residual form of this factor, converting if necessary
    pub fn to_jacobian(&self) -> Result<JacobianFactor, LinAlgError> {
        match self {
            LinearFactor::Jacobian(f) => Ok(f.clone()),
            LinearFactor::Information(f) => f.to_jacobian(),
        }
    }
}

impl fmt::Display for LinearFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinearFactor::Jacobian(inner) => inner.fmt(f),
            LinearFactor::Information(inner) => inner.fmt(f),
        }
    }
}

/// Restricted single-row linear cost `c * x - b`.
///
/// Unlike a least-squares factor the evaluation is signed and unweighted.
/// Conversion from a [`JacobianFactor`] validates the required shape.
#[derive(Debug, Clone)]
pub struct LinearCost {
    keys: Vec<Key>,
    rows: Vec<DMatrix<f64>>,
    b: f64,
}

impl LinearCost {
    pub fn new(blocks: Vec<(Key, DMatrix<f64>)>) -> Result<Self, LinAlgError> {
        Self::with_offset(blocks, 0.0)
    }

    pub fn with_offset(blocks: Vec<(Key, DMatrix<f64>)>, b: f64) -> Result<Self, LinAlgError> {
        if blocks.is_empty() {
            return Err(LinAlgError::UnsupportedShape(
                "a cost must involve at least one variable".to_string(),
            ));
        }
        let mut keys = Vec::with_capacity(blocks.len());
        let mut rows = Vec::with_capacity(blocks.len());
        for (key, block) in blocks {
            if block.nrows() != 1 {
                return Err(LinAlgError::UnsupportedShape(format!(
                    "a linear cost row must have exactly one row, got {}",
                    block.nrows()
                )));
            }
            if keys.contains(&key) {
                return Err(LinAlgError::DuplicateBlock { key });
            }
            keys.push(key);
            rows.push(block);
        }
        Ok(Self { keys, rows, b })
    }

    /// Convert a single-row unconstrained factor into cost form.
    pub fn try_from_jacobian(factor: &JacobianFactor) -> Result<Self, LinAlgError> {
        if factor.rows() != 1 {
            return Err(LinAlgError::UnsupportedShape(format!(
                "cannot convert a {}-row factor to a linear cost",
                factor.rows()
            )));
        }
        if factor.is_constrained() {
            return Err(LinAlgError::UnsupportedShape(
                "cannot convert a constrained factor to a linear cost".to_string(),
            ));
        }
        let blocks = factor
            .iter_blocks()
            .map(|(key, block)| (key, block.clone()))
            .collect();
        Self::with_offset(blocks, factor.b()[0])
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Signed cost `sum_k c_k * x_k - b`
    pub fn evaluate(&self, x: &VectorValues) -> Result<f64, LinAlgError> {
        let mut total = -self.b;
        for (key, row) in self.keys.iter().copied().zip(self.rows.iter()) {
            let value = x
                .get(key)
                .ok_or(LinAlgError::MissingVariable { key })?;
            if value.len() != row.ncols() {
                return Err(LinAlgError::DimensionMismatch {
                    context: "cost variable value",
                    expected: row.ncols(),
                    actual: value.len(),
                });
            }
            total += (row * value)[0];
        }
        Ok(total)
    }
}

impl fmt::Display for LinearCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.keys.iter().map(|&k| format_key(k)).collect();
        write!(f, "LinearCost({})", keys.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    const TOLERANCE: f64 = 1e-9;

    fn assignment(entries: &[(Key, DVector<f64>)]) -> VectorValues {
        let mut x = VectorValues::new();
        for (key, value) in entries {
            x.insert(*key, value.clone()).unwrap();
        }
        x
    }

    #[test]
    fn test_jacobian_error_matches_manual_computation() {
        let factor = JacobianFactor::new(
            vec![(0, dmatrix![1.0; 0.0]), (1, dmatrix![-1.0; 1.0])],
            dvector![0.5, 1.0],
            dvector![0.5, 2.0],
        )
        .unwrap();
        let x = assignment(&[(0, dvector![1.0]), (1, dvector![2.0])]);

        // residual = A*x - b = [1 - 2 - 0.5, 2 - 1] = [-1.5, 1.0]
        let expected = 0.5 * ((-1.5f64 / 0.5).powi(2) + (1.0f64 / 2.0).powi(2));
        let error = factor.error(&x).unwrap();
        assert!(
            (error - expected).abs() < TOLERANCE,
            "error mismatch: {error} vs {expected}"
        );
    }

    #[test]
    fn test_whiten_produces_unit_sigmas() {
        let factor = JacobianFactor::new(
            vec![(0, dmatrix![2.0; 4.0])],
            dvector![2.0, 8.0],
            dvector![2.0, 4.0],
        )
        .unwrap();
        let whitened = factor.whiten().unwrap();

        assert_eq!(whitened.sigmas(), &dvector![1.0, 1.0]);
        assert!((whitened.block(0).unwrap()[(0, 0)] - 1.0).abs() < TOLERANCE);
        assert!((whitened.block(0).unwrap()[(1, 0)] - 1.0).abs() < TOLERANCE);
        assert!((whitened.b()[1] - 2.0).abs() < TOLERANCE);

        // Whitening must not change the error
        let x = assignment(&[(0, dvector![3.0])]);
        let before = factor.error(&x).unwrap();
        let after = whitened.error(&x).unwrap();
        assert!((before - after).abs() < TOLERANCE);
    }

    #[test]
    fn test_whitening_rejects_zero_sigma() {
        let factor = JacobianFactor::new(
            vec![(0, dmatrix![1.0])],
            dvector![0.0],
            dvector![0.0],
        )
        .unwrap();
        assert!(factor.is_constrained());
        assert!(matches!(
            factor.whiten(),
            Err(LinAlgError::ConstrainedNoise { row: 0 })
        ));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = JacobianFactor::new(
            vec![(3, dmatrix![1.0]), (3, dmatrix![2.0])],
            dvector![0.0],
            dvector![1.0],
        )
        .unwrap_err();
        assert!(matches!(err, LinAlgError::DuplicateBlock { key: 3 }));
    }

    #[test]
    fn test_information_to_jacobian_preserves_quadratic_model() {
        // Build an information factor from a known Jacobian and convert back.
        let a = dmatrix![2.0, 0.3; 0.0, 1.5];
        let b = dvector![1.0, -0.5];
        let lambda = a.transpose() * &a;
        let eta = a.transpose() * &b;
        let constant = 0.5 * b.dot(&b);

        let info = InformationFactor::new(vec![(0, 2)], lambda, eta, constant).unwrap();
        let jacobian = info.to_jacobian().unwrap();

        for point in [dvector![0.0, 0.0], dvector![1.0, -2.0], dvector![0.3, 0.7]] {
            let x = assignment(&[(0, point)]);
            let e_info = info.error(&x).unwrap();
            let e_jac = jacobian.error(&x).unwrap();
            assert!(
                (e_info - e_jac).abs() < TOLERANCE,
                "errors diverge: {e_info} vs {e_jac}"
            );
        }
    }

    #[test]
    fn test_information_conversion_requires_positive_definite() {
        let info = InformationFactor::new(
            vec![(0, 1)],
            dmatrix![-1.0],
            dvector![0.0],
            0.0,
        )
        .unwrap();
        assert!(matches!(
            info.to_jacobian(),
            Err(LinAlgError::NonPositiveDefinite(_))
        ));
    }

    #[test]
    fn test_linear_factor_enum_delegates() {
        let jf = JacobianFactor::whitened(vec![(0, dmatrix![1.0])], dvector![1.0]).unwrap();
        let factor = LinearFactor::Jacobian(jf);
        assert_eq!(factor.keys(), [0]);
        assert!(factor.contains(0));
        assert!(!factor.contains(1));

        let x = assignment(&[(0, dvector![1.0])]);
        assert!(factor.error(&x).unwrap().abs() < TOLERANCE);
        assert_eq!(factor.to_jacobian().unwrap().rows(), 1);
    }

    #[test]
    fn test_linear_cost_accepts_single_row() {
        let factor = JacobianFactor::new(
            vec![(0, dmatrix![2.0, 1.0])],
            dvector![0.5],
            dvector![1.0],
        )
        .unwrap();
        let cost = LinearCost::try_from_jacobian(&factor).unwrap();

        let x = assignment(&[(0, dvector![1.0, 3.0])]);
        let value = cost.evaluate(&x).unwrap();
        assert!(((2.0 + 3.0 - 0.5) - value).abs() < TOLERANCE);
    }

    #[test]
    fn test_linear_cost_rejects_multirow() {
        let factor = JacobianFactor::whitened(
            vec![(0, dmatrix![1.0; 2.0])],
            dvector![0.0, 0.0],
        )
        .unwrap();
        assert!(matches!(
            LinearCost::try_from_jacobian(&factor),
            Err(LinAlgError::UnsupportedShape(_))
        ));
    }

    #[test]
    fn test_linear_cost_rejects_constrained() {
        let factor = JacobianFactor::new(
            vec![(0, dmatrix![1.0])],
            dvector![0.0],
            dvector![0.0],
        )
        .unwrap();
        assert!(matches!(
            LinearCost::try_from_jacobian(&factor),
            Err(LinAlgError::UnsupportedShape(_))
        ));
    }
}
