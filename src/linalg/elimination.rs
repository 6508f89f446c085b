//! Dense QR elimination of linear factors.
//!
//! [`eliminate_one`] removes a single frontal variable from a set of linear
//! factors, producing the conditional density on that variable and the
//! marginal factor left on its separator. [`eliminate_partial`] drives the
//! single-variable step over an ordered subset of keys while passing factors
//! that never touch those keys through unchanged.

use super::LinAlgError;
use super::conditional::GaussianConditional;
use super::factor::{JacobianFactor, LinearFactor};
use crate::core::Key;
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

/// Diagonal entries of the triangular factor at or below this magnitude mean
/// the frontal variable is not fully constrained by its factors.
pub const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Eliminate `frontal` from the given factors.
///
/// Every factor is whitened and its rows stacked into one dense augmented
/// system with the frontal columns first and the separator columns in key
/// order. A QR factorization splits the system into the conditional
/// `P(frontal | separator)` and the marginal factor on the separator keys.
/// The marginal is `None` when the separator is empty or no rows remain for
/// it.
///
/// Fails with [`LinAlgError::SingularSystem`] when the factors do not
/// constrain all components of the frontal variable.
pub fn eliminate_one(
    factors: &[LinearFactor],
    frontal: Key,
) -> Result<(GaussianConditional, Option<JacobianFactor>), LinAlgError> {
    let mut whitened = Vec::with_capacity(factors.len());
    for factor in factors {
        whitened.push(factor.to_jacobian()?.whiten()?);
    }

    // Gather variable dimensions, checking that factors agree on them.
    let mut dims: BTreeMap<Key, usize> = BTreeMap::new();
    for factor in &whitened {
        for (key, block) in factor.iter_blocks() {
            match dims.get(&key) {
                Some(&dim) if dim != block.ncols() => {
                    return Err(LinAlgError::DimensionMismatch {
                        context: "variable dimension",
                        expected: dim,
                        actual: block.ncols(),
                    });
                }
                _ => {
                    dims.insert(key, block.ncols());
                }
            }
        }
    }
    let frontal_dim = *dims
        .get(&frontal)
        .ok_or(LinAlgError::SingularSystem { key: frontal })?;
    let separator: Vec<Key> = dims.keys().copied().filter(|&k| k != frontal).collect();

    // Column layout: frontal first, then separator keys in ascending order.
    let mut offsets: BTreeMap<Key, usize> = BTreeMap::new();
    offsets.insert(frontal, 0);
    let mut total_cols = frontal_dim;
    for &key in &separator {
        offsets.insert(key, total_cols);
        total_cols += dims[&key];
    }

    let total_rows: usize = whitened.iter().map(JacobianFactor::rows).sum();
    if total_rows < frontal_dim {
        return Err(LinAlgError::SingularSystem { key: frontal });
    }

    // Stack the whitened rows into the augmented matrix [A | b].
    let mut aug = DMatrix::zeros(total_rows, total_cols + 1);
    let mut row = 0;
    for factor in &whitened {
        for (key, block) in factor.iter_blocks() {
            aug.view_mut((row, offsets[&key]), (factor.rows(), block.ncols()))
                .copy_from(block);
        }
        aug.view_mut((row, total_cols), (factor.rows(), 1))
            .copy_from(factor.b());
        row += factor.rows();
    }

    let r = aug.qr().r();

    // The first frontal_dim rows become the conditional. Each row is divided
    // by its diagonal entry so the triangular block carries a unit diagonal
    // and the magnitude moves into the sigmas.
    let mut sigmas = DVector::zeros(frontal_dim);
    let mut r_block = DMatrix::zeros(frontal_dim, frontal_dim);
    let mut d = DVector::zeros(frontal_dim);
    let mut parent_blocks: BTreeMap<Key, DMatrix<f64>> = separator
        .iter()
        .map(|&key| (key, DMatrix::zeros(frontal_dim, dims[&key])))
        .collect();
    for i in 0..frontal_dim {
        let diag = r[(i, i)];
        if diag.abs() <= SINGULAR_TOLERANCE {
            return Err(LinAlgError::SingularSystem { key: frontal });
        }
        sigmas[i] = 1.0 / diag.abs();
        for j in 0..frontal_dim {
            r_block[(i, j)] = r[(i, j)] / diag;
        }
        for (&key, block) in parent_blocks.iter_mut() {
            let offset = offsets[&key];
            for j in 0..block.ncols() {
                block[(i, j)] = r[(i, offset + j)] / diag;
            }
        }
        d[i] = r[(i, total_cols)] / diag;
    }
    let conditional =
        GaussianConditional::from_parent_map(frontal, d, r_block, parent_blocks, sigmas)?;

    // Rows past the frontal block carry the marginal on the separator. Rows
    // at or past column count are pure constants and are dropped.
    let marginal_rows_end = r.nrows().min(total_cols);
    let marginal = if separator.is_empty() || marginal_rows_end <= frontal_dim {
        None
    } else {
        let nrows = marginal_rows_end - frontal_dim;
        let blocks: Vec<(Key, DMatrix<f64>)> = separator
            .iter()
            .map(|&key| {
                let view = r.view((frontal_dim, offsets[&key]), (nrows, dims[&key]));
                (key, view.into_owned())
            })
            .collect();
        let b = DVector::from_fn(nrows, |i, _| r[(frontal_dim + i, total_cols)]);
        Some(JacobianFactor::whitened(blocks, b)?)
    };

    Ok((conditional, marginal))
}

/// Eliminate `keys` in order from `factors`.
///
/// Factors that touch the current frontal key are pulled from the pool and
/// eliminated together; the resulting marginal rejoins the pool. Factors
/// that never touch any eliminated key pass through in their original form.
/// Returns the conditionals in elimination order together with the remaining
/// factors.
pub fn eliminate_partial(
    factors: Vec<LinearFactor>,
    keys: &[Key],
) -> Result<(Vec<GaussianConditional>, Vec<LinearFactor>), LinAlgError> {
    let mut pool = factors;
    let mut conditionals = Vec::with_capacity(keys.len());
    for &frontal in keys {
        let (involved, rest): (Vec<_>, Vec<_>) =
            pool.into_iter().partition(|f| f.contains(frontal));
        pool = rest;
        if involved.is_empty() {
            return Err(LinAlgError::SingularSystem { key: frontal });
        }
        let (conditional, marginal) = eliminate_one(&involved, frontal)?;
        conditionals.push(conditional);
        if let Some(marginal) = marginal {
            pool.push(LinearFactor::Jacobian(marginal));
        }
    }
    Ok((conditionals, pool))
}
