//! Sparse damped least-squares solves.
//!
//! The batch optimizer assembles one sparse Jacobian per iteration and
//! solves the damped normal system through a sparse QR factorization. The
//! symbolic analysis depends only on the sparsity structure, so it is
//! computed once and reused while the numeric values change from iteration
//! to iteration.

use super::{FaerMatrix, LinAlgError, SparseMatrix};
use faer::linalg::solvers::SolveLstsqCore;
use faer::sparse::Triplet;
use faer::sparse::linalg::solvers::{Qr, SymbolicQr};
use nalgebra::DVector;

/// Sparse QR solver with a cached symbolic factorization.
///
/// The sparsity structure must stay fixed across calls. Create a new solver
/// when the assembled system changes shape or structure.
pub struct SparseQrSolver {
    symbolic: Option<SymbolicQr<usize>>,
}

impl SparseQrSolver {
    pub fn new() -> Self {
        Self { symbolic: None }
    }

    /// Minimize `||A x - b||^2 + lambda ||x||^2`.
    ///
    /// The damping joins the system as `sqrt(lambda)` rows appended below
    /// `A`, so the factorization sees one augmented least-squares problem.
    pub fn solve_damped(
        &mut self,
        rows: usize,
        cols: usize,
        triplets: &[Triplet<usize, usize, f64>],
        b: &DVector<f64>,
        lambda: f64,
    ) -> Result<DVector<f64>, LinAlgError> {
        if b.len() != rows {
            return Err(LinAlgError::DimensionMismatch {
                context: "least-squares right-hand side",
                expected: rows,
                actual: b.len(),
            });
        }
        if !(lambda >= 0.0) {
            return Err(LinAlgError::UnsupportedShape(format!(
                "damping must be non-negative, got {lambda}"
            )));
        }

        let mut augmented = triplets.to_vec();
        let sqrt_lambda = lambda.sqrt();
        for col in 0..cols {
            augmented.push(Triplet::new(rows + col, col, sqrt_lambda));
        }
        let a = SparseMatrix::try_new_from_triplets(rows + cols, cols, &augmented)
            .map_err(|err| LinAlgError::Sparse(format!("{err:?}")))?;

        let symbolic = match &self.symbolic {
            Some(symbolic) => symbolic.clone(),
            None => {
                let symbolic = SymbolicQr::try_new(a.symbolic())
                    .map_err(|err| LinAlgError::Sparse(format!("{err:?}")))?;
                self.symbolic = Some(symbolic.clone());
                symbolic
            }
        };
        let qr = Qr::try_new_with_symbolic(symbolic, a.as_ref())
            .map_err(|err| LinAlgError::Sparse(format!("{err:?}")))?;

        let mut rhs = FaerMatrix::zeros(rows + cols, 1);
        for row in 0..rows {
            rhs[(row, 0)] = b[row];
        }
        qr.solve_lstsq_in_place_with_conj(faer::Conj::No, rhs.as_mut());

        Ok(DVector::from_fn(cols, |row, _| rhs[(row, 0)]))
    }
}

impl Default for SparseQrSolver {
    fn default() -> Self {
        Self::new()
    }
}
