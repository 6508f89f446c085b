//! Gaussian conditional densities.
//!
//! A [`GaussianConditional`] represents P(frontal | parents) in square-root
//! information form: `R * x_frontal = d - sum_j A_j * x_parent_j` plus unit
//! Gaussian noise scaled by `sigmas`. Conditionals are produced by the
//! elimination engine with `R` normalized to a unit diagonal, the row scales
//! moved into `sigmas`; the constructors accept any upper-triangular `R` with
//! a nonzero diagonal.

use super::LinAlgError;
use crate::core::{Key, KeySet, VectorValues, format_key};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;
use std::fmt;

/// Conditional density of one frontal variable given its parents
#[derive(Debug, Clone)]
pub struct GaussianConditional {
    frontal: Key,
    r: DMatrix<f64>,
    parents: BTreeMap<Key, DMatrix<f64>>,
    d: DVector<f64>,
    sigmas: DVector<f64>,
}

impl GaussianConditional {
    /// Conditional with no parents: `R * x = d`
    pub fn new(
        frontal: Key,
        d: DVector<f64>,
        r: DMatrix<f64>,
        sigmas: DVector<f64>,
    ) -> Result<Self, LinAlgError> {
        Self::from_parent_map(frontal, d, r, BTreeMap::new(), sigmas)
    }

    /// Conditional with a single parent
    pub fn with_parent(
        frontal: Key,
        d: DVector<f64>,
        r: DMatrix<f64>,
        parent: Key,
        a: DMatrix<f64>,
        sigmas: DVector<f64>,
    ) -> Result<Self, LinAlgError> {
        let mut parents = BTreeMap::new();
        parents.insert(parent, a);
        Self::from_parent_map(frontal, d, r, parents, sigmas)
    }

    /// Conditional with two parents
    #[allow(clippy::too_many_arguments)]
    pub fn with_parents(
        frontal: Key,
        d: DVector<f64>,
        r: DMatrix<f64>,
        parent1: Key,
        a1: DMatrix<f64>,
        parent2: Key,
        a2: DMatrix<f64>,
        sigmas: DVector<f64>,
    ) -> Result<Self, LinAlgError> {
        if parent1 == parent2 {
            return Err(LinAlgError::DuplicateBlock { key: parent1 });
        }
        let mut parents = BTreeMap::new();
        parents.insert(parent1, a1);
        parents.insert(parent2, a2);
        Self::from_parent_map(frontal, d, r, parents, sigmas)
    }

    /// General constructor from a map of parent blocks
    pub fn from_parent_map(
        frontal: Key,
        d: DVector<f64>,
        r: DMatrix<f64>,
        parents: BTreeMap<Key, DMatrix<f64>>,
        sigmas: DVector<f64>,
    ) -> Result<Self, LinAlgError> {
        let dim = r.nrows();
        if r.ncols() != dim {
            return Err(LinAlgError::DimensionMismatch {
                context: "conditional R matrix",
                expected: dim,
                actual: r.ncols(),
            });
        }
        if d.len() != dim {
            return Err(LinAlgError::DimensionMismatch {
                context: "conditional rhs d",
                expected: dim,
                actual: d.len(),
            });
        }
        if sigmas.len() != dim {
            return Err(LinAlgError::DimensionMismatch {
                context: "conditional sigmas",
                expected: dim,
                actual: sigmas.len(),
            });
        }
        for row in 0..dim {
            if sigmas[row] == 0.0 {
                return Err(LinAlgError::ConstrainedNoise { row });
            }
            if sigmas[row] < 0.0 {
                return Err(LinAlgError::InvalidNoise { row });
            }
            if r[(row, row)] == 0.0 {
                return Err(LinAlgError::SingularSystem { key: frontal });
            }
            for col in 0..row {
                if r[(row, col)] != 0.0 {
                    return Err(LinAlgError::UnsupportedShape(
                        "conditional R must be upper triangular".to_string(),
                    ));
                }
            }
        }
        for (&key, block) in &parents {
            if key == frontal {
                return Err(LinAlgError::DuplicateBlock { key });
            }
            if block.nrows() != dim {
                return Err(LinAlgError::DimensionMismatch {
                    context: "conditional parent block rows",
                    expected: dim,
                    actual: block.nrows(),
                });
            }
        }
        Ok(Self {
            frontal,
            r,
            parents,
            d,
            sigmas,
        })
    }

    pub fn frontal(&self) -> Key {
        self.frontal
    }

    /// Dimension of the frontal variable
    pub fn dim(&self) -> usize {
        self.r.nrows()
    }

    pub fn parents(&self) -> KeySet {
        self.parents.keys().copied().collect()
    }

    pub fn parent_block(&self, key: Key) -> Option<&DMatrix<f64>> {
        self.parents.get(&key)
    }

    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }

    pub fn d(&self) -> &DVector<f64> {
        &self.d
    }

    pub fn sigmas(&self) -> &DVector<f64> {
        &self.sigmas
    }

    /// Solve for the frontal variable given parent values.
    ///
    /// Computes `rhs = d - sum_j A_j * x_j` and back-substitutes through `R`.
    /// Every parent must be present in `parents`.
    pub fn solve(&self, parents: &VectorValues) -> Result<DVector<f64>, LinAlgError> {
        let mut rhs = self.d.clone();
        for (&key, block) in &self.parents {
            let x = parents
                .get(key)
                .ok_or(LinAlgError::MissingParent { key })?;
            if x.len() != block.ncols() {
                return Err(LinAlgError::DimensionMismatch {
                    context: "conditional parent value",
                    expected: block.ncols(),
                    actual: x.len(),
                });
            }
            rhs -= block * x;
        }
        self.r
            .solve_upper_triangular(&rhs)
            .ok_or(LinAlgError::SingularSystem { key: self.frontal })
    }

    /// Element-wise comparison within an absolute tolerance.
    ///
    /// Parent blocks are compared by key, so the result does not depend on
    /// any enumeration order.
    pub fn equals(&self, other: &GaussianConditional, tol: f64) -> bool {
        if self.frontal != other.frontal
            || self.dim() != other.dim()
            || self.parents.len() != other.parents.len()
        {
            return false;
        }
        let blocks_match = self.parents.iter().all(|(key, block)| {
            other.parents.get(key).is_some_and(|o| {
                o.shape() == block.shape() && (o - block).amax() <= tol
            })
        });
        blocks_match
            && (&self.r - &other.r).amax() <= tol
            && (&self.d - &other.d).amax() <= tol
            && (&self.sigmas - &other.sigmas).amax() <= tol
    }
}

impl fmt::Display for GaussianConditional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P( {}", format_key(self.frontal))?;
        if !self.parents.is_empty() {
            write!(f, " |")?;
            for &key in self.parents.keys() {
                write!(f, " {}", format_key(key))?;
            }
        }
        writeln!(f, " )")?;
        writeln!(f, "  R: {}", self.r)?;
        for (&key, block) in &self.parents {
            writeln!(f, "  A[{}]: {}", format_key(key), block)?;
        }
        writeln!(f, "  d: {}", self.d.transpose())?;
        write!(f, "  sigmas: {}", self.sigmas.transpose())
    }
}
