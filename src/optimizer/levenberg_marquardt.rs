//! Levenberg-Marquardt driver over the factor store.
//!
//! Each outer iteration linearizes the whole graph at the current values,
//! assembles one sparse whitened system and retries the damped solve with
//! growing damping until a step is accepted. Step acceptance follows the
//! gain ratio between actual and predicted error reduction; damping shrinks
//! after good steps and grows after poor ones.
//!
//! Variables listed as frozen receive no columns in the linear system, so a
//! step can never move them. After every accepted step their values are
//! still overwritten from the pinned entries and the error is recomputed at
//! that point, keeping the reported error exactly consistent with the pins.

use crate::core::{FactorStore, Key, KeySet, Values};
use crate::error::TandemResult;
use crate::linalg::{JacobianFactor, SparseQrSolver};
use crate::optimizer::{OptimizationOutcome, OptimizerError};
use faer::sparse::Triplet;
use nalgebra::DVector;
use std::collections::BTreeMap;
use tracing::debug;

/// Tuning knobs of the Levenberg-Marquardt loop
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtConfig {
    /// Cap on accepted iterations
    pub max_iterations: usize,
    /// Stop when the relative error decrease falls at or below this (0 disables)
    pub relative_error_tol: f64,
    /// Stop when the absolute error decrease falls at or below this
    pub absolute_error_tol: f64,
    /// Stop outright when the error itself falls at or below this
    pub error_tol: f64,
    /// Damping at the start of every run
    pub damping_init: f64,
    /// Lower damping bound
    pub damping_min: f64,
    /// Upper damping bound; a rejection at this value aborts the run
    pub damping_max: f64,
    /// Damping growth factor after a poor step
    pub damping_increase_factor: f64,
    /// Damping shrink factor after a good step
    pub damping_decrease_factor: f64,
    /// Gain ratio below which a step is rejected
    pub min_step_quality: f64,
    /// Gain ratio above which damping is decreased
    pub good_step_quality: f64,
}

impl Default for LevenbergMarquardtConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            relative_error_tol: 1e-5,
            absolute_error_tol: 1e-5,
            error_tol: 0.0,
            damping_init: 1e-5,
            damping_min: 1e-12,
            damping_max: 1e12,
            damping_increase_factor: 10.0,
            damping_decrease_factor: 0.3,
            min_step_quality: 0.0,
            good_step_quality: 0.75,
        }
    }
}

impl LevenbergMarquardtConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cap on accepted iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the relative and absolute error-decrease tolerances.
    pub fn with_error_tols(mut self, relative: f64, absolute: f64) -> Self {
        self.relative_error_tol = relative;
        self.absolute_error_tol = absolute;
        self
    }

    /// Set the error floor below which no optimization runs.
    pub fn with_error_tol(mut self, error_tol: f64) -> Self {
        self.error_tol = error_tol;
        self
    }

    /// Set the initial damping parameter.
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping_init = damping;
        self
    }

    /// Set the damping parameter bounds.
    pub fn with_damping_bounds(mut self, min: f64, max: f64) -> Self {
        self.damping_min = min;
        self.damping_max = max;
        self
    }

    /// Set the damping adjustment factors.
    pub fn with_damping_factors(mut self, increase: f64, decrease: f64) -> Self {
        self.damping_increase_factor = increase;
        self.damping_decrease_factor = decrease;
        self
    }

    /// Set the step quality thresholds.
    pub fn with_step_qualities(mut self, min_quality: f64, good_quality: f64) -> Self {
        self.min_step_quality = min_quality;
        self.good_step_quality = good_quality;
        self
    }
}

/// One-shot Levenberg-Marquardt run over a factor store
pub struct LevenbergMarquardt {
    config: LevenbergMarquardtConfig,
    damping: f64,
}

impl LevenbergMarquardt {
    pub fn new(config: LevenbergMarquardtConfig) -> Self {
        let damping = config.damping_init;
        Self { config, damping }
    }

    /// Update damping based on step quality, returning whether to accept
    fn update_damping(&mut self, rho: f64) -> bool {
        if rho > self.config.good_step_quality {
            self.damping =
                (self.damping * self.config.damping_decrease_factor).max(self.config.damping_min);
            true
        } else if rho < self.config.min_step_quality {
            self.damping =
                (self.damping * self.config.damping_increase_factor).min(self.config.damping_max);
            false
        } else {
            true
        }
    }

    /// Gain ratio between actual and predicted error reduction
    fn step_quality(current_error: f64, new_error: f64, predicted_reduction: f64) -> f64 {
        let actual_reduction = current_error - new_error;
        if predicted_reduction.abs() < 1e-15 {
            if actual_reduction > 0.0 { 1.0 } else { 0.0 }
        } else {
            actual_reduction / predicted_reduction
        }
    }

    /// Convergence test between consecutive accepted errors
    fn converged(&self, current_error: f64, new_error: f64) -> bool {
        if new_error <= self.config.error_tol {
            return true;
        }
        let absolute_decrease = current_error - new_error;
        let relative_decrease = absolute_decrease / current_error;
        absolute_decrease <= self.config.absolute_error_tol
            || (self.config.relative_error_tol > 0.0
                && relative_decrease <= self.config.relative_error_tol)
    }

    /// Predicted reduction of the undamped linear model for `step`
    fn predicted_reduction(
        jacobians: &[JacobianFactor],
        layout: &BTreeMap<Key, usize>,
        step: &DVector<f64>,
        b: &DVector<f64>,
    ) -> f64 {
        let mut fitted = 0.0;
        let mut row0 = 0;
        for jacobian in jacobians {
            for r in 0..jacobian.rows() {
                let mut ax = 0.0;
                for (key, block) in jacobian.iter_blocks() {
                    if let Some(&col0) = layout.get(&key) {
                        for c in 0..block.ncols() {
                            ax += block[(r, c)] * step[col0 + c];
                        }
                    }
                }
                let residual = ax - b[row0 + r];
                fitted += residual * residual;
            }
            row0 += jacobian.rows();
        }
        0.5 * b.norm_squared() - 0.5 * fitted
    }

    /// Minimize the store's error starting from `initial`.
    ///
    /// Keys in `frozen` keep their initial values bit for bit. The returned
    /// values cover the same keys as `initial`, frozen entries included.
    pub fn optimize(
        mut self,
        store: &FactorStore,
        initial: &Values,
        frozen: &KeySet,
    ) -> TandemResult<OptimizationOutcome> {
        let mut values = initial.clone();
        let mut error = store.error(&values)?;
        debug!(
            initial_error = error,
            variables = values.len(),
            frozen = frozen.len(),
            "starting optimization"
        );
        if error <= self.config.error_tol {
            return Ok(OptimizationOutcome::converged_at(values, error));
        }

        // Free variables get contiguous column ranges in key order.
        let mut layout: BTreeMap<Key, usize> = BTreeMap::new();
        let mut cols = 0;
        for (key, value) in values.iter() {
            if frozen.contains(&key) {
                continue;
            }
            layout.insert(key, cols);
            cols += value.len();
        }
        if cols == 0 {
            return Ok(OptimizationOutcome::converged_at(values, error));
        }

        // Pins are the initial values of the frozen keys.
        let mut pins = Values::new();
        for &key in frozen {
            if let Some(value) = initial.get(key) {
                pins.insert(key, value.clone())?;
            }
        }

        let mut solver = SparseQrSolver::new();
        let mut iterations = 0;
        loop {
            // Whitened linear system at the current values.
            let mut jacobians = Vec::new();
            let mut rows = 0;
            for factor in store.linearize(&values)? {
                let jacobian = factor.to_jacobian()?.whiten()?;
                rows += jacobian.rows();
                jacobians.push(jacobian);
            }
            let mut triplets: Vec<Triplet<usize, usize, f64>> = Vec::new();
            let mut b = DVector::zeros(rows);
            let mut row0 = 0;
            for jacobian in &jacobians {
                for (key, block) in jacobian.iter_blocks() {
                    if let Some(&col0) = layout.get(&key) {
                        for r in 0..block.nrows() {
                            for c in 0..block.ncols() {
                                triplets.push(Triplet::new(row0 + r, col0 + c, block[(r, c)]));
                            }
                        }
                    }
                }
                for r in 0..jacobian.rows() {
                    b[row0 + r] = jacobian.b()[r];
                }
                row0 += jacobian.rows();
            }

            // Retry the damped solve until a step is accepted or damping
            // tops out.
            let previous_error = error;
            let accepted = loop {
                let step = solver
                    .solve_damped(rows, cols, &triplets, &b, self.damping)
                    .map_err(|err| OptimizerError::LinearSolveFailed(err.to_string()))?;
                let predicted = Self::predicted_reduction(&jacobians, &layout, &step, &b);

                let mut candidate = values.clone();
                for (&key, &col0) in &layout {
                    let current = values.try_get(key)?;
                    let updated = current + &step.rows(col0, current.len());
                    candidate.update(key, updated)?;
                }
                let new_error = store.error(&candidate)?;
                let rho = if new_error.is_finite() {
                    Self::step_quality(error, new_error, predicted)
                } else {
                    f64::NEG_INFINITY
                };

                let at_ceiling = self.damping >= self.config.damping_max;
                if self.update_damping(rho) {
                    values = candidate;
                    error = new_error;
                    break true;
                }
                if at_ceiling {
                    break false;
                }
                debug!(
                    damping = self.damping,
                    rho, new_error, "step rejected, retrying"
                );
            };
            if !accepted {
                debug!(error, "damping reached its ceiling, stopping");
                break;
            }
            iterations += 1;

            // Restore the pinned values exactly and recompute the error at
            // the corrected point.
            if !pins.is_empty() {
                values.update_from(&pins)?;
                error = store.error(&values)?;
            }
            debug!(
                iteration = iterations,
                error,
                damping = self.damping,
                "accepted step"
            );

            if iterations >= self.config.max_iterations || self.converged(previous_error, error) {
                break;
            }
        }

        debug!(final_error = error, iterations, "optimization finished");
        Ok(OptimizationOutcome {
            values,
            error,
            iterations,
        })
    }
}
