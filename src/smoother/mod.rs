//! Batch smoother half of a concurrent filter/smoother pair.
//!
//! The smoother owns a factor graph over the "old" variables and a pinned
//! set of root values shared with the filter. `update` folds in new factors
//! and values and re-optimizes; `synchronize` exchanges factors and values
//! with the filter through an externally serialized protocol; the outgoing
//! summary computed by each `update` is served by `summarized_factors`.
//!
//! All calls run to completion on the caller's thread. The smoother never
//! moves a root variable: during optimization root keys are frozen at their
//! pinned values, and after optimization they are absent from the exported
//! estimate.

pub mod marginalization;
pub mod summarization;

pub use marginalization::marginalize_keys_from_factor;

use crate::core::{FactorStore, Values};
use crate::error::TandemResult;
use crate::factors::Factor;
use crate::optimizer::{LevenbergMarquardt, LevenbergMarquardtConfig};
use std::fmt;
use tracing::{debug, info};

/// Counters and final error of one `update` cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmootherResult {
    /// Accepted optimizer iterations
    pub iterations: usize,
    /// Graph error at the returned estimate
    pub error: f64,
    /// Variables the optimizer was free to move
    pub nonlinear_variables: usize,
    /// Root variables held at their pinned values
    pub linear_variables: usize,
}

#[derive(Debug, Default)]
pub struct BatchSmoother {
    factors: FactorStore,
    theta: Values,
    root_values: Values,
    filter_summary_slots: Vec<usize>,
    summary: Vec<Box<dyn Factor>>,
    config: LevenbergMarquardtConfig,
}

impl BatchSmoother {
    pub fn new() -> Self {
        Self::with_config(LevenbergMarquardtConfig::default())
    }

    pub fn with_config(config: LevenbergMarquardtConfig) -> Self {
        Self {
            factors: FactorStore::new(),
            theta: Values::new(),
            root_values: Values::new(),
            filter_summary_slots: Vec::new(),
            summary: Vec::new(),
            config,
        }
    }

    /// Factor graph currently held by the smoother
    pub fn factors(&self) -> &FactorStore {
        &self.factors
    }

    /// Current estimate; root variables are never part of it
    pub fn estimate(&self) -> &Values {
        &self.theta
    }

    /// Pinned linearization points of the root variables
    pub fn root_values(&self) -> &Values {
        &self.root_values
    }

    /// Fold new factors and values into the graph and re-optimize.
    ///
    /// New values must be for keys the smoother has not seen. With a
    /// non-empty graph the optimizer runs at the combined linearization
    /// point (estimate plus root pins) with every root key frozen; the
    /// outgoing summary is then recomputed whenever roots are pinned.
    /// An empty graph skips both phases and reports zeroed counters.
    pub fn update(
        &mut self,
        new_factors: Vec<Box<dyn Factor>>,
        new_values: Values,
    ) -> TandemResult<SmootherResult> {
        info!(
            factors = new_factors.len(),
            values = new_values.len(),
            "smoother update"
        );
        for factor in new_factors {
            self.factors.insert(factor);
        }
        self.theta.merge(&new_values)?;

        let mut result = SmootherResult::default();
        if !self.factors.is_empty() {
            result = self.optimize()?;
        }
        if !self.root_values.is_empty() {
            self.summary =
                summarization::extract_summary(&self.factors, &self.theta, &self.root_values)?;
            debug!(factors = self.summary.len(), "outgoing summary refreshed");
        }
        Ok(result)
    }

    fn optimize(&mut self) -> TandemResult<SmootherResult> {
        let mut linpoint = self.theta.clone();
        linpoint.merge(&self.root_values)?;
        let frozen = self.root_values.keys();

        let outcome = LevenbergMarquardt::new(self.config.clone()).optimize(
            &self.factors,
            &linpoint,
            &frozen,
        )?;

        // Root entries belong to the filter and are not exported.
        let mut values = outcome.values;
        for &key in &frozen {
            values.remove(key)?;
        }
        self.theta = values;

        Ok(SmootherResult {
            iterations: outcome.iterations,
            error: outcome.error,
            nonlinear_variables: self.theta.len(),
            linear_variables: self.root_values.len(),
        })
    }

    /// Hook called before an exchange; must not mutate filter-visible state.
    pub fn presync(&mut self) {
        debug!("smoother presync");
    }

    /// Apply one exchange from the filter.
    ///
    /// The previous filter summary leaves the graph slot by slot, the new
    /// one takes its place, handed-over factors and values join the
    /// smoother's own, and the root set is replaced wholesale.
    pub fn synchronize(
        &mut self,
        smoother_factors: Vec<Box<dyn Factor>>,
        smoother_values: Values,
        filter_summary: Vec<Box<dyn Factor>>,
        root_values: Values,
    ) -> TandemResult<()> {
        info!(
            handed_over = smoother_factors.len(),
            summary = filter_summary.len(),
            roots = root_values.len(),
            "smoother synchronize"
        );
        for slot in self.filter_summary_slots.drain(..) {
            self.factors.remove(slot)?;
        }
        self.filter_summary_slots = filter_summary
            .into_iter()
            .map(|factor| self.factors.insert(factor))
            .collect();
        for factor in smoother_factors {
            self.factors.insert(factor);
        }
        self.theta.merge(&smoother_values)?;
        self.root_values = root_values;
        Ok(())
    }

    /// Hook called after an exchange completes.
    pub fn postsync(&mut self) {
        debug!("smoother postsync");
    }

    /// Most recent outgoing summary; stable between updates.
    pub fn summarized_factors(&self) -> Vec<Box<dyn Factor>> {
        self.summary.clone()
    }
}

impl fmt::Display for BatchSmoother {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BatchSmoother:")?;
        write!(f, "{}", self.factors)?;
        write!(f, "estimate: {}", self.theta)?;
        write!(f, "root values: {}", self.root_values)
    }
}
