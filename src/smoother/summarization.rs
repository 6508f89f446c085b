//! Summary extraction over the root boundary.
//!
//! After each optimization pass the smoother condenses everything it knows
//! about the root variables into a small set of factors for the filter. The
//! graph is eliminated root-last, so the root cliques sit at the top of the
//! clique tree and their non-root children hold exactly the subtree that
//! will not be re-sent next cycle. The cached marginal of each such child is
//! the message that subtree passes up to the boundary, which makes the
//! extraction cost proportional to the boundary, not the graph.

use crate::core::{FactorStore, Key, KeySet, Values};
use crate::error::TandemResult;
use crate::factors::{Factor, linearized_factor_from};
use crate::linalg::{CliqueId, CliqueTree, LinearFactor, constrained_ordering, eliminate_partial};
use std::collections::BTreeSet;
use tracing::debug;

/// Condense the store's information about the root variables into
/// re-linearizable factors anchored at the current linearization point.
///
/// Root keys that appear in no factor contribute nothing and are skipped.
pub(crate) fn extract_summary(
    store: &FactorStore,
    theta: &Values,
    root_values: &Values,
) -> TandemResult<Vec<Box<dyn Factor>>> {
    let mut linpoint = theta.clone();
    linpoint.merge(root_values)?;
    let roots = root_values.keys();

    // Eliminate the whole graph with the root keys ordered last.
    let factor_keys: Vec<Vec<Key>> = store
        .iter()
        .map(|(_, factor)| factor.keys().to_vec())
        .collect();
    let ordering = constrained_ordering(&factor_keys, &roots);
    let linear = store.linearize(&linpoint)?;
    let tree = CliqueTree::eliminate(linear, &ordering)?;

    // Non-root children of root cliques are the subtrees to condense.
    let mut root_cliques: BTreeSet<CliqueId> = BTreeSet::new();
    for &key in &roots {
        if let Some(id) = tree.clique_of(key) {
            root_cliques.insert(id);
        }
    }
    let mut branches: BTreeSet<CliqueId> = BTreeSet::new();
    for &id in &root_cliques {
        if let Some(clique) = tree.clique(id) {
            for &child in clique.children() {
                if !root_cliques.contains(&child) {
                    branches.insert(child);
                }
            }
        }
    }

    let mut collected: Vec<LinearFactor> = Vec::new();
    for &id in &branches {
        if let Some(clique) = tree.clique(id) {
            if let Some(marginal) = clique.cached_marginal() {
                collected.push(LinearFactor::Jacobian(marginal.clone()));
            }
        }
    }

    // Separator variables outside the root set still have to be eliminated
    // away so the summary is purely over root keys.
    let extra: KeySet = collected
        .iter()
        .flat_map(|factor| factor.keys().iter().copied())
        .filter(|key| !roots.contains(key))
        .collect();
    let survivors = if extra.is_empty() {
        collected
    } else {
        let extra: Vec<Key> = extra.into_iter().collect();
        let (_, remaining) = eliminate_partial(collected, &extra)?;
        remaining
    };

    let mut summary: Vec<Box<dyn Factor>> = Vec::with_capacity(survivors.len());
    for factor in &survivors {
        summary.push(linearized_factor_from(factor, &linpoint)?);
    }
    debug!(
        branches = branches.len(),
        factors = summary.len(),
        "summary extracted"
    );
    Ok(summary)
}
