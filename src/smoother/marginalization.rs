//! Marginalization of individual factors onto a retained key set.

use crate::core::{Key, KeySet, Values};
use crate::error::TandemResult;
use crate::factors::{Factor, linearized_factor_from};
use crate::linalg::{LinearFactor, eliminate_one};

/// Project a factor onto `keys_to_keep` by eliminating every other key.
///
/// The factor is linearized at `values`, the discarded keys are eliminated
/// first, and the residual factor comes back re-linearizable and anchored at
/// the same point. A factor whose keys are all retained is returned as a
/// plain clone. A factor whose keys are all discarded carries no information
/// about the retained set, so no factor is produced; the same happens when
/// elimination consumes every row. The conditionals over the discarded keys
/// are dropped.
pub fn marginalize_keys_from_factor(
    factor: &dyn Factor,
    keys_to_keep: &KeySet,
    values: &Values,
) -> TandemResult<Option<Box<dyn Factor>>> {
    let discarded: Vec<Key> = factor
        .keys()
        .iter()
        .copied()
        .filter(|key| !keys_to_keep.contains(key))
        .collect();
    if discarded.is_empty() {
        return Ok(Some(factor.clone_box()));
    }
    if discarded.len() == factor.keys().len() {
        return Ok(None);
    }

    // Eliminate the discarded keys one after another. Each step leaves at
    // most one marginal; once a step consumes the remaining rows there is
    // nothing left to say about the retained keys.
    let mut residual = factor.linearize(values)?;
    for &key in &discarded {
        let (_, marginal) = eliminate_one(std::slice::from_ref(&residual), key)?;
        match marginal {
            Some(marginal) => residual = LinearFactor::Jacobian(marginal),
            None => return Ok(None),
        }
    }
    Ok(Some(linearized_factor_from(&residual, values)?))
}
