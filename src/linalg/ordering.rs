//! Elimination orderings.
//!
//! A greedy minimum-degree ordering over the variable adjacency induced by a
//! factor graph, with an optional set of keys forced to the end. Forcing keys
//! last keeps them out of every conditional's frontal position until the rest
//! of the graph has been eliminated, which is what summarization onto those
//! keys requires.

use crate::core::{Key, KeySet};
use std::collections::{BTreeMap, BTreeSet};

/// Order the keys appearing in `factor_keys` for elimination, with every key
/// in `constrained` placed after all others.
///
/// Unconstrained keys are picked greedily by minimum degree in the adjacency
/// graph, with ties broken towards the smaller key. Eliminating a key
/// connects its remaining neighbors, mirroring the fill-in of an actual
/// elimination. Constrained keys follow in ascending order; constrained keys
/// that never appear in a factor are skipped.
pub fn constrained_ordering(factor_keys: &[Vec<Key>], constrained: &KeySet) -> Vec<Key> {
    let mut adjacency: BTreeMap<Key, BTreeSet<Key>> = BTreeMap::new();
    for keys in factor_keys {
        for &key in keys {
            adjacency.entry(key).or_default();
        }
        for &a in keys {
            for &b in keys {
                if a != b {
                    adjacency.entry(a).or_default().insert(b);
                }
            }
        }
    }

    let tail: Vec<Key> = adjacency
        .keys()
        .copied()
        .filter(|k| constrained.contains(k))
        .collect();
    let mut active: BTreeSet<Key> = adjacency
        .keys()
        .copied()
        .filter(|k| !constrained.contains(k))
        .collect();

    let mut ordering = Vec::with_capacity(adjacency.len());
    while let Some(next) = active.iter().copied().min_by_key(|k| {
        let degree = adjacency[k].iter().filter(|n| active.contains(n)).count();
        (degree, *k)
    }) {
        active.remove(&next);
        ordering.push(next);

        // Connect the eliminated key's remaining neighbors.
        let neighbors: Vec<Key> = adjacency[&next]
            .iter()
            .copied()
            .filter(|n| active.contains(n) || constrained.contains(n))
            .collect();
        for &a in &neighbors {
            for &b in &neighbors {
                if a != b {
                    adjacency.entry(a).or_default().insert(b);
                }
            }
        }
    }

    ordering.extend(tail);
    ordering
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyset(keys: &[Key]) -> KeySet {
        keys.iter().copied().collect()
    }

    #[test]
    fn test_orders_every_key_exactly_once() {
        let factors = vec![vec![0, 1], vec![1, 2], vec![2, 3], vec![3]];
        let ordering = constrained_ordering(&factors, &KeySet::new());

        let mut seen: Vec<Key> = ordering.clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_constrained_keys_come_last_in_ascending_order() {
        let factors = vec![vec![0, 1], vec![1, 2], vec![2, 3], vec![3, 4]];
        let ordering = constrained_ordering(&factors, &keyset(&[3, 1]));

        assert_eq!(ordering.len(), 5);
        assert_eq!(&ordering[3..], &[1, 3]);
        assert!(!ordering[..3].contains(&1));
        assert!(!ordering[..3].contains(&3));
    }

    #[test]
    fn test_leaves_eliminated_before_hub() {
        let factors = vec![vec![0, 1], vec![0, 2], vec![0, 3]];
        let ordering = constrained_ordering(&factors, &KeySet::new());
        assert_eq!(ordering, vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_absent_constrained_keys_are_skipped() {
        let factors = vec![vec![0, 1]];
        let ordering = constrained_ordering(&factors, &keyset(&[1, 99]));
        assert_eq!(ordering, vec![0, 1]);
    }

    #[test]
    fn test_empty_graph_yields_empty_ordering() {
        let ordering = constrained_ordering(&[], &keyset(&[5]));
        assert!(ordering.is_empty());
    }
}
