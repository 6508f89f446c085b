//! Clique tree produced by sequential elimination.
//!
//! Eliminating one variable at a time turns a linear factor graph into a
//! directed forest of cliques. Each clique holds the conditional density on
//! its frontal variable plus a cached copy of the marginal factor its
//! elimination produced. The clique whose marginal is consumed by a later
//! elimination becomes a child of the consuming clique, so the cached
//! marginal of any clique summarizes the entire subtree below it. Cliques
//! whose marginal is never consumed are the roots of the forest.

use super::LinAlgError;
use super::conditional::GaussianConditional;
use super::elimination::eliminate_one;
use super::factor::{JacobianFactor, LinearFactor};
use crate::core::{Key, KeySet, VectorValues, format_key};
use std::collections::BTreeMap;
use std::fmt;

/// Index of a clique in its tree's arena
pub type CliqueId = usize;

#[derive(Debug, Clone)]
pub struct Clique {
    conditional: GaussianConditional,
    marginal: Option<JacobianFactor>,
    parent: Option<CliqueId>,
    children: Vec<CliqueId>,
}

impl Clique {
    pub fn frontal(&self) -> Key {
        self.conditional.frontal()
    }

    pub fn conditional(&self) -> &GaussianConditional {
        &self.conditional
    }

    /// The marginal this clique's elimination left on its separator, if any
    pub fn cached_marginal(&self) -> Option<&JacobianFactor> {
        self.marginal.as_ref()
    }

    pub fn parent(&self) -> Option<CliqueId> {
        self.parent
    }

    pub fn children(&self) -> &[CliqueId] {
        &self.children
    }
}

#[derive(Debug, Clone)]
pub struct CliqueTree {
    cliques: Vec<Clique>,
    roots: Vec<CliqueId>,
    index: BTreeMap<Key, CliqueId>,
}

impl CliqueTree {
    /// Eliminate `factors` along `ordering`, building the clique forest.
    ///
    /// Every key of every factor must appear in the ordering. Parent links
    /// follow marginal consumption: when the marginal produced by clique `c`
    /// takes part in a later elimination, that elimination's clique becomes
    /// the parent of `c`.
    pub fn eliminate(
        factors: Vec<LinearFactor>,
        ordering: &[Key],
    ) -> Result<CliqueTree, LinAlgError> {
        let ordered: KeySet = ordering.iter().copied().collect();
        for factor in &factors {
            for &key in factor.keys() {
                if !ordered.contains(&key) {
                    return Err(LinAlgError::UnorderedKey { key });
                }
            }
        }

        // Factors waiting for elimination, each tagged with the clique that
        // produced it (None for the original input factors).
        let mut pending: Vec<(LinearFactor, Option<CliqueId>)> =
            factors.into_iter().map(|f| (f, None)).collect();
        let mut cliques: Vec<Clique> = Vec::with_capacity(ordering.len());
        let mut index: BTreeMap<Key, CliqueId> = BTreeMap::new();

        for &frontal in ordering {
            let (involved, rest): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|(f, _)| f.contains(frontal));
            pending = rest;
            if involved.is_empty() {
                return Err(LinAlgError::SingularSystem { key: frontal });
            }

            let id = cliques.len();
            let mut children: Vec<CliqueId> = Vec::new();
            let mut parts = Vec::with_capacity(involved.len());
            for (factor, origin) in involved {
                if let Some(child) = origin {
                    if !children.contains(&child) {
                        children.push(child);
                    }
                }
                parts.push(factor);
            }

            let (conditional, marginal) = eliminate_one(&parts, frontal)?;
            for &child in &children {
                cliques[child].parent = Some(id);
            }
            if index.insert(frontal, id).is_some() {
                return Err(LinAlgError::DuplicateBlock { key: frontal });
            }
            if let Some(ref m) = marginal {
                pending.push((LinearFactor::Jacobian(m.clone()), Some(id)));
            }
            cliques.push(Clique {
                conditional,
                marginal,
                parent: None,
                children,
            });
        }

        let roots = cliques
            .iter()
            .enumerate()
            .filter(|(_, c)| c.parent.is_none())
            .map(|(id, _)| id)
            .collect();
        Ok(CliqueTree {
            cliques,
            roots,
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.cliques.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cliques.is_empty()
    }

    pub fn clique(&self, id: CliqueId) -> Option<&Clique> {
        self.cliques.get(id)
    }

    /// The clique whose frontal variable is `key`
    pub fn clique_of(&self, key: Key) -> Option<CliqueId> {
        self.index.get(&key).copied()
    }

    pub fn roots(&self) -> &[CliqueId] {
        &self.roots
    }

    pub fn iter(&self) -> impl Iterator<Item = (CliqueId, &Clique)> {
        self.cliques.iter().enumerate()
    }

    /// Back-substitute through the forest, returning the joint maximum.
    ///
    /// Cliques are created children before parents, so walking the arena in
    /// reverse solves every conditional after all of its parents.
    pub fn solve(&self) -> Result<VectorValues, LinAlgError> {
        let mut solution = VectorValues::new();
        for clique in self.cliques.iter().rev() {
            let frontal = clique.conditional.frontal();
            let x = clique.conditional.solve(&solution)?;
            solution
                .insert(frontal, x)
                .map_err(|_| LinAlgError::DuplicateBlock { key: frontal })?;
        }
        Ok(solution)
    }

    fn symbolic(conditional: &GaussianConditional) -> String {
        let parents: Vec<String> = conditional
            .parents()
            .into_iter()
            .map(format_key)
            .collect();
        if parents.is_empty() {
            format!("P( {} )", format_key(conditional.frontal()))
        } else {
            format!(
                "P( {} | {} )",
                format_key(conditional.frontal()),
                parents.join(" ")
            )
        }
    }
}

impl fmt::Display for CliqueTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CliqueTree({} cliques)", self.cliques.len())?;
        let mut stack: Vec<(CliqueId, usize)> =
            self.roots.iter().rev().map(|&id| (id, 0)).collect();
        while let Some((id, depth)) = stack.pop() {
            let clique = &self.cliques[id];
            writeln!(
                f,
                "{:indent$}- {}",
                "",
                Self::symbolic(&clique.conditional),
                indent = depth * 2
            )?;
            for &child in clique.children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        Ok(())
    }
}
