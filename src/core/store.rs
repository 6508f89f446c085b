//! Slot-indexed factor storage.
//!
//! The smoother refers to factors by their slot number so that a later
//! synchronization can remove exactly the factors it inserted earlier. Removed
//! slots are recycled in FIFO order, and a reverse index from key to slot set
//! supports the queries the synchronization and marginalization logic needs.
//!
//! Index invariant: a key maps to a slot exactly while the factor in that slot
//! involves the key.

use super::{CoreError, Key, KeySet, format_key};
use crate::error::TandemResult;
use crate::factors::Factor;
use crate::linalg::LinearFactor;
use crate::Values;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

/// Factor container with stable slot numbers and key-based lookup
#[derive(Debug, Default)]
pub struct FactorStore {
    slots: Vec<Option<Box<dyn Factor>>>,
    free: VecDeque<usize>,
    index: HashMap<Key, BTreeSet<usize>>,
}

impl FactorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored factors (occupied slots)
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of slots, occupied or not
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Store a factor, reusing the oldest freed slot if one exists.
    ///
    /// Returns the slot number the factor now occupies.
    pub fn insert(&mut self, factor: Box<dyn Factor>) -> usize {
        let slot = match self.free.pop_front() {
            Some(slot) => {
                self.slots[slot] = Some(factor);
                slot
            }
            None => {
                self.slots.push(Some(factor));
                self.slots.len() - 1
            }
        };
        if let Some(factor) = &self.slots[slot] {
            for &key in factor.keys() {
                self.index.entry(key).or_default().insert(slot);
            }
        }
        slot
    }

    /// Remove the factor in `slot`, marking the slot for reuse.
    pub fn remove(&mut self, slot: usize) -> Result<Box<dyn Factor>, CoreError> {
        let factor = self
            .slots
            .get_mut(slot)
            .and_then(Option::take)
            .ok_or(CoreError::EmptySlot { slot })?;
        for &key in factor.keys() {
            if let Some(slots) = self.index.get_mut(&key) {
                slots.remove(&slot);
                if slots.is_empty() {
                    self.index.remove(&key);
                }
            }
        }
        self.free.push_back(slot);
        Ok(factor)
    }

    pub fn get(&self, slot: usize) -> Option<&dyn Factor> {
        self.slots.get(slot).and_then(|f| f.as_deref())
    }

    /// Occupied slots in slot order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &dyn Factor)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, f)| f.as_deref().map(|f| (slot, f)))
    }

    /// Union of the keys of all stored factors
    pub fn keys(&self) -> KeySet {
        self.index.keys().copied().collect()
    }

    /// Slots of factors involving at least one of `keys`
    pub fn factors_with_any(&self, keys: &KeySet) -> BTreeSet<usize> {
        let mut slots = BTreeSet::new();
        for key in keys {
            if let Some(found) = self.index.get(key) {
                slots.extend(found.iter().copied());
            }
        }
        slots
    }

    /// Slots of factors whose keys are all contained in `keys`
    pub fn factors_with_only(&self, keys: &KeySet) -> BTreeSet<usize> {
        self.factors_with_any(keys)
            .into_iter()
            .filter(|&slot| {
                self.get(slot)
                    .is_some_and(|f| f.keys().iter().all(|k| keys.contains(k)))
            })
            .collect()
    }

    /// Sum of factor errors at `values`
    pub fn error(&self, values: &Values) -> TandemResult<f64> {
        let mut total = 0.0;
        for (_, factor) in self.iter() {
            total += factor.error(values)?;
        }
        Ok(total)
    }

    /// Linearize every stored factor at `values`
    pub fn linearize(&self, values: &Values) -> TandemResult<Vec<LinearFactor>> {
        self.iter()
            .map(|(_, factor)| factor.linearize(values))
            .collect()
    }
}

impl fmt::Display for FactorStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "FactorStore with {} factors in {} slots:",
            self.len(),
            self.slot_count()
        )?;
        for (slot, factor) in self.iter() {
            let keys: Vec<String> = factor.keys().iter().map(|&k| format_key(k)).collect();
            writeln!(f, "  slot {}: {} ({})", slot, factor, keys.join(" "))?;
        }
        Ok(())
    }
}
