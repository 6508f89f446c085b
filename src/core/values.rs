//! Value containers.
//!
//! [`Values`] holds the nonlinear estimate: one vector per variable key. The
//! smoother treats it as the linearization point of the graph. [`VectorValues`]
//! is the same shape used for linear quantities: solutions of triangular
//! systems and update deltas.
//!
//! Both containers are backed by a `BTreeMap` so every iteration order in the
//! library is deterministic.

use super::{CoreError, Key, KeySet, format_key};
use nalgebra::DVector;
use std::collections::BTreeMap;
use std::fmt;

/// Nonlinear estimate: an assignment of a vector value to each variable
#[derive(Debug, Clone, Default)]
pub struct Values {
    map: BTreeMap<Key, DVector<f64>>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, key: Key) -> bool {
        self.map.contains_key(&key)
    }

    /// Total dimension over all variables
    pub fn dim(&self) -> usize {
        self.map.values().map(DVector::len).sum()
    }

    /// Insert a new variable. Inserting an existing key is an error.
    pub fn insert(&mut self, key: Key, value: DVector<f64>) -> Result<(), CoreError> {
        if self.map.contains_key(&key) {
            return Err(CoreError::DuplicateKey { key });
        }
        self.map.insert(key, value);
        Ok(())
    }

    /// Overwrite an existing variable. The key must be present and the new
    /// value must have the same dimension.
    pub fn update(&mut self, key: Key, value: DVector<f64>) -> Result<(), CoreError> {
        match self.map.get_mut(&key) {
            Some(existing) => {
                if existing.len() != value.len() {
                    return Err(CoreError::DimensionMismatch {
                        key,
                        expected: existing.len(),
                        actual: value.len(),
                    });
                }
                *existing = value;
                Ok(())
            }
            None => Err(CoreError::MissingKey { key }),
        }
    }

    /// Insert every entry of `other`. Any key already present is an error.
    pub fn merge(&mut self, other: &Values) -> Result<(), CoreError> {
        for (&key, value) in &other.map {
            self.insert(key, value.clone())?;
        }
        Ok(())
    }

    /// Overwrite every entry named by `other`. Any key not present is an error.
    pub fn update_from(&mut self, other: &Values) -> Result<(), CoreError> {
        for (&key, value) in &other.map {
            self.update(key, value.clone())?;
        }
        Ok(())
    }

    /// Remove a variable, returning its value
    pub fn remove(&mut self, key: Key) -> Result<DVector<f64>, CoreError> {
        self.map.remove(&key).ok_or(CoreError::MissingKey { key })
    }

    pub fn get(&self, key: Key) -> Option<&DVector<f64>> {
        self.map.get(&key)
    }

    pub fn try_get(&self, key: Key) -> Result<&DVector<f64>, CoreError> {
        self.map.get(&key).ok_or(CoreError::MissingKey { key })
    }

    pub fn keys(&self) -> KeySet {
        self.map.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &DVector<f64>)> {
        self.map.iter().map(|(&k, v)| (k, v))
    }

    /// Element-wise comparison within an absolute tolerance
    pub fn equals(&self, other: &Values, tol: f64) -> bool {
        if self.map.len() != other.map.len() {
            return false;
        }
        self.map.iter().all(|(key, value)| {
            other.map.get(key).is_some_and(|o| {
                o.len() == value.len() && (o - value).amax() <= tol
            })
        })
    }
}

impl fmt::Display for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Values with {} entries:", self.map.len())?;
        for (&key, value) in &self.map {
            writeln!(f, "  {}: {}", format_key(key), fmt_vector(value))?;
        }
        Ok(())
    }
}

/// Linear assignment: solutions and deltas, one vector per key
#[derive(Debug, Clone, Default)]
pub struct VectorValues {
    map: BTreeMap<Key, DVector<f64>>,
}

impl VectorValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, key: Key) -> bool {
        self.map.contains_key(&key)
    }

    pub fn insert(&mut self, key: Key, value: DVector<f64>) -> Result<(), CoreError> {
        if self.map.contains_key(&key) {
            return Err(CoreError::DuplicateKey { key });
        }
        self.map.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: Key) -> Option<&DVector<f64>> {
        self.map.get(&key)
    }

    pub fn try_get(&self, key: Key) -> Result<&DVector<f64>, CoreError> {
        self.map.get(&key).ok_or(CoreError::MissingKey { key })
    }

    pub fn keys(&self) -> KeySet {
        self.map.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &DVector<f64>)> {
        self.map.iter().map(|(&k, v)| (k, v))
    }
}

impl fmt::Display for VectorValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "VectorValues with {} entries:", self.map.len())?;
        for (&key, value) in &self.map {
            writeln!(f, "  {}: {}", format_key(key), fmt_vector(value))?;
        }
        Ok(())
    }
}

fn fmt_vector(v: &DVector<f64>) -> String {
    let entries: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", entries.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let mut values = Values::new();
        values.insert(1, dvector![1.0]).unwrap();
        let err = values.insert(1, dvector![2.0]).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey { key: 1 }));
        assert_eq!(values.get(1).unwrap()[0], 1.0);
    }

    #[test]
    fn test_update_requires_existing_key() {
        let mut values = Values::new();
        let err = values.update(5, dvector![0.0]).unwrap_err();
        assert!(matches!(err, CoreError::MissingKey { key: 5 }));

        values.insert(5, dvector![1.0, 2.0]).unwrap();
        values.update(5, dvector![3.0, 4.0]).unwrap();
        assert_eq!(values.get(5).unwrap()[1], 4.0);
    }

    #[test]
    fn test_update_checks_dimension() {
        let mut values = Values::new();
        values.insert(2, dvector![1.0, 2.0]).unwrap();
        let err = values.update(2, dvector![1.0]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::DimensionMismatch {
                key: 2,
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_merge_and_update_from() {
        let mut a = Values::new();
        a.insert(1, dvector![1.0]).unwrap();
        let mut b = Values::new();
        b.insert(2, dvector![2.0]).unwrap();

        a.merge(&b).unwrap();
        assert_eq!(a.len(), 2);
        assert!(a.merge(&b).is_err());

        let mut pins = Values::new();
        pins.insert(2, dvector![9.0]).unwrap();
        a.update_from(&pins).unwrap();
        assert_eq!(a.get(2).unwrap()[0], 9.0);
    }

    #[test]
    fn test_dim_sums_all_variables() {
        let mut values = Values::new();
        values.insert(1, dvector![1.0, 2.0]).unwrap();
        values.insert(2, dvector![3.0]).unwrap();
        assert_eq!(values.dim(), 3);
    }

    #[test]
    fn test_equals_within_tolerance() {
        let mut a = Values::new();
        a.insert(1, dvector![1.0]).unwrap();
        let mut b = Values::new();
        b.insert(1, dvector![1.0 + 1e-12]).unwrap();
        assert!(a.equals(&b, 1e-9));
        assert!(!a.equals(&b, 1e-15));
    }
}
