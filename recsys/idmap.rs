//! # Identifier Remapping
//!
//! Bidirectional mapping between caller-supplied identifiers and the dense internal
//! indices `0..n` that parameter arrays are addressed by. Indices are handed out in
//! first-seen order, so the same ingestion order always yields the same mapping.

use ahash::AHashMap;
use std::fmt::Display;
use std::hash::Hash;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdMapError {
    #[error("External identifier {0} was never registered for this object type.")]
    KeyNotFound(String),

    #[error("Internal index {index} is out of range; this object type has {len} objects.")]
    IndexOutOfRange { index: usize, len: usize },
}

/// A bijection between external identifiers and `0..len()`.
///
/// Immutable once built: there is no way to register further identifiers.
#[derive(Debug, Clone)]
pub struct IdentifierMap<E> {
    to_internal: AHashMap<E, usize>,
    to_external: Vec<E>,
}

impl<E> IdentifierMap<E>
where
    E: Eq + Hash + Clone + Display,
{
    /// Enumerates `ids`, assigning each distinct value the next unused index.
    /// Repeated values keep the index of their first occurrence.
    pub fn build<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = E>,
    {
        let mut to_internal = AHashMap::new();
        let mut to_external = Vec::new();
        for id in ids {
            if !to_internal.contains_key(&id) {
                to_internal.insert(id.clone(), to_external.len());
                to_external.push(id);
            }
        }
        Self {
            to_internal,
            to_external,
        }
    }

    pub fn to_internal(&self, id: &E) -> Result<usize, IdMapError> {
        self.resolve(id)
            .ok_or_else(|| IdMapError::KeyNotFound(id.to_string()))
    }

    pub fn to_external(&self, index: usize) -> Result<&E, IdMapError> {
        self.to_external
            .get(index)
            .ok_or(IdMapError::IndexOutOfRange {
                index,
                len: self.to_external.len(),
            })
    }

    /// Tagged lookup: `None` for identifiers that were never registered.
    pub fn resolve(&self, id: &E) -> Option<usize> {
        self.to_internal.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.to_external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_external.is_empty()
    }

    /// External identifiers in internal-index order.
    pub fn external_ids(&self) -> &[E] {
        &self.to_external
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_first_seen_order() {
        let map = IdentifierMap::build(vec!["b", "a", "b", "c", "a"]);
        assert_eq!(map.len(), 3);
        assert_eq!(map.to_internal(&"b"), Ok(0));
        assert_eq!(map.to_internal(&"a"), Ok(1));
        assert_eq!(map.to_internal(&"c"), Ok(2));
        assert_eq!(map.external_ids(), &["b", "a", "c"]);
    }

    #[test]
    fn round_trips_in_both_directions() {
        let ids = vec![10_i64, 7, 42, 7, 10, 3];
        let map = IdentifierMap::build(ids.clone());
        for id in &ids {
            let index = map.to_internal(id).unwrap();
            assert_eq!(map.to_external(index).unwrap(), id);
        }
        for index in 0..map.len() {
            let id = map.to_external(index).unwrap();
            assert_eq!(map.to_internal(id).unwrap(), index);
        }
    }

    #[test]
    fn unknown_lookups_fail() {
        let map = IdentifierMap::build(vec![1_i64, 2]);
        assert_eq!(
            map.to_internal(&5),
            Err(IdMapError::KeyNotFound("5".to_string()))
        );
        assert_eq!(
            map.to_external(2),
            Err(IdMapError::IndexOutOfRange { index: 2, len: 2 })
        );
        assert_eq!(map.resolve(&5), None);
    }

    #[test]
    fn empty_input_builds_empty_map() {
        let map: IdentifierMap<i64> = IdentifierMap::build(Vec::new());
        assert!(map.is_empty());
        assert!(map.to_external(0).is_err());
    }
}
