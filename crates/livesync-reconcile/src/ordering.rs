//! Ordering policies
//!
//! A policy decides where a new entity goes and whether an update moved an
//! entity's ordering key. Updates that leave the key alone never move the
//! entity.

use crate::collection::LocalCollection;
use crate::entity::Entity;

/// Placement rule for a [`LocalCollection`]
pub trait OrderingPolicy<T: Entity> {
    /// Index at which `entity` is inserted
    fn insert_index(&self, collection: &LocalCollection<T>, entity: &T) -> usize;

    /// Whether an update changed the ordering key
    fn key_changed(&self, _before: &T, _after: &T) -> bool {
        false
    }
}

/// Prepend new entities (newest first by arrival)
#[derive(Debug, Clone, Copy, Default)]
pub struct NewestFirst;

impl<T: Entity> OrderingPolicy<T> for NewestFirst {
    fn insert_index(&self, _collection: &LocalCollection<T>, _entity: &T) -> usize {
        0
    }
}

/// Append new entities (oldest first by arrival)
#[derive(Debug, Clone, Copy, Default)]
pub struct OldestFirst;

impl<T: Entity> OrderingPolicy<T> for OldestFirst {
    fn insert_index(&self, collection: &LocalCollection<T>, _entity: &T) -> usize {
        collection.len()
    }
}

/// Sort direction for [`SortedBy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Smallest key first
    Ascending,
    /// Largest key first
    #[default]
    Descending,
}

/// Keep entities sorted by a key
///
/// Entities with equal keys keep arrival order: a new entity goes after
/// existing entities with the same key.
#[derive(Clone, Copy)]
pub struct SortedBy<F> {
    key: F,
    direction: Direction,
}

impl<F> SortedBy<F> {
    /// Sort by `key` in `direction`
    #[inline]
    #[must_use]
    pub fn new(key: F, direction: Direction) -> Self {
        Self { key, direction }
    }

    /// Largest key first
    #[inline]
    #[must_use]
    pub fn descending(key: F) -> Self {
        Self::new(key, Direction::Descending)
    }

    /// Smallest key first
    #[inline]
    #[must_use]
    pub fn ascending(key: F) -> Self {
        Self::new(key, Direction::Ascending)
    }
}

impl<F> std::fmt::Debug for SortedBy<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedBy")
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

impl<T, K, F> OrderingPolicy<T> for SortedBy<F>
where
    T: Entity,
    K: PartialOrd,
    F: Fn(&T) -> K,
{
    fn insert_index(&self, collection: &LocalCollection<T>, entity: &T) -> usize {
        let key = (self.key)(entity);
        collection
            .iter()
            .position(|other| {
                let other = (self.key)(other);
                match self.direction {
                    Direction::Ascending => other > key,
                    Direction::Descending => other < key,
                }
            })
            .unwrap_or(collection.len())
    }

    fn key_changed(&self, before: &T, after: &T) -> bool {
        (self.key)(before) != (self.key)(after)
    }
}
