//! Consumer-owned ordered collection
//!
//! [`LocalCollection`] is a persistent value: every change returns a new
//! collection that shares structure with the old one, and the old one is
//! left untouched. Observers detect change with [`LocalCollection::version`]
//! or [`LocalCollection::ptr_eq`].

use crate::entity::Entity;
use im::Vector;

/// One entity plus its presentation marker
#[derive(Debug, Clone, PartialEq)]
pub struct Slot<T> {
    /// The entity
    pub entity: T,
    /// Set when the entity was just inserted by an event
    pub just_arrived: bool,
}

impl<T> Slot<T> {
    /// Slot without the arrival marker
    #[inline]
    #[must_use]
    pub fn settled(entity: T) -> Self {
        Self {
            entity,
            just_arrived: false,
        }
    }
}

/// Ordered, id-unique sequence of entities
///
/// Equality compares contents only; `version` is ignored.
#[derive(Debug, Clone)]
pub struct LocalCollection<T: Clone> {
    items: Vector<Slot<T>>,
    version: u64,
}

impl<T: Clone> Default for LocalCollection<T> {
    fn default() -> Self {
        Self {
            items: Vector::new(),
            version: 0,
        }
    }
}

impl<T: Clone + PartialEq> PartialEq for LocalCollection<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T: Entity> LocalCollection<T> {
    /// Empty collection
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from an initial fetch, keeping the given order
    ///
    /// Later duplicates of an id are dropped so the result stays id-unique.
    #[must_use]
    pub fn from_entities(entities: impl IntoIterator<Item = T>) -> Self {
        let mut items = Vector::new();
        let mut seen = std::collections::HashSet::new();
        for entity in entities {
            if seen.insert(entity.id().to_string()) {
                items.push_back(Slot::settled(entity));
            }
        }
        Self { items, version: 0 }
    }

    /// Replace every entity after a refetch
    ///
    /// Same deduplication as [`from_entities`](Self::from_entities); the
    /// version keeps growing so observers see the change.
    #[must_use]
    pub fn reseeded(&self, entities: impl IntoIterator<Item = T>) -> Self {
        self.next(Self::from_entities(entities).items)
    }

    /// Number of entities
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the collection is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Change counter; grows with every effective change
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether both values share the same storage
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.items.ptr_eq(&other.items)
    }

    /// Entities in order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|slot| &slot.entity)
    }

    /// Slots in order
    pub fn slots(&self) -> impl Iterator<Item = &Slot<T>> {
        self.items.iter()
    }

    /// Position of an entity
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|slot| slot.entity.id() == id)
    }

    /// Entity by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&T> {
        self.slot(id).map(|slot| &slot.entity)
    }

    /// Slot by id
    #[must_use]
    pub fn slot(&self, id: &str) -> Option<&Slot<T>> {
        self.items.iter().find(|slot| slot.entity.id() == id)
    }

    /// Whether an entity exists
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Ids in order
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.iter().map(Entity::id).collect()
    }

    /// Clone entities into a `Vec`
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// Copy with the arrival marker of one entity cleared
    ///
    /// Returns an unchanged copy (same version) if the entity is absent or
    /// not marked.
    #[must_use]
    pub fn clear_arrival(&self, id: &str) -> Self {
        match self.position(id) {
            Some(index) if self.items[index].just_arrived => {
                let mut slot = self.items[index].clone();
                slot.just_arrived = false;
                self.with_replaced(index, slot)
            }
            _ => self.clone(),
        }
    }

    /// Ids currently carrying the arrival marker
    #[must_use]
    pub fn arrivals(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|slot| slot.just_arrived)
            .map(|slot| slot.entity.id())
            .collect()
    }

    pub(crate) fn slot_at(&self, index: usize) -> &Slot<T> {
        &self.items[index]
    }

    pub(crate) fn with_inserted(&self, index: usize, slot: Slot<T>) -> Self {
        let mut items = self.items.clone();
        items.insert(index.min(items.len()), slot);
        self.next(items)
    }

    pub(crate) fn with_replaced(&self, index: usize, slot: Slot<T>) -> Self {
        self.next(self.items.update(index, slot))
    }

    pub(crate) fn with_removed(&self, index: usize) -> Self {
        let mut items = self.items.clone();
        items.remove(index);
        self.next(items)
    }

    fn next(&self, items: Vector<Slot<T>>) -> Self {
        Self {
            items,
            version: self.version + 1,
        }
    }
}

impl<T: Entity> FromIterator<T> for LocalCollection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_entities(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::DynamicEntity;
    use serde_json::json;

    fn e(id: &str) -> DynamicEntity {
        DynamicEntity::new(id)
    }

    #[test]
    fn seed_keeps_order_and_drops_duplicates() {
        let c = LocalCollection::from_entities([e("a"), e("b"), e("a")]);
        assert_eq!(c.ids(), vec!["a", "b"]);
        assert_eq!(c.version(), 0);
    }

    #[test]
    fn changes_leave_original_untouched() {
        let c = LocalCollection::from_entities([e("a"), e("b")]);
        let d = c.with_removed(0);
        assert_eq!(c.ids(), vec!["a", "b"]);
        assert_eq!(d.ids(), vec!["b"]);
        assert_eq!(d.version(), 1);
        assert!(!c.ptr_eq(&d));
    }

    #[test]
    fn clear_arrival() {
        let c = LocalCollection::<DynamicEntity>::new().with_inserted(
            0,
            Slot {
                entity: e("a"),
                just_arrived: true,
            },
        );
        assert_eq!(c.arrivals(), vec!["a"]);

        let cleared = c.clear_arrival("a");
        assert!(cleared.arrivals().is_empty());
        assert_eq!(cleared.version(), c.version() + 1);

        let again = cleared.clear_arrival("a");
        assert_eq!(again.version(), cleared.version());
        assert!(again.ptr_eq(&cleared));
    }

    #[test]
    fn equality_ignores_version() {
        let a = LocalCollection::from_entities([e("x").with_field("n", json!(1))]);
        let b = a.with_removed(0).with_inserted(0, Slot::settled(e("x").with_field("n", json!(1))));
        assert_eq!(a, b);
        assert_ne!(a.version(), b.version());
    }

    #[test]
    fn reseed_bumps_version() {
        let c = LocalCollection::from_entities([e("a")]).with_removed(0);
        let r = c.reseeded([e("b"), e("c"), e("b")]);
        assert_eq!(r.ids(), vec!["b", "c"]);
        assert_eq!(r.version(), c.version() + 1);
        assert!(r.arrivals().is_empty());
    }

    #[test]
    fn lookup() {
        let c: LocalCollection<_> = [e("a"), e("b")].into_iter().collect();
        assert_eq!(c.position("b"), Some(1));
        assert!(c.contains("a"));
        assert!(c.get("z").is_none());
    }
}
