//! Subscription filters and handles

use crate::bus::Registry;
use livesync_event::{ChangeEvent, EntityId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Opaque subscription identifier, unique for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub(crate) u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscription wants to see
///
/// `None` matches anything; an entity filter never matches an event
/// without an entity id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Collection name
    pub collection: Option<String>,
    /// Entity within the collection
    pub entity: Option<EntityId>,
}

impl Filter {
    /// Every event of every collection
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Every event of a collection
    #[must_use]
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: Some(name.into()),
            entity: None,
        }
    }

    /// Events of one entity within a collection
    #[must_use]
    pub fn entity(collection: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Self {
            collection: Some(collection.into()),
            entity: Some(id.into()),
        }
    }

    /// Restrict to one entity id
    #[must_use]
    pub fn with_entity(mut self, id: impl Into<EntityId>) -> Self {
        self.entity = Some(id.into());
        self
    }

    /// Whether an event passes this filter
    #[inline]
    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.collection
            .as_deref()
            .map_or(true, |c| event.collection == c)
            && self
                .entity
                .as_ref()
                .map_or(true, |id| event.entity_id.as_ref() == Some(id))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let collection = self.collection.as_deref().unwrap_or("*");
        match &self.entity {
            Some(id) => write!(f, "{collection}/{id}"),
            None => f.write_str(collection),
        }
    }
}

pub(crate) type Callback = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Registered listener
pub(crate) struct Entry {
    pub(crate) id: SubscriptionId,
    pub(crate) filter: Filter,
    active: AtomicBool,
    callback: Callback,
}

impl Entry {
    pub(crate) fn new(id: SubscriptionId, filter: Filter, callback: Callback) -> Self {
        Self {
            id,
            filter,
            active: AtomicBool::new(true),
            callback,
        }
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns `true` only for the call that performed the deactivation
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    /// Deliver if still active and matching
    pub(crate) fn deliver(&self, event: &ChangeEvent) -> bool {
        if self.is_active() && self.filter.matches(event) {
            (self.callback)(event);
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Handle to a registered listener
///
/// Dropping the handle unsubscribes. [`Subscription::unsubscribe`] may be
/// called any number of times, including after the bus itself is gone.
#[must_use = "dropping a Subscription unsubscribes it immediately"]
pub struct Subscription {
    entry: Arc<Entry>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub(crate) fn new(entry: Arc<Entry>, registry: Weak<Registry>) -> Self {
        Self { entry, registry }
    }

    /// Subscription identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.entry.id
    }

    /// Filter this subscription was registered with
    #[inline]
    #[must_use]
    pub fn filter(&self) -> &Filter {
        &self.entry.filter
    }

    /// Whether events are still delivered
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.entry.is_active()
    }

    /// Stop delivery; idempotent
    pub fn unsubscribe(&self) {
        if !self.entry.deactivate() {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.entry.id);
        }
        tracing::trace!(id = %self.entry.id, filter = %self.entry.filter, "unsubscribed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.entry.id)
            .field("filter", &self.entry.filter)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesync_event::Operation;

    #[test]
    fn collection_filter_matches_any_entity() {
        let f = Filter::collection("devices");
        let e1 = ChangeEvent::new("devices", Operation::Added).with_entity_id("D1");
        let e2 = ChangeEvent::new("devices", Operation::Removed);
        assert!(f.matches(&e1));
        assert!(f.matches(&e2));
    }

    #[test]
    fn collection_filter_rejects_other_collection() {
        let f = Filter::collection("devices");
        let e = ChangeEvent::new("transactions", Operation::Added).with_entity_id("D1");
        assert!(!f.matches(&e));
    }

    #[test]
    fn entity_filter_requires_matching_id() {
        let f = Filter::entity("devices", "D1");
        let hit = ChangeEvent::new("devices", Operation::Modified).with_entity_id("D1");
        let miss = ChangeEvent::new("devices", Operation::Modified).with_entity_id("D2");
        let no_id = ChangeEvent::new("devices", Operation::Removed);
        assert!(f.matches(&hit));
        assert!(!f.matches(&miss));
        assert!(!f.matches(&no_id));
    }

    #[test]
    fn ids_are_unique_across_buses() {
        let first = crate::EventBus::new();
        let second = crate::EventBus::new();
        let a = first.subscribe_collection("devices", |_| {});
        let b = second.subscribe_collection("devices", |_| {});
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id().to_string(), b.id().to_string());
    }

    #[test]
    fn wildcard_filters() {
        let device = ChangeEvent::new("devices", Operation::Added).with_entity_id("D1");
        let report = ChangeEvent::new("reports", Operation::Added).with_entity_id("D1");
        let bare = ChangeEvent::new("reports", Operation::Removed);

        assert!(Filter::all().matches(&device));
        assert!(Filter::all().matches(&bare));

        let any_d1 = Filter::all().with_entity("D1");
        assert!(any_d1.matches(&device));
        assert!(any_d1.matches(&report));
        assert!(!any_d1.matches(&bare));
    }

    #[test]
    fn filter_display() {
        assert_eq!(Filter::collection("reports").to_string(), "reports");
        assert_eq!(Filter::entity("devices", "D1").to_string(), "devices/D1");
        assert_eq!(Filter::all().to_string(), "*");
        assert_eq!(Filter::all().with_entity("D1").to_string(), "*/D1");
    }
}
