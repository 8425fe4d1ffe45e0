//! Event bus
//!
//! [`EventBus`] is an explicit, cloneable handle (clones share one
//! registry). `publish` delivers synchronously, in registration order,
//! before returning. Nothing is queued or replayed.
//!
//! # Invariants
//! 1. A subscription registered during a `publish` does not see that event.
//! 2. A subscription removed during a `publish` sees nothing further, even
//!    later in the same dispatch.
//! 3. Callbacks run without any registry lock held, so they may subscribe,
//!    unsubscribe or publish.

use crate::subscription::{Entry, Filter, Subscription, SubscriptionId};
use livesync_event::{ChangeEvent, EntityId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Bus counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Events published
    pub published: u64,
    /// Callback invocations
    pub delivered: u64,
    /// Currently registered subscriptions
    pub active_subscriptions: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: RwLock<Vec<Arc<Entry>>>,
    published: AtomicU64,
    delivered: AtomicU64,
}

impl Registry {
    pub(crate) fn remove(&self, id: SubscriptionId) {
        self.entries.write().retain(|e| e.id != id);
    }

    fn snapshot(&self) -> Vec<Arc<Entry>> {
        self.entries.read().clone()
    }
}

/// Synchronous fan-out of change events to subscriptions
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    /// Create bus with no subscriptions
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn subscribe<F>(&self, filter: Filter, callback: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        let entry = Arc::new(Entry::new(id, filter, Box::new(callback)));
        self.registry.entries.write().push(Arc::clone(&entry));

        tracing::debug!(id = %id, filter = %entry.filter, "subscribed");
        Subscription::new(entry, Arc::downgrade(&self.registry))
    }

    /// Register a listener for every event of every collection
    pub fn subscribe_all<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe(Filter::all(), callback)
    }

    /// Register a listener for every event of a collection
    pub fn subscribe_collection<F>(&self, collection: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe(Filter::collection(collection), callback)
    }

    /// Register a listener for one entity of a collection
    pub fn subscribe_entity<F>(
        &self,
        collection: impl Into<String>,
        id: impl Into<EntityId>,
        callback: F,
    ) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe(Filter::entity(collection, id), callback)
    }

    /// Deliver an event to every matching subscription
    ///
    /// Returns the number of callbacks invoked.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        self.registry.published.fetch_add(1, Ordering::Relaxed);

        let delivered = self
            .registry
            .snapshot()
            .iter()
            .filter(|entry| entry.deliver(event))
            .count();

        self.registry
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);

        tracing::trace!(
            collection = %event.collection,
            operation = %event.operation,
            entity = ?event.entity_id_str(),
            delivered,
            "published"
        );
        delivered
    }

    /// Number of registered subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.entries.read().len()
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.registry.published.load(Ordering::Relaxed),
            delivered: self.registry.delivered.load(Ordering::Relaxed),
            active_subscriptions: self.subscriber_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesync_event::Operation;
    use parking_lot::Mutex;

    fn event(collection: &str, id: &str) -> ChangeEvent {
        ChangeEvent::new(collection, Operation::Modified).with_entity_id(id)
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&ChangeEvent) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb = move |e: &ChangeEvent| {
            sink.lock()
                .push(format!("{}/{}", e.collection, e.entity_id_str().unwrap_or("-")));
        };
        (seen, cb)
    }

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<_> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                bus.subscribe_collection("devices", move |_| order.lock().push(i))
            })
            .collect();

        assert_eq!(bus.publish(&event("devices", "D1")), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn collection_isolation() {
        let bus = EventBus::new();
        let (seen, cb) = recorder();
        let _sub = bus.subscribe_collection("devices", cb);

        bus.publish(&event("transactions", "T1"));
        bus.publish(&event("devices", "D1"));

        assert_eq!(*seen.lock(), vec!["devices/D1".to_string()]);
    }

    #[test]
    fn entity_isolation() {
        let bus = EventBus::new();
        let (seen, cb) = recorder();
        let _sub = bus.subscribe_entity("devices", "D1", cb);

        bus.publish(&event("devices", "D2"));
        bus.publish(&event("devices", "D1"));
        bus.publish(&event("reports", "D1"));

        assert_eq!(*seen.lock(), vec!["devices/D1".to_string()]);
    }

    #[test]
    fn unsubscribe_stops_delivery_and_is_idempotent() {
        let bus = EventBus::new();
        let (seen, cb) = recorder();
        let sub = bus.subscribe_collection("devices", cb);

        bus.publish(&event("devices", "D1"));
        sub.unsubscribe();
        sub.unsubscribe();
        bus.publish(&event("devices", "D2"));

        assert_eq!(seen.lock().len(), 1);
        assert!(!sub.is_active());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn drop_unsubscribes() {
        let bus = EventBus::new();
        let (seen, cb) = recorder();
        {
            let _sub = bus.subscribe_collection("devices", cb);
            assert_eq!(bus.subscriber_count(), 1);
        }
        bus.publish(&event("devices", "D1"));
        assert!(seen.lock().is_empty());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_after_bus_dropped() {
        let bus = EventBus::new();
        let sub = bus.subscribe_collection("devices", |_| {});
        drop(bus);
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
    }

    #[test]
    fn subscribe_during_publish_misses_current_event() {
        let bus = EventBus::new();
        let late = Arc::new(Mutex::new(Vec::<Subscription>::new()));
        let late_hits = Arc::new(AtomicU64::new(0));

        let _outer = {
            let bus2 = bus.clone();
            let late = Arc::clone(&late);
            let late_hits = Arc::clone(&late_hits);
            bus.subscribe_collection("devices", move |_| {
                let hits = Arc::clone(&late_hits);
                let sub = bus2.subscribe_collection("devices", move |_| {
                    hits.fetch_add(1, Ordering::Relaxed);
                });
                late.lock().push(sub);
            })
        };

        bus.publish(&event("devices", "D1"));
        assert_eq!(late_hits.load(Ordering::Relaxed), 0);

        bus.publish(&event("devices", "D2"));
        assert_eq!(late_hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unsubscribe_during_publish_stops_later_delivery() {
        let bus = EventBus::new();
        let victim_hits = Arc::new(AtomicU64::new(0));
        let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let _killer = {
            let slot = Arc::clone(&victim_slot);
            bus.subscribe_collection("devices", move |_| {
                if let Some(victim) = slot.lock().as_ref() {
                    victim.unsubscribe();
                }
            })
        };

        let hits = Arc::clone(&victim_hits);
        *victim_slot.lock() = Some(bus.subscribe_collection("devices", move |_| {
            hits.fetch_add(1, Ordering::Relaxed);
        }));

        bus.publish(&event("devices", "D1"));
        assert_eq!(victim_hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn stats_track_publish_and_delivery() {
        let bus = EventBus::new();
        let _a = bus.subscribe_collection("devices", |_| {});
        let _b = bus.subscribe_entity("devices", "D1", |_| {});

        bus.publish(&event("devices", "D1"));
        bus.publish(&event("devices", "D2"));
        bus.publish(&event("reports", "R1"));

        let stats = bus.stats();
        assert_eq!(stats.published, 3);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.active_subscriptions, 2);
    }

    #[test]
    fn subscribe_all_sees_every_collection() {
        let bus = EventBus::new();
        let (seen, cb) = recorder();
        let _sub = bus.subscribe_all(cb);

        bus.publish(&event("devices", "D1"));
        bus.publish(&event("reports", "R1"));
        assert_eq!(*seen.lock(), vec!["devices/D1", "reports/R1"]);
    }

    #[test]
    fn subscription_ids_are_unique() {
        let bus = EventBus::new();
        let a = bus.subscribe_collection("x", |_| {});
        let b = bus.subscribe_collection("x", |_| {});
        assert_ne!(a.id(), b.id());
    }
}
