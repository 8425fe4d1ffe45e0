//! Collection views
//!
//! A [`CollectionView`] is the standard consumer: it owns one
//! [`LocalCollection`], seeded from an external fetch, and keeps it current
//! by reconciling every event of its collection. Each effective change is
//! published as a new snapshot on a `watch` channel; no-op events publish
//! nothing.
//!
//! Freshly inserted entities carry the "just arrived" marker, which the
//! view clears after the configured lifetime (requires a tokio runtime;
//! without one the marker stays until [`CollectionView::clear_arrival`]).
//! Each arrival gets its own timer: an entity removed and inserted again
//! keeps the new marker for the full lifetime.
//!
//! Rejected events are counted, and the latest rejection is kept for
//! [`CollectionView::take_error`] so the consumer can decide to refetch.
//!
//! Dropping the view unsubscribes it.

use crate::error::FeedError;
use livesync_bus::{EventBus, Subscription};
use livesync_event::{ChangeEvent, Clock, EntityId};
use livesync_reconcile::{
    Entity, LocalCollection, NewestFirst, OrderingPolicy, Outcome, ReconcileError, Reconciler,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Default lifetime of the "just arrived" marker
pub const DEFAULT_ARRIVAL_TTL: Duration = Duration::from_secs(3);

struct Shared<T: Clone> {
    name: String,
    tx: watch::Sender<LocalCollection<T>>,
    errors: AtomicU64,
    last_error: Mutex<Option<ReconcileError>>,
    /// Pending arrival timers, by entity; only the latest token may clear
    arrivals: Mutex<HashMap<EntityId, u64>>,
    next_arrival: AtomicU64,
}

impl<T: Entity + Send + Sync + 'static> Shared<T> {
    fn apply<P: OrderingPolicy<T>>(
        self: &Arc<Self>,
        reconciler: &Reconciler<T, P>,
        event: &ChangeEvent,
        arrival_ttl: Option<Duration>,
    ) {
        let mut arrived = None;
        self.tx.send_if_modified(|current| match reconciler.apply(current, event) {
            Ok(applied) => {
                let changed = applied.outcome.is_change();
                if matches!(applied.outcome, Outcome::Inserted { .. }) {
                    arrived = event.entity_id.clone();
                }
                if changed {
                    *current = applied.collection;
                }
                changed
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    view = %self.name,
                    error = %e,
                    needs_refetch = e.needs_refetch(),
                    "event not applied"
                );
                *self.last_error.lock() = Some(e);
                false
            }
        });

        if let (Some(id), Some(ttl)) = (arrived, arrival_ttl) {
            self.schedule_clear(id, ttl);
        }
    }

    fn schedule_clear(self: &Arc<Self>, id: EntityId, ttl: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(view = %self.name, id = %id, "no runtime, arrival marker kept");
            return;
        };
        let token = self.next_arrival.fetch_add(1, Ordering::Relaxed);
        self.arrivals.lock().insert(id.clone(), token);

        let shared = Arc::downgrade(self);
        runtime.spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(shared) = shared.upgrade() {
                shared.expire_arrival(&id, token);
            }
        });
    }

    fn expire_arrival(&self, id: &EntityId, token: u64) {
        {
            let mut arrivals = self.arrivals.lock();
            if arrivals.get(id) != Some(&token) {
                tracing::trace!(view = %self.name, id = %id, "stale arrival timer ignored");
                return;
            }
            arrivals.remove(id);
        }
        self.clear_arrival(id.as_str());
    }

    fn clear_arrival(&self, id: &str) -> bool {
        self.tx.send_if_modified(|current| {
            let next = current.clear_arrival(id);
            if next.version() == current.version() {
                return false;
            }
            *current = next;
            true
        })
    }
}

/// Reconciled, observable view of one collection
pub struct CollectionView<T: Entity, P = NewestFirst> {
    shared: Arc<Shared<T>>,
    subscription: Subscription,
    _ordering: PhantomData<fn() -> P>,
}

impl<T> CollectionView<T, NewestFirst>
where
    T: Entity + Send + Sync + 'static,
{
    /// Builder for a view of `collection`
    #[must_use]
    pub fn builder(collection: impl Into<String>) -> ViewBuilder<T, NewestFirst> {
        let name = collection.into();
        ViewBuilder {
            reconciler: Reconciler::new().for_collection(name.clone()),
            name,
            arrival_ttl: Some(DEFAULT_ARRIVAL_TTL),
            seed: Vec::new(),
        }
    }

    /// Newest-first view seeded from a fetch, with default settings
    #[must_use]
    pub fn seeded(
        bus: &EventBus,
        collection: impl Into<String>,
        seed: impl IntoIterator<Item = T>,
    ) -> Self {
        Self::builder(collection).seed(seed).attach(bus)
    }
}

impl<T, P> CollectionView<T, P>
where
    T: Entity + Send + Sync + 'static,
{
    /// Collection name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current collection value
    #[must_use]
    pub fn snapshot(&self) -> LocalCollection<T> {
        self.shared.tx.borrow().clone()
    }

    /// Receiver notified on every effective change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LocalCollection<T>> {
        self.shared.tx.subscribe()
    }

    /// Number of entities
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.tx.borrow().len()
    }

    /// Whether the view is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.tx.borrow().is_empty()
    }

    /// Version of the current collection value
    #[must_use]
    pub fn version(&self) -> u64 {
        self.shared.tx.borrow().version()
    }

    /// Replace contents after a refetch
    pub fn reseed(&self, entities: impl IntoIterator<Item = T>) {
        self.shared
            .tx
            .send_modify(|current| *current = current.reseeded(entities));
        tracing::debug!(view = %self.shared.name, len = self.len(), "view reseeded");
    }

    /// Clear the arrival marker now; `true` if one was set
    pub fn clear_arrival(&self, id: &str) -> bool {
        self.shared.clear_arrival(id)
    }

    /// Events rejected by the reconciler so far
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.shared.errors.load(Ordering::Relaxed)
    }

    /// Latest rejection since the previous call, if any
    ///
    /// When [`FeedError::needs_refetch`] is `true` the view may have missed
    /// a change; fetch the collection again and [`reseed`](Self::reseed).
    #[must_use]
    pub fn take_error(&self) -> Option<FeedError> {
        self.shared.last_error.lock().take().map(FeedError::from)
    }

    /// Whether the view still receives events
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.subscription.is_active()
    }
}

impl<T: Entity, P> fmt::Debug for CollectionView<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.shared.tx.borrow();
        f.debug_struct("CollectionView")
            .field("name", &self.shared.name)
            .field("len", &current.len())
            .field("version", &current.version())
            .field("subscription", &self.subscription.id())
            .finish_non_exhaustive()
    }
}

/// Configures a [`CollectionView`]
pub struct ViewBuilder<T, P = NewestFirst> {
    name: String,
    reconciler: Reconciler<T, P>,
    arrival_ttl: Option<Duration>,
    seed: Vec<T>,
}

impl<T, P> ViewBuilder<T, P>
where
    T: Entity + Send + Sync + 'static,
    P: OrderingPolicy<T>,
{
    /// Use another ordering policy
    #[must_use]
    pub fn ordering<Q: OrderingPolicy<T>>(self, ordering: Q) -> ViewBuilder<T, Q> {
        ViewBuilder {
            name: self.name,
            reconciler: self.reconciler.with_ordering(ordering),
            arrival_ttl: self.arrival_ttl,
            seed: self.seed,
        }
    }

    /// Payload fields normalized to canonical milliseconds
    #[must_use]
    pub fn time_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reconciler = self.reconciler.with_time_fields(fields);
        self
    }

    /// Clock for null time fields
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.reconciler = self.reconciler.with_clock(clock);
        self
    }

    /// Arrival marker lifetime; `None` disables the marker
    #[must_use]
    pub fn arrival_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.arrival_ttl = ttl;
        self
    }

    /// Initial contents, in display order
    #[must_use]
    pub fn seed(mut self, entities: impl IntoIterator<Item = T>) -> Self {
        self.seed = entities.into_iter().collect();
        self
    }

    /// Subscribe to `bus` and start reconciling
    #[must_use]
    pub fn attach(self, bus: &EventBus) -> CollectionView<T, P>
    where
        P: Send + Sync + 'static,
    {
        let (tx, _) = watch::channel(LocalCollection::from_entities(self.seed));
        let shared = Arc::new(Shared {
            name: self.name.clone(),
            tx,
            errors: AtomicU64::new(0),
            last_error: Mutex::new(None),
            arrivals: Mutex::new(HashMap::new()),
            next_arrival: AtomicU64::new(0),
        });

        let arrival_ttl = self.arrival_ttl;
        let reconciler = self.reconciler.mark_arrivals(arrival_ttl.is_some());
        let target = Arc::clone(&shared);
        let subscription = bus.subscribe_collection(self.name, move |event| {
            target.apply(&reconciler, event, arrival_ttl);
        });

        tracing::debug!(
            view = %shared.name,
            seeded = shared.tx.borrow().len(),
            subscription = %subscription.id(),
            "view attached"
        );

        CollectionView {
            shared,
            subscription,
            _ordering: PhantomData,
        }
    }
}

impl<T, P: fmt::Debug> fmt::Debug for ViewBuilder<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewBuilder")
            .field("name", &self.name)
            .field("reconciler", &self.reconciler)
            .field("arrival_ttl", &self.arrival_ttl)
            .field("seed", &self.seed.len())
            .finish()
    }
}
