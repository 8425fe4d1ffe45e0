//! Live feed facade
//!
//! Wires transport → normalizer → bus on one dispatch path. Records from the
//! connector and records injected with [`LiveFeed::ingest`] take the same
//! path, and that path delivers one event at a time: every subscriber sees
//! events from both sources in the same order. A listener may still ingest
//! or publish from its own callback.

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::view::CollectionView;
use livesync_bus::{BusStats, EventBus, Filter, Subscription};
use livesync_event::{ChangeEvent, EntityId, EnvelopeNormalizer, RawRecord};
use livesync_reconcile::Entity;
use livesync_transport::{
    ConnectionState, RecordSource, ReconnectPolicy, TransportConnector, WebSocketSource,
};
use parking_lot::ReentrantMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Connected change feed
#[derive(Debug)]
pub struct LiveFeed {
    dispatcher: Arc<Dispatcher>,
    connector: TransportConnector,
    endpoint: Option<String>,
    subscribe_message: Option<String>,
    arrival_ttl: Option<Duration>,
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveFeed {
    /// Feed with built-in tables and default reconnect policy
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(&FeedConfig::default())
    }

    /// Feed built from configuration
    #[must_use]
    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(config.normalizer(), EventBus::new())),
            connector: TransportConnector::new(config.reconnect.to_policy()),
            endpoint: config.endpoint.clone(),
            subscribe_message: config.subscribe_message.clone(),
            arrival_ttl: config.view.arrival_ttl(),
        }
    }

    /// Replace the normalizer
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: EnvelopeNormalizer) -> Self {
        self.dispatcher = Arc::new(Dispatcher::new(normalizer, self.dispatcher.bus.clone()));
        self
    }

    /// Publish on an existing bus
    #[must_use]
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.dispatcher = Arc::new(Dispatcher::new(self.dispatcher.normalizer.clone(), bus));
        self
    }

    /// Replace the reconnect policy
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.connector = TransportConnector::new(policy);
        self
    }

    /// Bus that receives every normalized event
    #[inline]
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.dispatcher.bus
    }

    /// Normalizer in use
    #[inline]
    #[must_use]
    pub fn normalizer(&self) -> &EnvelopeNormalizer {
        &self.dispatcher.normalizer
    }

    /// Bus counters
    #[must_use]
    pub fn stats(&self) -> BusStats {
        self.dispatcher.bus.stats()
    }

    /// Normalize and publish one raw record; returns deliveries
    ///
    /// Safe to call from any thread while the feed is running.
    pub fn ingest(&self, raw: RawRecord) -> usize {
        self.dispatcher.dispatch(raw)
    }

    /// Publish an already-normalized event; returns deliveries
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        self.dispatcher.publish(event)
    }

    /// Listen to every event that passes `filter`
    pub fn subscribe<F>(&self, filter: Filter, on_event: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.dispatcher.bus.subscribe(filter, on_event)
    }

    /// Listen to a whole collection
    pub fn subscribe_collection<F>(&self, collection: impl Into<String>, on_event: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.dispatcher.bus.subscribe_collection(collection, on_event)
    }

    /// Listen to one entity
    pub fn subscribe_entity<F>(
        &self,
        collection: impl Into<String>,
        id: impl Into<EntityId>,
        on_event: F,
    ) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.dispatcher.bus.subscribe_entity(collection, id, on_event)
    }

    /// Reconciled view of one collection, seeded from a fetch
    ///
    /// Uses the configured arrival marker lifetime.
    pub fn view<T>(&self, collection: impl Into<String>, seed: impl IntoIterator<Item = T>) -> CollectionView<T>
    where
        T: Entity + Send + Sync + 'static,
    {
        CollectionView::builder(collection)
            .arrival_ttl(self.arrival_ttl)
            .seed(seed)
            .attach(&self.dispatcher.bus)
    }

    /// Start delivering records from `source`
    ///
    /// Returns immediately; progress is visible through
    /// [`connection_state`](Self::connection_state).
    ///
    /// # Errors
    /// Returns error if the feed is already running
    pub fn start<S>(&self, source: S) -> Result<(), FeedError>
    where
        S: RecordSource + 'static,
    {
        let dispatcher = Arc::clone(&self.dispatcher);
        tracing::info!(source = %source.describe(), "starting change feed");
        self.connector.connect(source, move |raw| {
            dispatcher.dispatch(raw);
        })?;
        Ok(())
    }

    /// Start against the configured WebSocket endpoint
    ///
    /// # Errors
    /// [`FeedError::NoEndpoint`] if none is configured, or a start error
    pub fn connect(&self) -> Result<(), FeedError> {
        let endpoint = self.endpoint.as_deref().ok_or(FeedError::NoEndpoint)?;
        let mut source = WebSocketSource::new(endpoint);
        if let Some(message) = &self.subscribe_message {
            source = source.with_subscribe_message(message.clone());
        }
        self.start(source)
    }

    /// Current connection state
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connector.connection_state()
    }

    /// Connection state transitions
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.connector.state_changes()
    }

    /// Stop the connection and wait for the reader task
    pub async fn shutdown(&self) {
        self.connector.shutdown().await;
        tracing::info!(stats = ?self.dispatcher.bus.stats(), "change feed stopped");
    }
}

/// Normalizer and bus behind one delivery lock
///
/// The lock is reentrant so a listener can publish from inside its own
/// callback; other threads wait until the current delivery finishes.
#[derive(Debug)]
struct Dispatcher {
    normalizer: Arc<EnvelopeNormalizer>,
    bus: EventBus,
    delivery: ReentrantMutex<()>,
}

impl Dispatcher {
    fn new(normalizer: impl Into<Arc<EnvelopeNormalizer>>, bus: EventBus) -> Self {
        Self {
            normalizer: normalizer.into(),
            bus,
            delivery: ReentrantMutex::new(()),
        }
    }

    fn dispatch(&self, raw: RawRecord) -> usize {
        let event = self.normalizer.normalize(raw);
        let delivered = self.publish(&event);
        tracing::trace!(
            collection = %event.collection,
            operation = %event.operation,
            id = event.entity_id_str().unwrap_or("-"),
            delivered,
            "dispatched"
        );
        delivered
    }

    fn publish(&self, event: &ChangeEvent) -> usize {
        let _delivering = self.delivery.lock();
        self.bus.publish(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesync_event::Operation;
    use livesync_test_utils::{device_row, insert};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn raw(json: &str) -> RawRecord {
        RawRecord::from_json(json).unwrap()
    }

    #[test]
    fn ingest_reaches_collection_and_entity_listeners() {
        let feed = LiveFeed::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        let _all = feed.subscribe_collection("devices", move |e| {
            log.lock().push(format!("all:{}", e.entity_id_str().unwrap_or("")));
        });
        let log = Arc::clone(&seen);
        let _one = feed.subscribe_entity("devices", "D2", move |e| {
            log.lock().push(format!("one:{}", e.operation));
        });

        feed.ingest(raw(r#"{"originName":"tbl_devices","rawOperation":"INSERT","row":{"device_id":"D1"}}"#));
        let n = feed.ingest(raw(r#"{"originName":"tbl_devices","rawOperation":"UPDATE","row":{"device_id":"D2"}}"#));
        feed.ingest(raw(r#"{"originName":"tbl_reports","rawOperation":"INSERT","row":{"report_id":"R1"}}"#));

        assert_eq!(n, 2);
        assert_eq!(*seen.lock(), vec!["all:D1", "all:D2", "one:Modified"]);
    }

    #[test]
    fn configured_collections_are_routed() {
        let config = FeedConfig::from_toml_str(
            "[collections.alerts]\naliases = [\"tbl_alerts\"]\nid_fields = [\"alert_id\"]",
        )
        .unwrap();
        let feed = LiveFeed::from_config(&config);
        let ids = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&ids);
        let _sub = feed.subscribe_collection("alerts", move |e| {
            assert_eq!(e.operation, Operation::Removed);
            log.lock().push(e.entity_id_str().map(str::to_string));
        });
        feed.ingest(raw(
            r#"{"originName":"public.tbl_alerts","rawOperation":"delete","row":{"note":"x","alert_id":9}}"#,
        ));

        assert_eq!(*ids.lock(), vec![Some("9".to_string())]);
    }

    #[test]
    fn concurrent_ingest_keeps_one_order_for_every_listener() {
        let feed = LiveFeed::new();
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&first);
        let _a = feed.subscribe_collection("devices", move |e| {
            log.lock().push(e.entity_id_str().unwrap_or("").to_string());
        });
        let log = Arc::clone(&second);
        let _b = feed.subscribe_collection("devices", move |e| {
            std::thread::yield_now();
            log.lock().push(e.entity_id_str().unwrap_or("").to_string());
        });

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let feed = &feed;
                scope.spawn(move || {
                    for n in 0..50 {
                        feed.ingest(insert("tbl_devices", device_row(&format!("W{worker}-{n}"), "a")));
                    }
                });
            }
        });

        let first = first.lock().clone();
        assert_eq!(first.len(), 200);
        assert_eq!(first, *second.lock());
    }

    #[test]
    fn listener_may_ingest_from_its_callback() {
        let feed = Arc::new(LiveFeed::new());
        let echoed = Arc::new(Mutex::new(Vec::new()));

        let inner = Arc::downgrade(&feed);
        let _echo = feed.subscribe_collection("devices", move |e| {
            if let (Some(feed), Some(id)) = (inner.upgrade(), e.entity_id_str()) {
                feed.ingest(insert("reports", json!({ "report_id": id })));
            }
        });
        let log = Arc::clone(&echoed);
        let _reports = feed.subscribe_collection("reports", move |e| {
            log.lock().push(e.entity_id_str().unwrap_or("").to_string());
        });

        feed.ingest(insert("tbl_devices", device_row("D1", "a")));
        assert_eq!(*echoed.lock(), vec!["D1"]);
    }

    #[test]
    fn connect_without_endpoint_fails() {
        let feed = LiveFeed::new();
        assert!(matches!(feed.connect(), Err(FeedError::NoEndpoint)));
    }
}
