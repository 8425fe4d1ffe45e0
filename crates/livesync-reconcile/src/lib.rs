//! livesync reconciliation
//!
//! Merges canonical change events into consumer-owned, ordered collections.
//!
//! # Core Concepts
//!
//! - [`Entity`]: typed projection of a payload, keyed by its entity id
//! - [`LocalCollection`]: persistent, id-unique ordered sequence
//! - [`OrderingPolicy`]: where new entities go ([`NewestFirst`],
//!   [`OldestFirst`], [`SortedBy`])
//! - [`Reconciler`]: one algorithm for every collection; apply an event,
//!   get the next collection value
//!
//! # Example
//!
//! ```rust,ignore
//! use livesync_reconcile::{DynamicEntity, LocalCollection, Reconciler};
//!
//! let reconciler = Reconciler::<DynamicEntity>::new().for_collection("devices");
//! let mut devices = LocalCollection::new();
//!
//! let applied = reconciler.apply(&devices, &event)?;
//! if applied.outcome.is_change() {
//!     devices = applied.collection;
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod collection;
pub mod entity;
pub mod error;
pub mod ordering;
pub mod reconciler;

pub use collection::{LocalCollection, Slot};
pub use entity::{DynamicEntity, Entity, ID_FIELD};
pub use error::ReconcileError;
pub use ordering::{Direction, NewestFirst, OldestFirst, OrderingPolicy, SortedBy};
pub use reconciler::{Applied, Outcome, Reconciler, Unchanged};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use livesync_event::{EnvelopeNormalizer, RawRecord};
    use serde_json::json;

    fn event(json: &str) -> livesync_event::ChangeEvent {
        EnvelopeNormalizer::new().normalize(RawRecord::from_json(json).unwrap())
    }

    #[test]
    fn device_lifecycle() {
        let reconciler = Reconciler::<DynamicEntity>::new().for_collection("devices");
        let empty = LocalCollection::new();

        let inserted = reconciler
            .apply(
                &empty,
                &event(
                    r#"{"originName":"tbl_devices","rawOperation":"INSERT",
                        "row":{"device_id":"D1","status":"active"}}"#,
                ),
            )
            .unwrap();
        assert_eq!(inserted.collection.ids(), vec!["D1"]);
        assert_eq!(inserted.collection.arrivals(), vec!["D1"]);

        let updated = reconciler
            .apply(
                &inserted.collection,
                &event(
                    r#"{"originName":"tbl_devices","rawOperation":"UPDATE",
                        "row":{"device_id":"D1","status":"maintenance"}}"#,
                ),
            )
            .unwrap();
        assert_eq!(
            updated.collection.get("D1").unwrap().get("status"),
            Some(&json!("maintenance"))
        );
        assert_eq!(updated.collection.len(), 1);

        let deleted = reconciler
            .apply(
                &updated.collection,
                &event(
                    r#"{"originName":"tbl_devices","rawOperation":"DELETE",
                        "row":{"device_id":"D1"}}"#,
                ),
            )
            .unwrap();
        assert!(deleted.collection.is_empty());
        assert_eq!(deleted.outcome, Outcome::Removed { index: 0 });

        // earlier values are untouched
        assert_eq!(inserted.collection.len(), 1);
        assert!(empty.is_empty());
    }

    #[test]
    fn sessions_feed_transactions() {
        let reconciler = Reconciler::<DynamicEntity>::new().for_collection("transactions");
        let out = reconciler
            .apply(
                &LocalCollection::new(),
                &event(
                    r#"{"originName":"sessions","rawOperation":"INSERT",
                        "row":{"session_id":"S1","amount":12}}"#,
                ),
            )
            .unwrap();
        assert_eq!(out.collection.ids(), vec!["S1"]);
    }
}
