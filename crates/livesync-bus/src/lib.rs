//! livesync event bus
//!
//! Fan-out of canonical [`ChangeEvent`](livesync_event::ChangeEvent)s to
//! registered listeners.
//!
//! # Core Concepts
//!
//! - [`EventBus`]: explicit bus instance, injected into consumers
//! - [`Filter`]: collection filter with optional entity narrowing
//! - [`Subscription`]: RAII handle; dropping or calling `unsubscribe` ends
//!   delivery
//!
//! # Example
//!
//! ```rust,ignore
//! use livesync_bus::EventBus;
//!
//! let bus = EventBus::new();
//! let sub = bus.subscribe_collection("devices", |event| {
//!     println!("{} {:?}", event.operation, event.entity_id);
//! });
//!
//! bus.publish(&event);
//! sub.unsubscribe();
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod bus;
mod subscription;

pub use bus::{BusStats, EventBus};
pub use subscription::{Filter, Subscription, SubscriptionId};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
