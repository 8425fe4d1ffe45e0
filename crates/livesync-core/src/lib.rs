//! livesync
//!
//! Real-time change-feed ingestion and reconciliation. One live connection
//! to a notification source, one canonical event shape, synchronous fan-out,
//! and a reusable merge algorithm that keeps consumer collections correct.
//!
//! # Core Concepts
//!
//! - [`LiveFeed`]: transport → normalizer → bus, on one dispatch path
//! - [`CollectionView`]: seeded, reconciled, observable collection
//! - [`FeedConfig`]: TOML-loadable settings
//! - [`telemetry::init`]: tracing subscriber set-up
//!
//! The building blocks are re-exported: [`event`], [`bus`], [`reconcile`],
//! [`transport`].
//!
//! # Example
//!
//! ```rust,ignore
//! use livesync_core::{FeedConfig, LiveFeed};
//! use livesync_core::reconcile::DynamicEntity;
//!
//! let config = FeedConfig::from_file("livesync.toml")?;
//! let feed = LiveFeed::from_config(&config);
//!
//! let devices = feed.view::<DynamicEntity>("devices", fetched_devices);
//! let mut updates = devices.subscribe();
//!
//! feed.connect()?;
//! while updates.changed().await.is_ok() {
//!     render(&updates.borrow_and_update());
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod feed;
pub mod telemetry;
pub mod view;

pub use config::{CollectionConfig, FeedConfig, LogConfig, ReconnectConfig, ViewConfig};
pub use error::{ConfigError, FeedError};
pub use feed::LiveFeed;
pub use telemetry::LogFormat;
pub use view::{CollectionView, ViewBuilder, DEFAULT_ARRIVAL_TTL};

pub use livesync_bus as bus;
pub use livesync_event as event;
pub use livesync_reconcile as reconcile;
pub use livesync_transport as transport;

pub use livesync_transport::ConnectionState;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
