//! livesync event model
//!
//! The canonical shape every change takes inside livesync, and the two
//! normalizers that produce it.
//!
//! # Core Concepts
//!
//! - [`RawRecord`]: source-specific change record from the wire
//! - [`EnvelopeNormalizer`]: raw record → [`ChangeEvent`]
//! - [`IdExtractor`]: per-collection identifier resolution rule
//! - [`TimestampNormalizer`]: any timestamp encoding → [`CanonicalTimestamp`]
//!
//! # Example
//!
//! ```rust,ignore
//! use livesync_event::{EnvelopeNormalizer, RawRecord, Operation};
//!
//! let normalizer = EnvelopeNormalizer::new();
//! let raw = RawRecord::from_json(
//!     r#"{"originName":"tbl_devices","rawOperation":"INSERT","row":{"device_id":"D1"}}"#,
//! )?;
//! let event = normalizer.normalize(raw);
//! assert_eq!(event.collection, "devices");
//! assert_eq!(event.operation, Operation::Added);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod event;
pub mod normalizer;
pub mod timestamp;

pub use event::{ChangeEvent, EntityId, Operation, Origin, Payload, RawRecord};
pub use normalizer::{map_operation, EnvelopeNormalizer, IdExtractor};
pub use timestamp::{
    normalize as normalize_timestamp, CanonicalTimestamp, Clock, FixedClock, SystemClock,
    TimestampInput, TimestampNormalizer, SECONDS_THRESHOLD,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
