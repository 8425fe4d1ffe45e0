//! livesync transport
//!
//! One long-lived connection to a change-notification source, with
//! automatic reconnect and an observable connection state.
//!
//! # Core Concepts
//!
//! - [`RecordSource`]: reconnectable producer of raw change records
//!   ([`WebSocketSource`], [`ChannelSource`])
//! - [`TransportConnector`]: reader task, backoff, [`ConnectionState`]
//!   signal
//! - [`ReconnectPolicy`]: bounded exponential backoff, unlimited retries
//!
//! # Example
//!
//! ```rust,ignore
//! use livesync_transport::{ReconnectPolicy, TransportConnector, WebSocketSource};
//!
//! let connector = TransportConnector::new(ReconnectPolicy::default());
//! connector.connect(WebSocketSource::new("wss://feed.example/changes"), |raw| {
//!     println!("{} {}", raw.origin_name, raw.raw_operation);
//! })?;
//!
//! let mut states = connector.state_changes();
//! while states.changed().await.is_ok() {
//!     println!("feed is {}", *states.borrow());
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod backoff;
pub mod connector;
pub mod error;
pub mod source;
pub mod websocket;

pub use backoff::{Backoff, ReconnectPolicy};
pub use connector::{ConnectionState, TransportConnector};
pub use error::TransportError;
pub use source::{ChannelSender, ChannelSource, RecordSource};
pub use websocket::WebSocketSource;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
