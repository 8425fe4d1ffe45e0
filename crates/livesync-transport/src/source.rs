//! Record sources
//!
//! A [`RecordSource`] is one reconnectable producer of raw change records.
//! The connector drives it: `open`, then `next_record` until it yields
//! `None` or a connection error, then `open` again after a backoff.

use crate::error::TransportError;
use async_trait::async_trait;
use livesync_event::RawRecord;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Reconnectable producer of raw change records
#[async_trait]
pub trait RecordSource: Send {
    /// Establish (or re-establish) the connection
    ///
    /// # Errors
    /// Returns error if the connection cannot be established
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Next record from the open connection
    ///
    /// `None` means the connection ended. `Some(Err(_))` with a
    /// frame-local error leaves the connection usable.
    async fn next_record(&mut self) -> Option<Result<RawRecord, TransportError>>;

    /// Human-readable endpoint for logs
    fn describe(&self) -> String;

    /// Close the connection on shutdown
    async fn close(&mut self) {}
}

#[async_trait]
impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    async fn open(&mut self) -> Result<(), TransportError> {
        (**self).open().await
    }

    async fn next_record(&mut self) -> Option<Result<RawRecord, TransportError>> {
        (**self).next_record().await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    async fn close(&mut self) {
        (**self).close().await;
    }
}

#[derive(Debug)]
enum Feed {
    Record(RawRecord),
    Frame(String),
    Disconnect,
}

/// In-process source fed through a [`ChannelSender`]
///
/// Useful for embedding a producer in the same process and for scripting
/// connection behavior in tests.
#[derive(Debug)]
pub struct ChannelSource {
    name: String,
    rx: mpsc::UnboundedReceiver<Feed>,
    failing_opens: Arc<AtomicU32>,
}

/// Producer half of a [`ChannelSource`]
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Feed>,
    failing_opens: Arc<AtomicU32>,
}

impl ChannelSource {
    /// New source and its sender
    #[must_use]
    pub fn new(name: impl Into<String>) -> (Self, ChannelSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let failing_opens = Arc::new(AtomicU32::new(0));
        (
            Self {
                name: name.into(),
                rx,
                failing_opens: Arc::clone(&failing_opens),
            },
            ChannelSender { tx, failing_opens },
        )
    }
}

#[async_trait]
impl RecordSource for ChannelSource {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.rx.is_closed() && self.rx.is_empty() {
            return Err(TransportError::Closed);
        }
        let pending = self
            .failing_opens
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(TransportError::Connect {
                endpoint: self.describe(),
                reason: "scripted failure".into(),
            });
        }
        Ok(())
    }

    async fn next_record(&mut self) -> Option<Result<RawRecord, TransportError>> {
        match self.rx.recv().await? {
            Feed::Record(record) => Some(Ok(record)),
            Feed::Frame(text) => Some(RawRecord::from_json(&text).map_err(TransportError::from)),
            Feed::Disconnect => None,
        }
    }

    fn describe(&self) -> String {
        format!("channel://{}", self.name)
    }
}

impl ChannelSender {
    /// Deliver a decoded record; `false` once the source is gone
    pub fn send(&self, record: RawRecord) -> bool {
        self.tx.send(Feed::Record(record)).is_ok()
    }

    /// Deliver a text frame to be decoded by the source
    pub fn send_frame(&self, text: impl Into<String>) -> bool {
        self.tx.send(Feed::Frame(text.into())).is_ok()
    }

    /// End the current connection; the source can be reopened
    pub fn disconnect(&self) -> bool {
        self.tx.send(Feed::Disconnect).is_ok()
    }

    /// Make the next `n` opens fail
    pub fn fail_next_opens(&self, n: u32) {
        self.failing_opens.store(n, Ordering::Release);
    }

    /// Whether the source is still alive
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> RawRecord {
        RawRecord::from_json(&format!(
            r#"{{"originName":"devices","rawOperation":"INSERT","row":{{"device_id":"{id}"}}}}"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn delivers_in_order_and_disconnects() {
        let (mut source, tx) = ChannelSource::new("test");
        source.open().await.unwrap();

        tx.send(record("a"));
        tx.send_frame("{not json");
        tx.send(record("b"));
        tx.disconnect();

        let first = source.next_record().await.unwrap().unwrap();
        assert_eq!(first.row.unwrap()["device_id"], "a");
        assert!(source.next_record().await.unwrap().unwrap_err().is_frame_local());
        assert!(source.next_record().await.unwrap().is_ok());
        assert!(source.next_record().await.is_none());
    }

    #[tokio::test]
    async fn scripted_open_failures() {
        let (mut source, tx) = ChannelSource::new("test");
        tx.fail_next_opens(2);
        assert!(source.open().await.is_err());
        assert!(source.open().await.is_err());
        assert!(source.open().await.is_ok());
        assert_eq!(source.describe(), "channel://test");
    }

    #[tokio::test]
    async fn dropped_sender_closes_source() {
        let (mut source, tx) = ChannelSource::new("test");
        drop(tx);
        assert!(source.next_record().await.is_none());
        assert!(matches!(source.open().await, Err(TransportError::Closed)));
    }
}
