//! Transport connector
//!
//! Owns one long-lived connection. [`TransportConnector::connect`] spawns a
//! single reader task and returns at once; every record the source yields
//! is handed to the dispatch callback on that task, in arrival order.
//!
//! State machine:
//!
//! ```text
//! Disconnected ──open ok──► Connected ──closed/read error──► Disconnected
//!      │   ▲                                                     │
//!      │   └──────────────────── backoff ◄───────────────────────┘
//!      └──open failed──► Error ── backoff ──► (retry open)
//! ```

use crate::backoff::{Backoff, ReconnectPolicy};
use crate::error::TransportError;
use crate::source::RecordSource;
use livesync_event::RawRecord;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection state signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Source is open and delivering
    Connected,
    /// Not connected (initial, after a close, after shutdown)
    #[default]
    Disconnected,
    /// Last open attempt failed
    Error,
}

impl ConnectionState {
    /// Lower-case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives a [`RecordSource`] with reconnect and exposes its state
pub struct TransportConnector {
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TransportConnector {
    /// Connector with the given reconnect policy
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            policy,
            state: Arc::new(state),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Reconnect policy
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Start the reader task
    ///
    /// Must be called from within a tokio runtime. Returns immediately.
    ///
    /// # Errors
    /// [`TransportError::AlreadyStarted`] if a reader task is running
    pub fn connect<S, F>(&self, source: S, on_record: F) -> Result<(), TransportError>
    where
        S: RecordSource + 'static,
        F: FnMut(RawRecord) + Send + 'static,
    {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(TransportError::AlreadyStarted);
        }

        self.shutdown.send_replace(false);
        let reader = Reader {
            policy: self.policy,
            state: Arc::clone(&self.state),
            shutdown: self.shutdown.subscribe(),
        };
        *task = Some(tokio::spawn(reader.run(source, on_record)));
        Ok(())
    }

    /// Current state
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state transition
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Whether a reader task is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the reader task and wait for it
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "reader task ended abnormally");
            }
        }
        set_state(&self.state, ConnectionState::Disconnected);
    }
}

impl Default for TransportConnector {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

impl Drop for TransportConnector {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl fmt::Debug for TransportConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConnector")
            .field("state", &self.connection_state())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn set_state(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        debug!(from = %current, to = %next, "connection state");
        *current = next;
        true
    });
}

struct Reader {
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: watch::Receiver<bool>,
}

impl Reader {
    async fn run<S, F>(mut self, mut source: S, mut on_record: F)
    where
        S: RecordSource,
        F: FnMut(RawRecord),
    {
        let endpoint = source.describe();
        let mut backoff = Backoff::new(self.policy);

        'outer: loop {
            if *self.shutdown.borrow() {
                break;
            }

            let opened = tokio::select! {
                result = source.open() => result,
                _ = self.shutdown.changed() => break,
            };

            match opened {
                Ok(()) => {
                    backoff.reset();
                    info!(endpoint = %endpoint, "change feed connected");
                    set_state(&self.state, ConnectionState::Connected);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, attempt = backoff.attempt() + 1, "connect failed");
                    set_state(&self.state, ConnectionState::Error);
                    if !self.pause(&mut backoff).await {
                        break;
                    }
                    continue;
                }
            }

            loop {
                tokio::select! {
                    next = source.next_record() => match next {
                        Some(Ok(record)) => on_record(record),
                        Some(Err(e)) if e.is_frame_local() => {
                            warn!(endpoint = %endpoint, error = %e, "skipping frame");
                        }
                        Some(Err(e)) => {
                            warn!(endpoint = %endpoint, error = %e, "connection lost");
                            break;
                        }
                        None => {
                            info!(endpoint = %endpoint, "connection closed");
                            break;
                        }
                    },
                    _ = self.shutdown.changed() => {
                        source.close().await;
                        break 'outer;
                    }
                }
            }

            set_state(&self.state, ConnectionState::Disconnected);
            if !self.pause(&mut backoff).await {
                break;
            }
        }

        set_state(&self.state, ConnectionState::Disconnected);
        debug!(endpoint = %endpoint, "reader stopped");
    }

    /// Sleep for the next backoff delay; `false` if shut down meanwhile
    async fn pause(&mut self, backoff: &mut Backoff) -> bool {
        let delay = backoff.next_delay();
        debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "reconnecting after delay");
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            _ = self.shutdown.changed() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ChannelSource;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn record(id: &str) -> RawRecord {
        RawRecord::from_json(&format!(
            r#"{{"originName":"tbl_devices","rawOperation":"INSERT","row":{{"device_id":"{id}"}}}}"#
        ))
        .unwrap()
    }

    fn connector() -> TransportConnector {
        TransportConnector::new(
            ReconnectPolicy::default()
                .with_initial_delay(Duration::from_millis(100))
                .with_jitter(false),
        )
    }

    fn id_of(record: &RawRecord) -> String {
        record.row.as_ref().unwrap()["device_id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn connect_returns_immediately_and_delivers_in_order() {
        let connector = connector();
        let (source, tx) = ChannelSource::new("feed");
        let (out_tx, mut out) = mpsc::unbounded_channel();

        assert_eq!(connector.connection_state(), ConnectionState::Disconnected);
        connector
            .connect(source, move |r| {
                let _ = out_tx.send(r);
            })
            .unwrap();

        let mut states = connector.state_changes();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        for id in ["a", "b", "c"] {
            tx.send(record(id));
        }
        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(id_of(&out.recv().await.unwrap()));
        }
        assert_eq!(got, vec!["a", "b", "c"]);

        connector.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_opens_report_error_then_recover() {
        let connector = connector();
        let (source, tx) = ChannelSource::new("feed");
        tx.fail_next_opens(3);

        let mut states = connector.state_changes();
        connector.connect(source, |_| {}).unwrap();

        states.wait_for(|s| *s == ConnectionState::Error).await.unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        connector.shutdown().await;
        assert_eq!(connector.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_close() {
        let connector = connector();
        let (source, tx) = ChannelSource::new("feed");
        let (out_tx, mut out) = mpsc::unbounded_channel();

        let mut states = connector.state_changes();
        connector
            .connect(source, move |r| {
                let _ = out_tx.send(r);
            })
            .unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        tx.disconnect();
        states
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        tx.send(record("after"));
        assert_eq!(id_of(&out.recv().await.unwrap()), "after");

        connector.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_frames_are_skipped() {
        let connector = connector();
        let (source, tx) = ChannelSource::new("feed");
        let (out_tx, mut out) = mpsc::unbounded_channel();

        let mut states = connector.state_changes();
        connector
            .connect(source, move |r| {
                let _ = out_tx.send(r);
            })
            .unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        tx.send_frame("garbage");
        tx.send_frame(r#"{"table":"tbl_devices","eventType":"UPDATE","record":{"device_id":"x"}}"#);

        assert_eq!(id_of(&out.recv().await.unwrap()), "x");
        assert_eq!(connector.connection_state(), ConnectionState::Connected);

        connector.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_delivery() {
        let connector = connector();
        let (source, tx) = ChannelSource::new("feed");

        let mut states = connector.state_changes();
        connector.connect(source, |_| {}).unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        assert!(connector.is_running());

        connector.shutdown().await;
        assert!(!connector.is_running());
        assert_eq!(connector.connection_state(), ConnectionState::Disconnected);
        assert!(!tx.send(record("late")));
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let connector = connector();
        let (a, _tx_a) = ChannelSource::new("a");
        let (b, _tx_b) = ChannelSource::new("b");

        connector.connect(a, |_| {}).unwrap();
        assert!(matches!(
            connector.connect(b, |_| {}),
            Err(TransportError::AlreadyStarted)
        ));
        connector.shutdown().await;
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Error.to_string(), "error");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
