//! livesync command implementations
//!
//! Kept apart from `main.rs` so they can be tested without a terminal.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

use anyhow::Context;
use livesync_core::bus::{Filter, Subscription};
use livesync_core::event::{
    CanonicalTimestamp, ChangeEvent, Clock, EnvelopeNormalizer, RawRecord, TimestampNormalizer,
};
use livesync_core::{ConnectionState, FeedConfig, LiveFeed};
use parking_lot::Mutex;
use serde_json::Value;
use std::io::{BufRead, Write};

/// Counters from a `normalize` run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeSummary {
    /// Lines converted
    pub written: usize,
    /// Lines that were not envelopes
    pub skipped: usize,
}

/// Convert JSON-lines envelopes into JSON-lines change events
///
/// Blank lines are ignored; undecodable lines are logged and skipped.
///
/// # Errors
/// Returns error if reading input or writing output fails
pub fn normalize_lines<R: BufRead, W: Write>(
    normalizer: &EnvelopeNormalizer,
    input: R,
    mut output: W,
    pretty: bool,
) -> anyhow::Result<NormalizeSummary> {
    let mut summary = NormalizeSummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line.context("reading input")?;
        if line.trim().is_empty() {
            continue;
        }
        let raw = match RawRecord::from_json(&line) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "skipping line");
                summary.skipped += 1;
                continue;
            }
        };
        write_event(&mut output, &normalizer.normalize(raw), pretty)?;
        summary.written += 1;
    }

    output.flush().context("flushing output")?;
    Ok(summary)
}

/// Canonical value of a timestamp literal
///
/// The literal is read as JSON when possible (`1700000000`,
/// `{"seconds":1700000000}`, `null`) and as plain text otherwise.
#[must_use]
pub fn timestamp_literal<C: Clock>(normalizer: &TimestampNormalizer<C>, literal: &str) -> CanonicalTimestamp {
    let value = serde_json::from_str::<Value>(literal.trim())
        .unwrap_or_else(|_| Value::String(literal.trim().to_string()));
    normalizer.normalize(&value)
}

/// Print every event of `feed` that passes `filter` to `output`
///
/// Printing stops when the returned subscription is dropped.
pub fn print_events<W>(feed: &LiveFeed, filter: Filter, pretty: bool, output: W) -> Subscription
where
    W: Write + Send + 'static,
{
    let output = Mutex::new(output);
    feed.subscribe(filter, move |event| {
        if let Err(e) = write_event(&mut *output.lock(), event, pretty) {
            tracing::error!(error = %e, "cannot write event");
        }
    })
}

/// Follow a WebSocket feed and print matching events until Ctrl-C
///
/// # Errors
/// Returns error if no endpoint is configured or the feed cannot start
pub async fn tail(config: &FeedConfig, filter: Filter, pretty: bool) -> anyhow::Result<()> {
    if config.endpoint.is_none() {
        anyhow::bail!("no endpoint: pass --endpoint or set `endpoint` in the config file");
    }

    let feed = LiveFeed::from_config(config);
    let _printer = print_events(&feed, filter, pretty, std::io::stdout());
    feed.connect().context("starting change feed")?;

    let mut states = feed.state_changes();
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                match state {
                    ConnectionState::Connected => tracing::info!("connected"),
                    ConnectionState::Disconnected => tracing::warn!("disconnected, reconnecting"),
                    ConnectionState::Error => tracing::warn!("connection failed, retrying"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl-C")?;
                break;
            }
        }
    }

    feed.shutdown().await;
    Ok(())
}

fn write_event<W: Write>(output: &mut W, event: &ChangeEvent, pretty: bool) -> anyhow::Result<()> {
    if pretty {
        serde_json::to_writer_pretty(&mut *output, event)?;
    } else {
        serde_json::to_writer(&mut *output, event)?;
    }
    writeln!(output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesync_core::event::{FixedClock, Operation};
    use livesync_test_utils::{device_row, envelope_json, insert};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn events(&self) -> Vec<ChangeEvent> {
            String::from_utf8(self.0.lock().clone())
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    #[test]
    fn normalize_lines_converts_and_skips() {
        let input = format!(
            "{}\n\nnot json\n{}\n",
            envelope_json("tbl_devices", "INSERT", &device_row("D1", "active")),
            r#"{"table":"public.tbl_sessions","type":"u","record":{"session_id":42}}"#,
        );
        let mut out = Vec::new();
        let summary =
            normalize_lines(&EnvelopeNormalizer::new(), input.as_bytes(), &mut out, false).unwrap();
        assert_eq!(summary, NormalizeSummary { written: 2, skipped: 1 });

        let events: Vec<ChangeEvent> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events[0].collection, "devices");
        assert_eq!(events[0].entity_id_str(), Some("D1"));
        assert_eq!(events[1].collection, "transactions");
        assert_eq!(events[1].operation, Operation::Modified);
        assert_eq!(events[1].entity_id_str(), Some("42"));
    }

    #[test]
    fn timestamp_literals() {
        let n = TimestampNormalizer::with_clock(FixedClock(7));
        for literal in [
            r#"{"seconds":1700000000,"nanoseconds":0}"#,
            "2023-11-14T22:13:20.000Z",
            "1700000000000",
            "1700000000",
        ] {
            assert_eq!(timestamp_literal(&n, literal).as_millis(), 1_700_000_000_000, "{literal}");
        }
        assert_eq!(timestamp_literal(&n, "null").as_millis(), 7);
        assert_eq!(timestamp_literal(&n, "whenever").as_millis(), 7);
    }

    #[test]
    fn printer_follows_feed_dispatch() {
        let feed = LiveFeed::new();
        let everything = SharedBuf::default();
        let one_device = SharedBuf::default();
        let _all = print_events(&feed, Filter::all(), false, everything.clone());
        let _d2 = print_events(&feed, Filter::entity("devices", "D2"), false, one_device.clone());

        feed.ingest(insert("tbl_devices", device_row("D1", "a")));
        feed.ingest(insert("tbl_devices", device_row("D2", "b")));
        feed.ingest(insert("tbl_reports", json!({"report_id": "R1"})));

        let all = everything.events();
        assert_eq!(
            all.iter().map(|e| e.collection.as_str()).collect::<Vec<_>>(),
            vec!["devices", "devices", "reports"]
        );
        let d2 = one_device.events();
        assert_eq!(d2.len(), 1);
        assert_eq!(d2[0].entity_id_str(), Some("D2"));
        assert_eq!(d2[0].operation, Operation::Added);
    }

    #[test]
    fn printer_stops_when_dropped() {
        let feed = LiveFeed::new();
        let out = SharedBuf::default();
        let printer = print_events(&feed, Filter::all(), false, out.clone());
        feed.ingest(insert("devices", device_row("D1", "a")));
        drop(printer);
        feed.ingest(insert("devices", device_row("D2", "a")));
        assert_eq!(out.events().len(), 1);
    }

    #[tokio::test]
    async fn tail_requires_endpoint() {
        let err = tail(&FeedConfig::default(), Filter::all(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no endpoint"));
    }
}
