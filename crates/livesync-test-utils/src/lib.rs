//! Testing utilities for the livesync workspace
//!
//! Envelope fixtures, a recording listener, and scripted sources.

#![allow(missing_docs)]

use livesync_event::{ChangeEvent, RawRecord};
use livesync_transport::{ChannelSender, ChannelSource};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn envelope(origin: &str, operation: &str, row: Option<Value>) -> RawRecord {
    let row = row.map(|row| match row {
        Value::Object(map) => map,
        other => panic!("fixture row must be an object, got {other}"),
    });
    RawRecord::new(origin, operation, row)
}

pub fn envelope_json(origin: &str, operation: &str, row: &Value) -> String {
    json!({ "originName": origin, "rawOperation": operation, "row": row }).to_string()
}

pub fn insert(origin: &str, row: Value) -> RawRecord {
    envelope(origin, "INSERT", Some(row))
}

pub fn update(origin: &str, row: Value) -> RawRecord {
    envelope(origin, "UPDATE", Some(row))
}

pub fn delete(origin: &str, row: Value) -> RawRecord {
    envelope(origin, "DELETE", Some(row))
}

pub fn delete_without_row(origin: &str) -> RawRecord {
    envelope(origin, "DELETE", None)
}

pub fn device_row(id: &str, status: &str) -> Value {
    json!({ "device_id": id, "status": status })
}

/// Listener that keeps every event it sees
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> impl Fn(&ChangeEvent) + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        move |event| events.lock().push(event.clone())
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    pub fn ids(&self) -> Vec<Option<String>> {
        self.events
            .lock()
            .iter()
            .map(|e| e.entity_id_str().map(str::to_string))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

pub fn scripted_source() -> (ChannelSource, ChannelSender) {
    ChannelSource::new("scripted")
}

pub fn send_all(sender: &ChannelSender, records: impl IntoIterator<Item = RawRecord>) {
    for record in records {
        assert!(sender.send(record), "scripted source is gone");
    }
}
