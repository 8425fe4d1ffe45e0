//! Canonical change events and the raw wire envelope
//!
//! Provides [`RawRecord`] (what the transport receives) and [`ChangeEvent`]
//! (what the rest of the system consumes).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Open, string-keyed row data carried by a change
pub type Payload = Map<String, Value>;

/// Stable identifier of an entity within its collection
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create identifier from any string-like value
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Render a scalar JSON value as an identifier
    ///
    /// Returns `None` for null, arrays, objects and empty strings.
    #[must_use]
    pub fn from_scalar(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            Value::Bool(b) => Some(Self(b.to_string())),
            _ => None,
        }
    }

    /// Borrow as `&str`
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<str> for EntityId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for EntityId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Canonical change operation
///
/// Tags that do not map onto the three known operations are carried as
/// [`Operation::Other`] holding the lower-cased source tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    /// Entity was created
    Added,
    /// Entity fields changed
    Modified,
    /// Entity was deleted
    Removed,
    /// Unrecognized source tag (lower-cased)
    Other(String),
}

impl Operation {
    /// Canonical name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Added => "Added",
            Self::Modified => "Modified",
            Self::Removed => "Removed",
            Self::Other(tag) => tag,
        }
    }

    /// Whether this is one of the three known operations
    #[inline]
    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Operation {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Added" => Self::Added,
            "Modified" => Self::Modified,
            "Removed" => Self::Removed,
            _ => Self::Other(s),
        }
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

/// Untranslated origin of an event, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    /// Table or entity name as sent by the source
    pub origin_name: String,
    /// Operation tag as sent by the source
    pub raw_operation: String,
}

/// Canonical, source-independent change event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Logical entity type
    pub collection: String,
    /// What happened
    pub operation: Operation,
    /// Affected entity, if it could be determined
    pub entity_id: Option<EntityId>,
    /// Changed row data, if the source sent one
    pub payload: Option<Payload>,
    /// Source naming, for diagnostics only
    pub origin: Origin,
}

impl ChangeEvent {
    /// Create event without going through the normalizer
    #[must_use]
    pub fn new(collection: impl Into<String>, operation: Operation) -> Self {
        let collection = collection.into();
        let raw_operation = operation.as_str().to_string();
        Self {
            origin: Origin {
                origin_name: collection.clone(),
                raw_operation,
            },
            collection,
            operation,
            entity_id: None,
            payload: None,
        }
    }

    /// With entity id
    #[inline]
    #[must_use]
    pub fn with_entity_id(mut self, id: impl Into<EntityId>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    /// With payload
    #[inline]
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Entity id as `&str`
    #[inline]
    #[must_use]
    pub fn entity_id_str(&self) -> Option<&str> {
        self.entity_id.as_ref().map(EntityId::as_str)
    }
}

/// Source-specific change record, as received on the wire
///
/// Accepts the canonical field names (`originName`, `rawOperation`, `row`)
/// as well as postgres-changes style names (`table`, `eventType`,
/// `record`/`new`, `old_record`/`old`). When no usable new row is present,
/// the old row is used instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope", rename_all = "camelCase")]
pub struct RawRecord {
    /// Table or entity name
    pub origin_name: String,
    /// Operation tag (`INSERT`, `UPDATE`, `DELETE`, ...)
    pub raw_operation: String,
    /// Row data, absent for some deletes
    pub row: Option<Payload>,
}

impl RawRecord {
    /// Create record
    #[must_use]
    pub fn new(
        origin_name: impl Into<String>,
        raw_operation: impl Into<String>,
        row: Option<Payload>,
    ) -> Self {
        Self {
            origin_name: origin_name.into(),
            raw_operation: raw_operation.into(),
            row,
        }
    }

    /// Decode a single JSON envelope
    ///
    /// # Errors
    /// Returns error if the text is not a JSON object envelope
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Decode a single JSON envelope from bytes
    ///
    /// # Errors
    /// Returns error if the bytes are not a JSON object envelope
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(default, rename = "originName", alias = "origin_name", alias = "table")]
    origin_name: String,

    #[serde(
        default,
        rename = "rawOperation",
        alias = "raw_operation",
        alias = "eventType",
        alias = "type",
        alias = "op"
    )]
    raw_operation: String,

    #[serde(default, rename = "row", alias = "record", alias = "new")]
    row: Option<Value>,

    #[serde(default, rename = "old", alias = "old_record")]
    old: Option<Value>,
}

impl TryFrom<WireEnvelope> for RawRecord {
    type Error = String;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let row = non_empty_object(wire.row).or_else(|| non_empty_object(wire.old));
        Ok(Self {
            origin_name: wire.origin_name,
            raw_operation: wire.raw_operation,
            row,
        })
    }
}

fn non_empty_object(value: Option<Value>) -> Option<Payload> {
    match value {
        Some(Value::Object(map)) if !map.is_empty() => Some(map),
        _ => None,
    }
}
