//! Envelope normalization
//!
//! Provides [`EnvelopeNormalizer`], which turns a [`RawRecord`] into a
//! [`ChangeEvent`] using two explicit tables:
//!
//! - origin name → collection name
//! - collection name → [`IdExtractor`] (ordered identifier field names)
//!
//! Normalization never fails. Unknown origin names pass through as the
//! collection name, unknown operation tags pass through lower-cased, and an
//! unresolvable identifier becomes `None`.

use crate::event::{ChangeEvent, EntityId, Operation, Origin, Payload, RawRecord};
use std::collections::HashMap;

/// Built-in origin → collection table
const COLLECTION_TABLE: &[(&str, &str)] = &[
    ("devices", "devices"),
    ("tbl_devices", "devices"),
    ("transactions", "transactions"),
    ("tbl_transactions", "transactions"),
    ("sessions", "transactions"),
    ("tbl_sessions", "transactions"),
    ("reports", "reports"),
    ("tbl_reports", "reports"),
    ("contact_messages", "contactMessages"),
    ("tbl_contact_messages", "contactMessages"),
    ("device_config", "deviceConfig"),
    ("tbl_device_config", "deviceConfig"),
    ("device_telemetry", "deviceTelemetry"),
    ("tbl_device_telemetry", "deviceTelemetry"),
];

/// Built-in collection → identifier fields table
const EXTRACTOR_TABLE: &[(&str, &[&str])] = &[
    ("devices", &["device_id", "deviceId", "id"]),
    (
        "transactions",
        &["transaction_id", "session_id", "transactionId", "id"],
    ),
    ("reports", &["report_id", "reportId", "id"]),
    ("contactMessages", &["message_id", "messageId", "id"]),
    ("deviceConfig", &["config_id", "device_id", "id"]),
    ("deviceTelemetry", &["telemetry_id", "id", "device_id"]),
];

/// Fields tried for collections without an explicit rule
const DEFAULT_ID_FIELDS: &[&str] = &["id"];

/// Map a source operation tag to an [`Operation`]
///
/// Case-insensitive. Besides SQL verbs this accepts Debezium single-letter
/// ops and document-store change types.
#[must_use]
pub fn map_operation(tag: &str) -> Operation {
    let lower = tag.trim().to_ascii_lowercase();
    match lower.as_str() {
        "insert" | "added" | "create" | "c" | "r" => Operation::Added,
        "update" | "modified" | "u" => Operation::Modified,
        "delete" | "removed" | "d" => Operation::Removed,
        _ => Operation::Other(lower),
    }
}

/// Ordered identifier resolution rule for one collection
///
/// Resolution order:
/// 1. each configured field name, in order
/// 2. the first field whose key ends in `_id`
/// 3. the first value in the row
///
/// Only scalar values qualify at every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdExtractor {
    fields: Vec<String>,
}

impl IdExtractor {
    /// Create extractor from field names (tried in order)
    #[must_use]
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Configured field names
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Resolve the identifier from a row
    #[must_use]
    pub fn extract(&self, row: &Payload) -> Option<EntityId> {
        self.fields
            .iter()
            .find_map(|f| row.get(f).and_then(EntityId::from_scalar))
            .or_else(|| {
                row.iter()
                    .filter(|(k, _)| k.ends_with("_id"))
                    .find_map(|(_, v)| EntityId::from_scalar(v))
            })
            .or_else(|| row.values().find_map(EntityId::from_scalar))
    }
}

impl Default for IdExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_ID_FIELDS.iter().copied())
    }
}

/// Converts raw records into canonical change events
#[derive(Debug, Clone)]
pub struct EnvelopeNormalizer {
    collections: HashMap<String, String>,
    extractors: HashMap<String, IdExtractor>,
    fallback: IdExtractor,
}

impl EnvelopeNormalizer {
    /// Normalizer with the built-in tables
    #[must_use]
    pub fn new() -> Self {
        let collections = COLLECTION_TABLE
            .iter()
            .map(|(origin, collection)| ((*origin).to_string(), (*collection).to_string()))
            .collect();
        let extractors = EXTRACTOR_TABLE
            .iter()
            .map(|(collection, fields)| {
                ((*collection).to_string(), IdExtractor::new(fields.iter().copied()))
            })
            .collect();

        Self {
            collections,
            extractors,
            fallback: IdExtractor::default(),
        }
    }

    /// Normalizer with empty tables (every name passes through)
    #[must_use]
    pub fn empty() -> Self {
        Self {
            collections: HashMap::new(),
            extractors: HashMap::new(),
            fallback: IdExtractor::default(),
        }
    }

    /// Map an additional origin name onto a collection
    #[must_use]
    pub fn with_alias(mut self, origin: impl Into<String>, collection: impl Into<String>) -> Self {
        self.register_alias(origin, collection);
        self
    }

    /// Set the identifier rule for a collection
    #[must_use]
    pub fn with_extractor(mut self, collection: impl Into<String>, extractor: IdExtractor) -> Self {
        self.register_extractor(collection, extractor);
        self
    }

    /// Map an additional origin name onto a collection
    pub fn register_alias(&mut self, origin: impl Into<String>, collection: impl Into<String>) {
        self.collections.insert(origin.into(), collection.into());
    }

    /// Set the identifier rule for a collection
    pub fn register_extractor(&mut self, collection: impl Into<String>, extractor: IdExtractor) {
        self.extractors.insert(collection.into(), extractor);
    }

    /// Resolve the collection for an origin name
    ///
    /// Tries the exact name, then the name with its schema qualifier
    /// (`public.`) removed. A name found in neither form passes through
    /// unchanged, qualifier included.
    #[must_use]
    pub fn collection_for(&self, origin_name: &str) -> String {
        let origin_name = origin_name.trim();
        if let Some(c) = self.collections.get(origin_name) {
            return c.clone();
        }

        origin_name
            .rsplit_once('.')
            .and_then(|(_, table)| self.collections.get(table))
            .cloned()
            .unwrap_or_else(|| origin_name.to_string())
    }

    /// Identifier rule for a collection
    #[must_use]
    pub fn extractor_for(&self, collection: &str) -> &IdExtractor {
        self.extractors.get(collection).unwrap_or(&self.fallback)
    }

    /// Normalize a raw record
    #[must_use]
    pub fn normalize(&self, raw: RawRecord) -> ChangeEvent {
        let collection = self.collection_for(&raw.origin_name);
        let operation = map_operation(&raw.raw_operation);
        let entity_id = raw
            .row
            .as_ref()
            .and_then(|row| self.extractor_for(&collection).extract(row));

        if !operation.is_known() {
            tracing::debug!(
                origin = %raw.origin_name,
                tag = %raw.raw_operation,
                "unrecognized operation tag, passing through"
            );
        }
        if entity_id.is_none() {
            tracing::debug!(
                collection = %collection,
                operation = %operation,
                has_row = raw.row.is_some(),
                "could not resolve entity id"
            );
        }

        ChangeEvent {
            collection,
            operation,
            entity_id,
            payload: raw.row,
            origin: Origin {
                origin_name: raw.origin_name,
                raw_operation: raw.raw_operation,
            },
        }
    }
}

impl Default for EnvelopeNormalizer {
    fn default() -> Self {
        Self::new()
    }
}
