//! Entity projection
//!
//! An [`Entity`] is a consumer's strongly-typed view of a payload. The
//! default projection goes through serde: the payload map, with `id` set to
//! the resolved entity id, is deserialized into `Self`.

use livesync_event::{EntityId, Payload};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field that carries the entity identifier after projection
pub const ID_FIELD: &str = "id";

/// Item of a [`LocalCollection`](crate::LocalCollection)
pub trait Entity: Clone + PartialEq + Serialize + DeserializeOwned {
    /// Identifier, equal to the `entity_id` of the events that touch it
    fn id(&self) -> &str;

    /// Build a new entity from an event payload
    ///
    /// # Errors
    /// Returns error if the payload does not fit `Self`
    fn from_payload(id: &EntityId, payload: &Payload) -> Result<Self, serde_json::Error> {
        let mut fields = payload.clone();
        fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        serde_json::from_value(Value::Object(fields))
    }

    /// Shallow union of `self` and `payload`, payload wins on conflict
    ///
    /// The identifier is never changed by a merge.
    ///
    /// # Errors
    /// Returns error if the merged fields do not fit `Self`
    fn merged(&self, payload: &Payload) -> Result<Self, serde_json::Error> {
        let mut fields = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let id = fields.get(ID_FIELD).cloned();

        for (key, value) in payload {
            fields.insert(key.clone(), value.clone());
        }
        if let Some(id) = id {
            fields.insert(ID_FIELD.to_string(), id);
        }

        serde_json::from_value(Value::Object(fields))
    }
}

/// Schemaless entity for collections without a typed projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicEntity {
    /// Resolved entity id
    pub id: String,
    /// Every other field, in source order
    #[serde(flatten)]
    pub fields: Payload,
}

impl DynamicEntity {
    /// Create entity with no fields
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// With a field
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Field value
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

impl Entity for DynamicEntity {
    fn id(&self) -> &str {
        &self.id
    }

    fn from_payload(id: &EntityId, payload: &Payload) -> Result<Self, serde_json::Error> {
        let mut fields = payload.clone();
        fields.remove(ID_FIELD);
        Ok(Self {
            id: id.to_string(),
            fields,
        })
    }

    fn merged(&self, payload: &Payload) -> Result<Self, serde_json::Error> {
        let mut fields = self.fields.clone();
        for (key, value) in payload {
            if key != ID_FIELD {
                fields.insert(key.clone(), value.clone());
            }
        }
        Ok(Self {
            id: self.id.clone(),
            fields,
        })
    }
}
