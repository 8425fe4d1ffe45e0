//! Collection reconciler
//!
//! Applies one [`ChangeEvent`] to a [`LocalCollection`] and returns the next
//! collection value.
//!
//! # Rules
//! - **Added**: existing id → unchanged. Otherwise project the payload and
//!   insert where the ordering policy says.
//! - **Modified**: existing id → shallow merge, payload wins, position kept
//!   unless the ordering key changed. Absent id → handled as Added.
//! - **Removed**: existing id → removed. Absent or null id → unchanged.
//! - Any other operation → unchanged.
//!
//! `Added`/`Modified` without an id fail with
//! [`ReconcileError::MissingEntityId`].

use crate::collection::{LocalCollection, Slot};
use crate::entity::Entity;
use crate::error::ReconcileError;
use crate::ordering::{NewestFirst, OrderingPolicy};
use livesync_event::{
    ChangeEvent, Clock, EntityId, Operation, Payload, SystemClock, TimestampNormalizer,
};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Why an application left the collection as it was
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unchanged {
    /// Added for an id that is already present
    Duplicate,
    /// Removed for an id that is not present
    Absent,
    /// Removed without an id
    MissingKey,
    /// Modified with nothing new
    NoDifference,
    /// Event belongs to another collection
    ForeignCollection,
    /// Operation is not Added/Modified/Removed
    UnsupportedOperation,
}

/// What an application did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Entity inserted at `index`
    Inserted {
        /// Final position
        index: usize,
    },
    /// Entity updated; `from != to` when the ordering key moved it
    Updated {
        /// Previous position
        from: usize,
        /// Final position
        to: usize,
    },
    /// Entity removed from `index`
    Removed {
        /// Former position
        index: usize,
    },
    /// Nothing changed
    Unchanged(Unchanged),
}

impl Outcome {
    /// Whether the collection changed
    #[inline]
    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged(_))
    }
}

/// Result of applying one event
#[derive(Debug, Clone)]
pub struct Applied<T: Clone> {
    /// Next collection value (shares storage with the input when unchanged)
    pub collection: LocalCollection<T>,
    /// What happened
    pub outcome: Outcome,
}

/// Reusable merge algorithm, parameterized by entity type and ordering
pub struct Reconciler<T, P = NewestFirst> {
    collection: Option<String>,
    ordering: P,
    time_fields: Vec<String>,
    timestamps: TimestampNormalizer<Arc<dyn Clock>>,
    mark_arrivals: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Reconciler<T, NewestFirst> {
    /// Reconciler that prepends new entities
    #[must_use]
    pub fn new() -> Self {
        Self {
            collection: None,
            ordering: NewestFirst,
            time_fields: Vec::new(),
            timestamps: TimestampNormalizer::with_clock(Arc::new(SystemClock)),
            mark_arrivals: true,
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Default for Reconciler<T, NewestFirst> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity, P: OrderingPolicy<T>> Reconciler<T, P> {
    /// Replace the ordering policy
    #[must_use]
    pub fn with_ordering<Q: OrderingPolicy<T>>(self, ordering: Q) -> Reconciler<T, Q> {
        Reconciler {
            collection: self.collection,
            ordering,
            time_fields: self.time_fields,
            timestamps: self.timestamps,
            mark_arrivals: self.mark_arrivals,
            _entity: PhantomData,
        }
    }

    /// Only accept events of one collection
    #[must_use]
    pub fn for_collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Payload fields to normalize to canonical milliseconds
    #[must_use]
    pub fn with_time_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.time_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Clock used when a time field is null
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.timestamps = TimestampNormalizer::with_clock(clock);
        self
    }

    /// Whether inserted entities carry the "just arrived" marker
    #[must_use]
    pub fn mark_arrivals(mut self, mark: bool) -> Self {
        self.mark_arrivals = mark;
        self
    }

    /// Collection this reconciler is bound to, if any
    #[inline]
    #[must_use]
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// Apply one event
    ///
    /// # Errors
    /// - [`ReconcileError::MissingEntityId`] for Added/Modified without an id
    /// - [`ReconcileError::Projection`] if the payload does not fit `T`
    pub fn apply(
        &self,
        current: &LocalCollection<T>,
        event: &ChangeEvent,
    ) -> Result<Applied<T>, ReconcileError> {
        if let Some(expected) = &self.collection {
            if *expected != event.collection {
                return Ok(unchanged(current, Unchanged::ForeignCollection));
            }
        }

        match &event.operation {
            Operation::Added => {
                let id = self.require_id(event)?;
                if current.contains(id.as_str()) {
                    tracing::trace!(collection = %event.collection, id = %id, "duplicate add ignored");
                    return Ok(unchanged(current, Unchanged::Duplicate));
                }
                self.insert(current, event, id)
            }
            Operation::Modified => {
                let id = self.require_id(event)?;
                match current.position(id.as_str()) {
                    Some(index) => self.update(current, event, id, index),
                    None => {
                        tracing::debug!(
                            collection = %event.collection,
                            id = %id,
                            "modify for unknown entity, inserting"
                        );
                        self.insert(current, event, id)
                    }
                }
            }
            Operation::Removed => {
                let Some(id) = &event.entity_id else {
                    tracing::debug!(
                        collection = %event.collection,
                        "remove without entity id left as-is; upstream must send the key"
                    );
                    return Ok(unchanged(current, Unchanged::MissingKey));
                };
                match current.position(id.as_str()) {
                    Some(index) => Ok(Applied {
                        collection: current.with_removed(index),
                        outcome: Outcome::Removed { index },
                    }),
                    None => Ok(unchanged(current, Unchanged::Absent)),
                }
            }
            Operation::Other(tag) => {
                tracing::trace!(collection = %event.collection, tag = %tag, "unsupported operation ignored");
                Ok(unchanged(current, Unchanged::UnsupportedOperation))
            }
        }
    }

    /// Apply a sequence of events, stopping at the first error
    ///
    /// # Errors
    /// Returns the first error together with nothing applied after it
    pub fn apply_all<'a, I>(
        &self,
        current: &LocalCollection<T>,
        events: I,
    ) -> Result<LocalCollection<T>, ReconcileError>
    where
        I: IntoIterator<Item = &'a ChangeEvent>,
    {
        events
            .into_iter()
            .try_fold(current.clone(), |acc, event| {
                self.apply(&acc, event).map(|applied| applied.collection)
            })
    }

    fn require_id<'e>(&self, event: &'e ChangeEvent) -> Result<&'e EntityId, ReconcileError> {
        event
            .entity_id
            .as_ref()
            .ok_or_else(|| ReconcileError::MissingEntityId {
                collection: event.collection.clone(),
                operation: event.operation.clone(),
            })
    }

    fn insert(
        &self,
        current: &LocalCollection<T>,
        event: &ChangeEvent,
        id: &EntityId,
    ) -> Result<Applied<T>, ReconcileError> {
        let payload = self.prepared_payload(event, None);
        let entity = T::from_payload(id, &payload).map_err(|source| ReconcileError::Projection {
            collection: event.collection.clone(),
            id: id.clone(),
            source,
        })?;

        let index = self.ordering.insert_index(current, &entity);
        let slot = Slot {
            entity,
            just_arrived: self.mark_arrivals,
        };
        let collection = current.with_inserted(index, slot);
        let index = collection.position(id.as_str()).unwrap_or(index);

        Ok(Applied {
            collection,
            outcome: Outcome::Inserted { index },
        })
    }

    fn update(
        &self,
        current: &LocalCollection<T>,
        event: &ChangeEvent,
        id: &EntityId,
        index: usize,
    ) -> Result<Applied<T>, ReconcileError> {
        let existing = current.slot_at(index);
        let payload = self.prepared_payload(event, Some(&existing.entity));
        let merged = existing
            .entity
            .merged(&payload)
            .map_err(|source| ReconcileError::Projection {
                collection: event.collection.clone(),
                id: id.clone(),
                source,
            })?;

        if merged == existing.entity {
            return Ok(unchanged(current, Unchanged::NoDifference));
        }

        let moved = self.ordering.key_changed(&existing.entity, &merged);
        let slot = Slot {
            entity: merged,
            just_arrived: existing.just_arrived,
        };

        if !moved {
            return Ok(Applied {
                collection: current.with_replaced(index, slot),
                outcome: Outcome::Updated {
                    from: index,
                    to: index,
                },
            });
        }

        let without = current.with_removed(index);
        let target = self.ordering.insert_index(&without, &slot.entity);
        let collection = without.with_inserted(target, slot);
        let to = collection.position(id.as_str()).unwrap_or(target);

        Ok(Applied {
            collection,
            outcome: Outcome::Updated { from: index, to },
        })
    }

    /// Payload with time fields normalized
    ///
    /// A null time field is stamped with the clock only when nothing is
    /// stored yet; on an existing entity it keeps the stored value.
    fn prepared_payload(&self, event: &ChangeEvent, existing: Option<&T>) -> Payload {
        let mut payload = event.payload.clone().unwrap_or_default();
        let mut stored: Option<Payload> = None;
        for field in &self.time_fields {
            let Some(value) = payload.get_mut(field) else {
                continue;
            };
            if value.is_null() {
                if let Some(entity) = existing {
                    let fields = stored.get_or_insert_with(|| stored_fields(entity));
                    if let Some(previous) = fields.get(field).filter(|v| !v.is_null()) {
                        *value = previous.clone();
                        continue;
                    }
                }
            }
            let ts = self.timestamps.normalize(&*value);
            *value = Value::from(ts.as_millis());
        }
        payload
    }
}

fn stored_fields<T: Entity>(entity: &T) -> Payload {
    match serde_json::to_value(entity) {
        Ok(Value::Object(map)) => map,
        _ => Payload::new(),
    }
}

fn unchanged<T: Entity>(current: &LocalCollection<T>, reason: Unchanged) -> Applied<T> {
    Applied {
        collection: current.clone(),
        outcome: Outcome::Unchanged(reason),
    }
}

impl<T, P: fmt::Debug> fmt::Debug for Reconciler<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("collection", &self.collection)
            .field("ordering", &self.ordering)
            .field("time_fields", &self.time_fields)
            .field("mark_arrivals", &self.mark_arrivals)
            .finish_non_exhaustive()
    }
}
