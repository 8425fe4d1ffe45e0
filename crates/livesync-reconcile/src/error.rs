//! Error types for reconciliation

use livesync_event::{EntityId, Operation};

/// Reconciliation failures the consumer must handle
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// An entity cannot be inserted or updated without a key
    #[error("{operation} event for '{collection}' carries no entity id")]
    MissingEntityId {
        /// Event collection
        collection: String,
        /// Event operation
        operation: Operation,
    },

    /// Payload could not be projected into the consumer's entity type
    #[error("cannot project payload for {collection}/{id}: {source}")]
    Projection {
        /// Event collection
        collection: String,
        /// Affected entity
        id: EntityId,
        /// Underlying serde failure
        #[source]
        source: serde_json::Error,
    },
}

impl ReconcileError {
    /// Whether a full refetch would resolve this
    ///
    /// Missing ids are an upstream contract violation; refetching is the
    /// only way to recover the state they describe.
    #[inline]
    #[must_use]
    pub fn needs_refetch(&self) -> bool {
        matches!(self, Self::MissingEntityId { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = ReconcileError::MissingEntityId {
            collection: "devices".into(),
            operation: Operation::Added,
        };
        assert_eq!(err.to_string(), "Added event for 'devices' carries no entity id");
        assert!(err.needs_refetch());
    }
}
