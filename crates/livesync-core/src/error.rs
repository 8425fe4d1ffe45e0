//! Error types for the livesync facade
//!
//! - configuration loading and validation
//! - transport start-up
//! - reconciliation failures surfaced by views

use livesync_reconcile::ReconcileError;
use livesync_transport::TransportError;
use std::path::PathBuf;

/// Main livesync error type
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Transport failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Event could not be reconciled
    #[error("reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Configuration is unusable
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No endpoint to connect to
    #[error("no endpoint configured")]
    NoEndpoint,
}

impl FeedError {
    /// Check if retrying the same call may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Check if the consumer should refetch its collection
    #[inline]
    #[must_use]
    pub fn needs_refetch(&self) -> bool {
        matches!(self, Self::Reconcile(e) if e.needs_refetch())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// TOML did not parse into a config
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesync_event::Operation;

    #[test]
    fn classification() {
        let refetch = FeedError::from(ReconcileError::MissingEntityId {
            collection: "devices".into(),
            operation: Operation::Modified,
        });
        assert!(refetch.needs_refetch());
        assert!(!refetch.is_retryable());

        let transport = FeedError::from(TransportError::Closed);
        assert!(transport.is_retryable());
        assert_eq!(transport.to_string(), "transport error: source closed");
    }
}
