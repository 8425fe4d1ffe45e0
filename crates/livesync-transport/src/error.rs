//! Transport errors
//!
//! None of these reach feed consumers directly: the connector turns them
//! into connection-state transitions and log lines.

/// Errors raised by a [`RecordSource`](crate::RecordSource) or the connector
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Could not open the connection
    #[error("cannot connect to {endpoint}: {reason}")]
    Connect {
        /// Source description
        endpoint: String,
        /// Underlying failure
        reason: String,
    },

    /// The established connection failed while reading
    #[error("read failed: {0}")]
    Read(String),

    /// A frame was not a change envelope
    #[error("undecodable frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// The source is gone for good
    #[error("source closed")]
    Closed,

    /// `connect` was called on a connector that is already running
    #[error("connector already started")]
    AlreadyStarted,
}

impl TransportError {
    /// Whether the connection survives this error
    ///
    /// Decode failures affect one frame only.
    #[inline]
    #[must_use]
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Whether reconnecting may help
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Read(_) | Self::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let decode = TransportError::from(serde_json::from_str::<u8>("x").unwrap_err());
        assert!(decode.is_frame_local());
        assert!(!decode.is_retryable());

        let connect = TransportError::Connect {
            endpoint: "ws://localhost:1".into(),
            reason: "refused".into(),
        };
        assert!(connect.is_retryable());
        assert_eq!(connect.to_string(), "cannot connect to ws://localhost:1: refused");
        assert!(!TransportError::AlreadyStarted.is_retryable());
    }
}
