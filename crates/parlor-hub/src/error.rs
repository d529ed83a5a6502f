use parlor_core::{ConnectionId, StoreError};

/// Errors surfaced by the hub to a session.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The message could not be persisted; it was not delivered to anyone.
    #[error("persist failed: {0}")]
    Persist(#[source] StoreError),

    /// History could not be read for a joining connection.
    #[error("history unavailable: {0}")]
    History(#[source] StoreError),

    /// The message could not be encoded for the wire.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// A connection id was registered twice. Ids are generated per
    /// connection, so this indicates a bug rather than a client error.
    #[error("connection already registered: {0}")]
    DuplicateConnection(ConnectionId),
}

/// Why a frame could not be queued for a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    Full,
    #[error("connection closed")]
    Closed,
}

impl DeliveryError {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "queue_full",
            Self::Closed => "closed",
        }
    }
}

/// Transport-level failures reported by `FrameSink` / `FrameStream`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("write timed out")]
    WriteTimeout,
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_error_display() {
        let err = HubError::Persist(StoreError::Database("disk full".into()));
        assert_eq!(err.to_string(), "persist failed: database error: disk full");
    }

    #[test]
    fn delivery_error_labels() {
        assert_eq!(DeliveryError::Full.as_str(), "queue_full");
        assert_eq!(DeliveryError::Closed.as_str(), "closed");
    }
}
