use crate::envelope::{SessionCompression, SessionEncryption};

/// Errors returned by the LIME transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("transport closed")]
    Closed,

    #[error("connection aborted: {0}")]
    Aborted(String),

    #[error("transport operation cancelled")]
    Cancelled,

    #[error("envelope serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("envelope deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    #[error("document is not an envelope: {0}")]
    UnknownEnvelope(String),

    #[error("frame too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("unsupported compression: {0}")]
    UnsupportedCompression(SessionCompression),

    #[error("unsupported encryption: {0}")]
    UnsupportedEncryption(SessionEncryption),

    #[error("listener is not started")]
    ListenerNotStarted,

    #[error("listener is stopped")]
    ListenerStopped,

    #[error("invalid node: {0}")]
    InvalidNode(String),
}

impl TransportError {
    /// True for an orderly close or abort initiated by either side.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::Closed | TransportError::Aborted(_) | TransportError::NotConnected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_too_large() {
        let err = TransportError::MessageTooLarge { size: 128, max: 64 };
        assert_eq!(err.to_string(), "frame too large: 128 bytes (max 64)");
    }

    #[test]
    fn test_display_unsupported_compression() {
        let err = TransportError::UnsupportedCompression(SessionCompression::Gzip);
        assert_eq!(err.to_string(), "unsupported compression: gzip");
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(TransportError::Closed.is_disconnect());
        assert!(TransportError::Aborted("reset".into()).is_disconnect());
        assert!(!TransportError::Cancelled.is_disconnect());
    }
}
