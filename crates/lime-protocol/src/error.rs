use std::fmt;
use std::sync::Arc;

use lime_transport::{EnvelopeKind, Reason, SessionState, TransportError};

/// Why a channel stopped accepting traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by the local side.
    Local,
    /// The remote side closed the transport.
    RemoteClosed,
    /// The transport failed.
    Transport(String),
    /// The peer broke the protocol.
    Protocol(String),
    /// No inbound traffic within the remote idle timeout.
    IdleTimeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Local => write!(f, "closed locally"),
            CloseReason::RemoteClosed => write!(f, "closed by remote"),
            CloseReason::Transport(e) => write!(f, "transport failure: {e}"),
            CloseReason::Protocol(e) => write!(f, "protocol violation: {e}"),
            CloseReason::IdleTimeout => write!(f, "remote idle timeout"),
        }
    }
}

/// Channel-level errors.
///
/// `Clone` so a single terminal cause can be handed to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("cannot {operation} in the {state} state")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("protocol violation: {reason}")]
    Protocol { reason: Reason },

    #[error("channel closed: {0}")]
    Closed(CloseReason),

    #[error("transport error: {0}")]
    Transport(Arc<TransportError>),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,

    #[error("a {0} receive is already pending on this channel")]
    ConcurrentReceive(EnvelopeKind),
}

impl ChannelError {
    /// True for "no answer yet" outcomes (caller cancellation, timeouts,
    /// local or idle shutdown) as opposed to a broken connection or bad data.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ChannelError::Cancelled
                | ChannelError::Timeout
                | ChannelError::Closed(CloseReason::Local | CloseReason::IdleTimeout)
        )
    }

    pub(crate) fn protocol(code: u32, description: impl Into<String>) -> Self {
        ChannelError::Protocol {
            reason: Reason::new(code, description),
        }
    }
}

impl From<TransportError> for ChannelError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Cancelled => ChannelError::Cancelled,
            e => ChannelError::Transport(Arc::new(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_invalid_state() {
        let err = ChannelError::InvalidState {
            operation: "send a message",
            state: SessionState::New,
        };
        assert_eq!(err.to_string(), "cannot send a message in the new state");
    }

    #[test]
    fn test_display_closed() {
        let err = ChannelError::Closed(CloseReason::Transport("connection reset".into()));
        assert_eq!(err.to_string(), "channel closed: transport failure: connection reset");
    }

    #[test]
    fn test_cancellation_classification() {
        assert!(ChannelError::Cancelled.is_cancellation());
        assert!(ChannelError::Timeout.is_cancellation());
        assert!(ChannelError::Closed(CloseReason::Local).is_cancellation());
        assert!(ChannelError::Closed(CloseReason::IdleTimeout).is_cancellation());
        assert!(!ChannelError::Closed(CloseReason::RemoteClosed).is_cancellation());
        assert!(!ChannelError::from(TransportError::Closed).is_cancellation());
        assert!(ChannelError::from(TransportError::Cancelled).is_cancellation());
    }
}
