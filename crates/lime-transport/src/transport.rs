use crate::envelope::{Envelope, SessionCompression, SessionEncryption};
use crate::TransportError;

use futures_util::future::{join_all, BoxFuture};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Duplex, ordered, reliable envelope stream.
///
/// Implementations must allow one `send` and one `receive` to be in flight
/// at the same time; the channel layer serializes sends on its side.
/// `receive` returns [`TransportError::Closed`] after an orderly close.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect to a remote address. Transports created already connected
    /// (accepted by a listener, in-memory pairs) treat this as a no-op.
    async fn open(&self, address: &str, cancel: &CancellationToken) -> Result<(), TransportError>;

    async fn send(&self, envelope: Envelope, cancel: &CancellationToken)
        -> Result<(), TransportError>;

    async fn receive(&self, cancel: &CancellationToken) -> Result<Envelope, TransportError>;

    /// Close the transport. Idempotent.
    async fn close(&self, cancel: &CancellationToken) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    fn supported_compression(&self) -> Vec<SessionCompression> {
        vec![SessionCompression::None]
    }

    fn supported_encryption(&self) -> Vec<SessionEncryption> {
        vec![SessionEncryption::None]
    }

    fn compression(&self) -> SessionCompression {
        SessionCompression::None
    }

    fn encryption(&self) -> SessionEncryption {
        SessionEncryption::None
    }

    async fn set_compression(
        &self,
        compression: SessionCompression,
        _cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        if compression == SessionCompression::None {
            Ok(())
        } else {
            Err(TransportError::UnsupportedCompression(compression))
        }
    }

    async fn set_encryption(
        &self,
        encryption: SessionEncryption,
        _cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        if encryption == SessionEncryption::None {
            Ok(())
        } else {
            Err(TransportError::UnsupportedEncryption(encryption))
        }
    }

    /// Lifecycle event fan-out for this transport.
    fn events(&self) -> &TransportEvents;
}

// ── Lifecycle events ─────────────────────────────────────────────────

/// Transport lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Close requested; teardown waits for every subscriber to finish.
    Closing,
    /// Transport fully closed.
    Closed,
    /// Transport failed with an I/O error.
    Failed { description: String },
}

type EventHandler = Arc<dyn Fn(TransportEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Multi-subscriber lifecycle events with deferred acknowledgement.
///
/// `emit` runs every subscriber and awaits all returned futures before it
/// completes, so a transport can hold its teardown until subscribers have
/// flushed whatever they need.
#[derive(Default)]
pub struct TransportEvents {
    handlers: Mutex<Vec<EventHandler>>,
}

impl TransportEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(TransportEvent) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.push(Arc::new(handler));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().map(|h| h.len()).unwrap_or(0)
    }

    /// Fan out `event` and wait for every subscriber to acknowledge.
    pub async fn emit(&self, event: TransportEvent) {
        let handlers: Vec<EventHandler> = match self.handlers.lock() {
            Ok(handlers) => handlers.clone(),
            Err(_) => return,
        };
        if handlers.is_empty() {
            return;
        }
        tracing::trace!(?event, subscribers = handlers.len(), "transport event");
        join_all(handlers.iter().map(|handler| handler(event.clone()))).await;
    }
}

impl std::fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEvents")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn emit_waits_for_all_subscribers() {
        let events = TransportEvents::new();
        let done = Arc::new(AtomicUsize::new(0));

        for delay in [5u64, 20, 1] {
            let done = done.clone();
            events.subscribe(move |event| {
                let done = done.clone();
                async move {
                    assert_eq!(event, TransportEvent::Closing);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            });
        }

        events.emit(TransportEvent::Closing).await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_noop() {
        let events = TransportEvents::new();
        events.emit(TransportEvent::Closed).await;
        assert_eq!(events.subscriber_count(), 0);
    }
}
