//! In-memory duplex transport.
//!
//! Two connected ends exchange JSON text frames over bounded tokio channels,
//! so every envelope crossing the pipe goes through the same serializer a
//! network transport would use.

use crate::config::PipeConfig;
use crate::envelope::{Envelope, SessionCompression, SessionEncryption};
use crate::serializer::{EnvelopeSerializer, JsonEnvelopeSerializer};
use crate::transport::{Transport, TransportEvent, TransportEvents};
use crate::TransportError;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

static NEXT_PIPE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
enum PipeFrame {
    Data(String),
    Abort(String),
}

/// One end of an in-memory transport pair.
pub struct PipeTransport {
    name: String,
    tx: Mutex<Option<mpsc::Sender<PipeFrame>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<PipeFrame>>,
    closed: CancellationToken,
    finalized: AtomicBool,
    serializer: JsonEnvelopeSerializer,
    max_frame_size: usize,
    compression_options: Vec<SessionCompression>,
    encryption_options: Vec<SessionEncryption>,
    compression: Mutex<SessionCompression>,
    encryption: Mutex<SessionEncryption>,
    events: TransportEvents,
}

impl PipeTransport {
    /// Create two connected ends: `(client, server)`.
    pub fn pair(config: PipeConfig) -> (PipeTransport, PipeTransport) {
        let pipe_id = NEXT_PIPE_ID.fetch_add(1, Ordering::Relaxed);
        let (client_tx, server_rx) = mpsc::channel(config.buffer);
        let (server_tx, client_rx) = mpsc::channel(config.buffer);

        let client = Self::end(format!("pipe-{pipe_id}/client"), client_tx, client_rx, &config);
        let server = Self::end(format!("pipe-{pipe_id}/server"), server_tx, server_rx, &config);
        (client, server)
    }

    fn end(
        name: String,
        tx: mpsc::Sender<PipeFrame>,
        rx: mpsc::Receiver<PipeFrame>,
        config: &PipeConfig,
    ) -> Self {
        Self {
            name,
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
            finalized: AtomicBool::new(false),
            serializer: JsonEnvelopeSerializer,
            max_frame_size: config.max_frame_size,
            compression_options: config.compression_options.clone(),
            encryption_options: config.encryption_options.clone(),
            compression: Mutex::new(SessionCompression::None),
            encryption: Mutex::new(SessionEncryption::None),
            events: TransportEvents::new(),
        }
    }

    /// Name used in logs (`pipe-N/client` or `pipe-N/server`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tear the connection down with an error visible to the peer.
    ///
    /// The abort frame lands behind any frames still buffered; when the
    /// buffer is full it is handed to a task that waits for room, so the peer
    /// reads the buffered frames and then the abort.
    pub async fn abort(&self, reason: &str) {
        if let Some(tx) = self.take_sender() {
            match tx.try_send(PipeFrame::Abort(reason.to_string())) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    tracing::debug!(pipe = %self.name, "pipe buffer full, abort queued");
                    let name = self.name.clone();
                    tokio::spawn(async move {
                        if tx.send(frame).await.is_err() {
                            tracing::trace!(pipe = %name, "peer gone before abort delivered");
                        }
                    });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::trace!(pipe = %self.name, "peer gone before abort");
                }
            }
        }
        self.closed.cancel();
        tracing::debug!(pipe = %self.name, reason, "pipe aborted");
        self.finalize(TransportEvent::Failed {
            description: reason.to_string(),
        })
        .await;
    }

    fn sender(&self) -> Option<mpsc::Sender<PipeFrame>> {
        self.tx.lock().ok().and_then(|tx| tx.clone())
    }

    fn take_sender(&self) -> Option<mpsc::Sender<PipeFrame>> {
        self.tx.lock().ok().and_then(|mut tx| tx.take())
    }

    /// Emit the terminal lifecycle event exactly once.
    async fn finalize(&self, event: TransportEvent) {
        if !self.finalized.swap(true, Ordering::SeqCst) {
            self.events.emit(event).await;
        }
    }

    async fn on_remote_gone(&self, error: TransportError) -> TransportError {
        self.take_sender();
        self.closed.cancel();
        let event = match &error {
            TransportError::Aborted(reason) => TransportEvent::Failed {
                description: reason.clone(),
            },
            _ => TransportEvent::Closed,
        };
        self.finalize(event).await;
        error
    }
}

#[async_trait::async_trait]
impl Transport for PipeTransport {
    async fn open(&self, _address: &str, _cancel: &CancellationToken) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    async fn send(
        &self,
        envelope: Envelope,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::NotConnected);
        }
        let text = self.serializer.serialize(&envelope)?;
        if text.len() > self.max_frame_size {
            return Err(TransportError::MessageTooLarge {
                size: text.len(),
                max: self.max_frame_size,
            });
        }
        let tx = self.sender().ok_or(TransportError::NotConnected)?;

        tracing::trace!(pipe = %self.name, frame = %text, "send");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            _ = self.closed.cancelled() => Err(TransportError::NotConnected),
            result = tx.send(PipeFrame::Data(text)) => result.map_err(|_| TransportError::Closed),
        }
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<Envelope, TransportError> {
        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            rx = self.rx.lock() => rx,
        };

        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            _ = self.closed.cancelled() => return Err(TransportError::Closed),
            frame = rx.recv() => frame,
        };
        drop(rx);

        match frame {
            Some(PipeFrame::Data(text)) => {
                tracing::trace!(pipe = %self.name, frame = %text, "receive");
                self.serializer.deserialize(&text)
            }
            Some(PipeFrame::Abort(reason)) => {
                Err(self.on_remote_gone(TransportError::Aborted(reason)).await)
            }
            None => Err(self.on_remote_gone(TransportError::Closed).await),
        }
    }

    async fn close(&self, _cancel: &CancellationToken) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.events.emit(TransportEvent::Closing).await;
        self.take_sender();
        self.closed.cancel();
        tracing::debug!(pipe = %self.name, "pipe closed");
        self.finalize(TransportEvent::Closed).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed.is_cancelled() && self.sender().is_some_and(|tx| !tx.is_closed())
    }

    fn supported_compression(&self) -> Vec<SessionCompression> {
        self.compression_options.clone()
    }

    fn supported_encryption(&self) -> Vec<SessionEncryption> {
        self.encryption_options.clone()
    }

    fn compression(&self) -> SessionCompression {
        self.compression.lock().map(|c| *c).unwrap_or_default()
    }

    fn encryption(&self) -> SessionEncryption {
        self.encryption.lock().map(|e| *e).unwrap_or_default()
    }

    async fn set_compression(
        &self,
        compression: SessionCompression,
        _cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        if !self.compression_options.contains(&compression) {
            return Err(TransportError::UnsupportedCompression(compression));
        }
        if let Ok(mut current) = self.compression.lock() {
            *current = compression;
        }
        tracing::debug!(pipe = %self.name, %compression, "compression set");
        Ok(())
    }

    async fn set_encryption(
        &self,
        encryption: SessionEncryption,
        _cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        if !self.encryption_options.contains(&encryption) {
            return Err(TransportError::UnsupportedEncryption(encryption));
        }
        if let Ok(mut current) = self.encryption.lock() {
            *current = encryption;
        }
        tracing::debug!(pipe = %self.name, %encryption, "encryption set");
        Ok(())
    }

    fn events(&self) -> &TransportEvents {
        &self.events
    }
}

impl std::fmt::Debug for PipeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeTransport")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Message, Notification, Event};
    use crate::Document;

    #[tokio::test]
    async fn frames_cross_the_pipe_in_order() {
        let (client, server) = PipeTransport::pair(PipeConfig::new());
        let cancel = CancellationToken::new();

        for i in 0..10 {
            let message = Message::new(None, Document::text(format!("msg {i}")));
            client.send(message.into(), &cancel).await.unwrap();
        }
        for i in 0..10 {
            match server.receive(&cancel).await.unwrap() {
                Envelope::Message(m) => assert_eq!(m.content.as_text(), Some(format!("msg {i}").as_str())),
                other => panic!("expected message, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn close_is_seen_by_peer_after_buffered_frames() {
        let (client, server) = PipeTransport::pair(PipeConfig::new());
        let cancel = CancellationToken::new();

        client
            .send(Notification::new(Event::Received).into(), &cancel)
            .await
            .unwrap();
        client.close(&cancel).await.unwrap();
        client.close(&cancel).await.unwrap();
        assert!(!client.is_connected());

        assert!(server.receive(&cancel).await.is_ok());
        assert!(matches!(server.receive(&cancel).await, Err(TransportError::Closed)));
        assert!(!server.is_connected());
    }

    #[tokio::test]
    async fn abort_surfaces_as_error() {
        let (client, server) = PipeTransport::pair(PipeConfig::new());
        let cancel = CancellationToken::new();

        client.abort("connection reset").await;
        match server.receive(&cancel).await {
            Err(TransportError::Aborted(reason)) => assert_eq!(reason, "connection reset"),
            other => panic!("expected abort, got {other:?}"),
        }
        assert!(matches!(
            client.send(Notification::new(Event::Received).into(), &cancel).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn abort_follows_frames_in_a_full_buffer() {
        let (client, server) = PipeTransport::pair(PipeConfig::new().buffer(1));
        let cancel = CancellationToken::new();

        client
            .send(Notification::new(Event::Received).into(), &cancel)
            .await
            .unwrap();
        client.abort("buffer full").await;

        assert!(server.receive(&cancel).await.is_ok());
        match server.receive(&cancel).await {
            Err(TransportError::Aborted(reason)) => assert_eq!(reason, "buffer full"),
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn receive_honours_cancellation() {
        let (_client, server) = PipeTransport::pair(PipeConfig::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(server.receive(&cancel).await, Err(TransportError::Cancelled)));
    }

    #[tokio::test]
    async fn reject_oversized_frame() {
        let (client, _server) = PipeTransport::pair(PipeConfig::new().max_frame_size(32));
        let cancel = CancellationToken::new();
        let message = Message::new(None, Document::text("x".repeat(64)));
        match client.send(message.into(), &cancel).await {
            Err(TransportError::MessageTooLarge { max, .. }) => assert_eq!(max, 32),
            other => panic!("expected MessageTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn compression_limited_to_configured_options() {
        let config = PipeConfig::new()
            .compression_options(vec![SessionCompression::None, SessionCompression::Gzip]);
        let (client, _server) = PipeTransport::pair(config);
        let cancel = CancellationToken::new();

        client.set_compression(SessionCompression::Gzip, &cancel).await.unwrap();
        assert_eq!(client.compression(), SessionCompression::Gzip);
        assert!(matches!(
            client.set_encryption(SessionEncryption::Tls, &cancel).await,
            Err(TransportError::UnsupportedEncryption(SessionEncryption::Tls))
        ));
    }
}
