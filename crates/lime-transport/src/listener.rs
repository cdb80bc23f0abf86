use crate::config::PipeConfig;
use crate::pipe::PipeTransport;
use crate::transport::Transport;
use crate::TransportError;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Accepts incoming transports on the server side.
#[async_trait::async_trait]
pub trait TransportListener: Send + Sync {
    type Transport: Transport;

    async fn start_listening(&self, cancel: &CancellationToken) -> Result<(), TransportError>;

    /// Wait for the next connected transport.
    async fn accept_transport(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Self::Transport, TransportError>;

    async fn stop_listening(&self, cancel: &CancellationToken) -> Result<(), TransportError>;
}

#[derive(Debug)]
struct ListenerShared {
    listening: AtomicBool,
    stopped: CancellationToken,
}

/// In-process listener handing out the server end of each pipe a
/// [`PipeConnector`] opens.
#[derive(Debug)]
pub struct PipeTransportListener {
    shared: Arc<ListenerShared>,
    config: PipeConfig,
    incoming_tx: mpsc::Sender<PipeTransport>,
    incoming_rx: Mutex<mpsc::Receiver<PipeTransport>>,
}

/// Client-side handle that opens pipes towards a [`PipeTransportListener`].
#[derive(Debug, Clone)]
pub struct PipeConnector {
    shared: Arc<ListenerShared>,
    config: PipeConfig,
    incoming_tx: mpsc::Sender<PipeTransport>,
}

impl PipeTransportListener {
    /// Create a listener; `backlog` bounds connections waiting to be accepted.
    pub fn new(config: PipeConfig, backlog: usize) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(backlog.max(1));
        Self {
            shared: Arc::new(ListenerShared {
                listening: AtomicBool::new(false),
                stopped: CancellationToken::new(),
            }),
            config,
            incoming_tx,
            incoming_rx: Mutex::new(incoming_rx),
        }
    }

    pub fn connector(&self) -> PipeConnector {
        PipeConnector {
            shared: self.shared.clone(),
            config: self.config.clone(),
            incoming_tx: self.incoming_tx.clone(),
        }
    }
}

impl PipeConnector {
    /// Open a pipe and queue its server end for acceptance.
    pub async fn connect(&self) -> Result<PipeTransport, TransportError> {
        if self.shared.stopped.is_cancelled() {
            return Err(TransportError::ListenerStopped);
        }
        if !self.shared.listening.load(Ordering::SeqCst) {
            return Err(TransportError::ListenerNotStarted);
        }
        let (client, server) = PipeTransport::pair(self.config.clone());
        self.incoming_tx
            .send(server)
            .await
            .map_err(|_| TransportError::ListenerStopped)?;
        tracing::debug!(pipe = %client.name(), "pipe connected");
        Ok(client)
    }
}

#[async_trait::async_trait]
impl TransportListener for PipeTransportListener {
    type Transport = PipeTransport;

    async fn start_listening(&self, _cancel: &CancellationToken) -> Result<(), TransportError> {
        if self.shared.stopped.is_cancelled() {
            return Err(TransportError::ListenerStopped);
        }
        self.shared.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn accept_transport(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PipeTransport, TransportError> {
        if !self.shared.listening.load(Ordering::SeqCst) {
            return Err(if self.shared.stopped.is_cancelled() {
                TransportError::ListenerStopped
            } else {
                TransportError::ListenerNotStarted
            });
        }
        let mut rx = self.incoming_rx.lock().await;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            _ = self.shared.stopped.cancelled() => Err(TransportError::ListenerStopped),
            transport = rx.recv() => transport.ok_or(TransportError::ListenerStopped),
        }
    }

    async fn stop_listening(&self, _cancel: &CancellationToken) -> Result<(), TransportError> {
        self.shared.listening.store(false, Ordering::SeqCst);
        self.shared.stopped.cancel();
        Ok(())
    }
}
