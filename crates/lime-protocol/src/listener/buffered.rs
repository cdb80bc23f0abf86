use std::sync::Arc;

use lime_transport::{CancellationToken, Command, Message, Notification};
use tokio::sync::mpsc;

use super::{
    spawn_loop, wait_for, Completion, CompletionRx, Consumer, Consumers, EstablishedReceiver,
    Receivable,
};
use crate::error::ChannelError;

enum BufferTx<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

enum BufferRx<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

fn buffer<T>(capacity: Option<usize>) -> (BufferTx<T>, BufferRx<T>) {
    match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (BufferTx::Bounded(tx), BufferRx::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (BufferTx::Unbounded(tx), BufferRx::Unbounded(rx))
        }
    }
}

impl<T> BufferTx<T> {
    async fn send(&self, item: T) -> bool {
        match self {
            BufferTx::Bounded(tx) => tx.send(item).await.is_ok(),
            BufferTx::Unbounded(tx) => tx.send(item).is_ok(),
        }
    }
}

impl<T> BufferRx<T> {
    async fn recv(&mut self) -> Option<T> {
        match self {
            BufferRx::Bounded(rx) => rx.recv().await,
            BufferRx::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Discard whatever is still buffered, returning how much.
    fn discard(&mut self) -> usize {
        let mut dropped = 0;
        match self {
            BufferRx::Bounded(rx) => {
                rx.close();
                while rx.try_recv().is_ok() {
                    dropped += 1;
                }
            }
            BufferRx::Unbounded(rx) => {
                rx.close();
                while rx.try_recv().is_ok() {
                    dropped += 1;
                }
            }
        }
        dropped
    }
}

/// Move envelopes from the channel into the buffer until stopped. A channel
/// failure is forwarded as the last buffered item.
async fn pump<T: Receivable>(
    receiver: Arc<dyn EstablishedReceiver>,
    tx: BufferTx<Result<T, ChannelError>>,
    stop: CancellationToken,
) {
    loop {
        let item = match T::receive_from(&*receiver, &stop).await {
            Err(ChannelError::Cancelled) if stop.is_cancelled() => return,
            item => item,
        };
        let failed = item.is_err();
        let sent = tokio::select! {
            biased;
            _ = stop.cancelled() => false,
            sent = tx.send(item) => sent,
        };
        if failed || !sent {
            return;
        }
    }
}

/// Feed the consumer from the buffer.
async fn drain<T: Receivable>(
    mut rx: BufferRx<Result<T, ChannelError>>,
    consumer: Consumer<T>,
    stop: CancellationToken,
) -> Completion<T> {
    let completion = loop {
        let item = tokio::select! {
            biased;
            _ = stop.cancelled() => break Ok(None),
            item = rx.recv() => item,
        };
        match item {
            Some(Ok(envelope)) => {
                if !consumer(envelope.clone()).await {
                    break Ok(Some(envelope));
                }
            }
            Some(Err(e)) => break Err(e),
            None => break Ok(None),
        }
    };

    // Stop the pump and account for what it already pulled out of the
    // channel.
    stop.cancel();
    let dropped = rx.discard();
    if dropped > 0 {
        tracing::warn!(kind = %T::KIND, dropped, "buffered envelopes dropped on listener stop");
    }
    completion
}

fn spawn_buffered<T: Receivable>(
    receiver: &Arc<dyn EstablishedReceiver>,
    consumer: Option<Consumer<T>>,
    capacity: Option<usize>,
    stop: &CancellationToken,
) -> CompletionRx<T> {
    spawn_loop(consumer, |consumer| {
        // Per-kind token: a consumer ending its own loop must not stop the
        // other kinds.
        let kind_stop = stop.child_token();
        let (tx, rx) = buffer(capacity);
        tokio::spawn(pump::<T>(receiver.clone(), tx, kind_stop.clone()));
        drain(rx, consumer, kind_stop)
    })
}

/// Listener with a buffer between the channel and each consumer.
///
/// A pump task per kind keeps pulling from the channel while the consumer
/// works through the buffer. `capacity` bounds each buffer; `None` makes it
/// unbounded, which removes backpressure towards the channel. Envelopes still
/// in a buffer when its loop ends are dropped and counted in a warning.
pub struct BufferedChannelListener {
    stop: CancellationToken,
    message: CompletionRx<Message>,
    notification: CompletionRx<Notification>,
    command: CompletionRx<Command>,
}

impl BufferedChannelListener {
    pub fn start<R: EstablishedReceiver>(
        receiver: Arc<R>,
        consumers: Consumers,
        capacity: Option<usize>,
    ) -> Self {
        let receiver: Arc<dyn EstablishedReceiver> = receiver;
        let stop = CancellationToken::new();
        tracing::debug!(?capacity, "buffered channel listener started");

        Self {
            message: spawn_buffered(&receiver, consumers.message, capacity, &stop),
            notification: spawn_buffered(&receiver, consumers.notification, capacity, &stop),
            command: spawn_buffered(&receiver, consumers.command, capacity, &stop),
            stop,
        }
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub async fn message_completion(&self) -> Completion<Message> {
        wait_for(&self.message).await
    }

    pub async fn notification_completion(&self) -> Completion<Notification> {
        wait_for(&self.notification).await
    }

    pub async fn command_completion(&self) -> Completion<Command> {
        wait_for(&self.command).await
    }
}

impl Drop for BufferedChannelListener {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl std::fmt::Debug for BufferedChannelListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedChannelListener")
            .field("stopped", &self.stop.is_cancelled())
            .finish()
    }
}
