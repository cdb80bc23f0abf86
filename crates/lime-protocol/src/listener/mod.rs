//! Consumer harnesses draining an established channel.
//!
//! One independent loop per application kind (message, notification,
//! command) feeds a user consumer until it returns `false`, the listener is
//! stopped, or the channel fails. Each loop publishes its outcome as a
//! completion value.

mod buffered;

pub use buffered::BufferedChannelListener;

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use lime_transport::{CancellationToken, Command, EnvelopeKind, Message, Notification};
use tokio::sync::watch;

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::session::{ClientChannel, ServerChannel};

/// How one listener loop ended: `Ok(Some(envelope))` when the consumer
/// returned `false` on `envelope`, `Ok(None)` when stopped, `Err` when the
/// channel failed.
pub type Completion<T> = Result<Option<T>, ChannelError>;

/// Application consumer; returns `false` to stop its loop.
pub type Consumer<T> = Arc<dyn Fn(T) -> BoxFuture<'static, bool> + Send + Sync>;

/// Receive side of an established session.
#[async_trait::async_trait]
pub trait EstablishedReceiver: Send + Sync + 'static {
    async fn receive_message(&self, cancel: &CancellationToken) -> Result<Message, ChannelError>;

    async fn receive_notification(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Notification, ChannelError>;

    async fn receive_command(&self, cancel: &CancellationToken) -> Result<Command, ChannelError>;
}

#[async_trait::async_trait]
impl EstablishedReceiver for Channel {
    async fn receive_message(&self, cancel: &CancellationToken) -> Result<Message, ChannelError> {
        Channel::receive_message(self, cancel).await
    }

    async fn receive_notification(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Notification, ChannelError> {
        Channel::receive_notification(self, cancel).await
    }

    async fn receive_command(&self, cancel: &CancellationToken) -> Result<Command, ChannelError> {
        Channel::receive_command(self, cancel).await
    }
}

macro_rules! delegate_established_receiver {
    ($ty:ty) => {
        #[async_trait::async_trait]
        impl EstablishedReceiver for $ty {
            async fn receive_message(
                &self,
                cancel: &CancellationToken,
            ) -> Result<Message, ChannelError> {
                self.channel().receive_message(cancel).await
            }

            async fn receive_notification(
                &self,
                cancel: &CancellationToken,
            ) -> Result<Notification, ChannelError> {
                self.channel().receive_notification(cancel).await
            }

            async fn receive_command(
                &self,
                cancel: &CancellationToken,
            ) -> Result<Command, ChannelError> {
                self.channel().receive_command(cancel).await
            }
        }
    };
}

delegate_established_receiver!(ServerChannel);
delegate_established_receiver!(ClientChannel);

/// Envelope kinds a listener loop can drain.
#[async_trait::async_trait]
pub(crate) trait Receivable: Clone + Send + Sync + 'static {
    const KIND: EnvelopeKind;

    async fn receive_from(
        receiver: &dyn EstablishedReceiver,
        cancel: &CancellationToken,
    ) -> Result<Self, ChannelError>;
}

#[async_trait::async_trait]
impl Receivable for Message {
    const KIND: EnvelopeKind = EnvelopeKind::Message;

    async fn receive_from(
        receiver: &dyn EstablishedReceiver,
        cancel: &CancellationToken,
    ) -> Result<Self, ChannelError> {
        receiver.receive_message(cancel).await
    }
}

#[async_trait::async_trait]
impl Receivable for Notification {
    const KIND: EnvelopeKind = EnvelopeKind::Notification;

    async fn receive_from(
        receiver: &dyn EstablishedReceiver,
        cancel: &CancellationToken,
    ) -> Result<Self, ChannelError> {
        receiver.receive_notification(cancel).await
    }
}

#[async_trait::async_trait]
impl Receivable for Command {
    const KIND: EnvelopeKind = EnvelopeKind::Command;

    async fn receive_from(
        receiver: &dyn EstablishedReceiver,
        cancel: &CancellationToken,
    ) -> Result<Self, ChannelError> {
        receiver.receive_command(cancel).await
    }
}

/// Consumers for each application kind. A kind without a consumer is not
/// drained; its envelopes stay queued in the channel.
#[derive(Clone, Default)]
pub struct Consumers {
    message: Option<Consumer<Message>>,
    notification: Option<Consumer<Notification>>,
    command: Option<Consumer<Command>>,
}

fn boxed<T, F, Fut>(consumer: F) -> Consumer<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    Arc::new(move |envelope| consumer(envelope).boxed())
}

impl Consumers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message<F, Fut>(mut self, consumer: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.message = Some(boxed(consumer));
        self
    }

    pub fn on_notification<F, Fut>(mut self, consumer: F) -> Self
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.notification = Some(boxed(consumer));
        self
    }

    pub fn on_command<F, Fut>(mut self, consumer: F) -> Self
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.command = Some(boxed(consumer));
        self
    }
}

// ── Completion slots ──────────────────────────────────────────────────

type CompletionTx<T> = watch::Sender<Option<Completion<T>>>;
type CompletionRx<T> = watch::Receiver<Option<Completion<T>>>;

fn completion_slot<T>() -> (CompletionTx<T>, CompletionRx<T>) {
    watch::channel(None)
}

/// Publish `completion`, logging how the loop ended.
fn complete<T>(tx: &CompletionTx<T>, kind: EnvelopeKind, completion: Completion<T>) {
    match &completion {
        Ok(Some(_)) => tracing::debug!(%kind, "listener loop stopped by consumer"),
        Ok(None) => tracing::debug!(%kind, "listener loop stopped"),
        Err(e) => tracing::debug!(%kind, error = %e, "listener loop failed"),
    }
    tx.send_replace(Some(completion));
}

async fn wait_for<T: Clone>(rx: &CompletionRx<T>) -> Completion<T> {
    let mut rx = rx.clone();
    let completion = match rx.wait_for(Option::is_some).await {
        Ok(completion) => (*completion).clone().unwrap_or(Ok(None)),
        // The loop task went away without publishing.
        Err(_) => Ok(None),
    };
    completion
}

/// Spawn a loop for `consumer`, or publish an immediate `Ok(None)` when
/// there is none.
fn spawn_loop<T, F, Fut>(
    consumer: Option<Consumer<T>>,
    run: F,
) -> CompletionRx<T>
where
    T: Receivable,
    F: FnOnce(Consumer<T>) -> Fut,
    Fut: Future<Output = Completion<T>> + Send + 'static,
{
    let (tx, rx) = completion_slot();
    match consumer {
        Some(consumer) => {
            let fut = run(consumer);
            tokio::spawn(async move {
                let completion = fut.await;
                complete(&tx, T::KIND, completion);
            });
        }
        None => {
            tx.send_replace(Some(Ok(None)));
        }
    }
    rx
}

/// Drain one kind straight from the channel.
async fn listen<T: Receivable>(
    receiver: Arc<dyn EstablishedReceiver>,
    consumer: Consumer<T>,
    stop: CancellationToken,
) -> Completion<T> {
    loop {
        let envelope = match T::receive_from(&*receiver, &stop).await {
            Ok(envelope) => envelope,
            Err(ChannelError::Cancelled) if stop.is_cancelled() => return Ok(None),
            Err(e) => return Err(e),
        };
        if !consumer(envelope.clone()).await {
            return Ok(Some(envelope));
        }
    }
}

/// Listener feeding consumers directly from the channel's queues.
///
/// Stopping leaves undelivered envelopes in the channel, where a later
/// `receive_*` call still finds them. Dropping the listener stops it.
pub struct ChannelListener {
    stop: CancellationToken,
    message: CompletionRx<Message>,
    notification: CompletionRx<Notification>,
    command: CompletionRx<Command>,
}

impl ChannelListener {
    pub fn start<R: EstablishedReceiver>(receiver: Arc<R>, consumers: Consumers) -> Self {
        let receiver: Arc<dyn EstablishedReceiver> = receiver;
        let stop = CancellationToken::new();
        tracing::debug!("channel listener started");

        let message = spawn_loop(consumers.message, |consumer| {
            listen(receiver.clone(), consumer, stop.clone())
        });
        let notification = spawn_loop(consumers.notification, |consumer| {
            listen(receiver.clone(), consumer, stop.clone())
        });
        let command = spawn_loop(consumers.command, |consumer| {
            listen(receiver.clone(), consumer, stop.clone())
        });

        Self {
            stop,
            message,
            notification,
            command,
        }
    }

    /// Stop every loop. Loops already finished keep their completion.
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

impl Drop for ChannelListener {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl std::fmt::Debug for ChannelListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelListener")
            .field("stopped", &self.stop.is_cancelled())
            .finish()
    }
}
