//! Per-kind delivery queues.
//!
//! The demux loop never waits on a queue: each kind has its own backlog and a
//! forwarding task that feeds the bounded delivery queue. A kind nobody is
//! reading only grows its own backlog; the other kinds keep flowing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lime_transport::{Command, EnvelopeKind, Message, Notification, Session};
use tokio::sync::{mpsc, Mutex, MutexGuard};

use crate::error::ChannelError;

/// Consumer side of one per-kind delivery queue.
///
/// The receiver sits behind an async mutex that is only ever `try_lock`ed:
/// a second concurrent receive on the same kind fails immediately instead
/// of racing the first.
pub(crate) struct Inbox<T> {
    kind: EnvelopeKind,
    rx: Mutex<mpsc::Receiver<T>>,
    pending: Arc<AtomicUsize>,
}

/// Exclusive receive access to one inbox.
pub(crate) struct Receiving<'a, T> {
    rx: MutexGuard<'a, mpsc::Receiver<T>>,
    pending: &'a AtomicUsize,
}

impl<T> Receiving<'_, T> {
    /// Next item, or `None` once the channel stopped and the queue is drained.
    pub(crate) async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }
}

impl<T> Inbox<T> {
    pub(crate) fn acquire(&self) -> Result<Receiving<'_, T>, ChannelError> {
        let rx = self
            .rx
            .try_lock()
            .map_err(|_| ChannelError::ConcurrentReceive(self.kind))?;
        Ok(Receiving {
            rx,
            pending: &self.pending,
        })
    }

    /// Items received from the transport but not yet taken by a receiver,
    /// whether still in the backlog or already in the delivery queue.
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Producer side of one per-kind delivery queue, owned by the demux loop.
pub(crate) struct Outbox<T> {
    kind: EnvelopeKind,
    capacity: usize,
    backlog: mpsc::UnboundedSender<T>,
    pending: Arc<AtomicUsize>,
}

impl<T> Outbox<T> {
    /// Hand `item` to this kind's backlog without waiting. Returns `false`
    /// only when the forwarding task is gone.
    pub(crate) fn deliver(&self, item: T) -> bool {
        let pending = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        if self.backlog.send(item).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        if pending == self.capacity + 1 {
            tracing::warn!(
                kind = %self.kind,
                capacity = self.capacity,
                "delivery queue full, backlog growing"
            );
        }
        true
    }
}

/// Move backlog items into the bounded queue. Ends once the backlog is
/// closed and drained, or the inbox is gone.
async fn forward<T>(mut backlog: mpsc::UnboundedReceiver<T>, queue: mpsc::Sender<T>) {
    while let Some(item) = backlog.recv().await {
        if queue.send(item).await.is_err() {
            return;
        }
    }
}

pub(crate) struct Inboxes {
    pub(crate) message: Inbox<Message>,
    pub(crate) notification: Inbox<Notification>,
    pub(crate) command: Inbox<Command>,
    pub(crate) session: Inbox<Session>,
}

pub(crate) struct Outboxes {
    pub(crate) message: Outbox<Message>,
    pub(crate) notification: Outbox<Notification>,
    pub(crate) command: Outbox<Command>,
    pub(crate) session: Outbox<Session>,
}

fn queue<T: Send + 'static>(kind: EnvelopeKind, capacity: usize) -> (Inbox<T>, Outbox<T>) {
    let (backlog_tx, backlog_rx) = mpsc::unbounded_channel();
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(forward(backlog_rx, tx));

    let pending = Arc::new(AtomicUsize::new(0));
    (
        Inbox {
            kind,
            rx: Mutex::new(rx),
            pending: pending.clone(),
        },
        Outbox {
            kind,
            capacity,
            backlog: backlog_tx,
            pending,
        },
    )
}

/// One bounded FIFO queue per envelope kind. Must be called inside a tokio
/// runtime.
pub(crate) fn queues(capacity: usize) -> (Inboxes, Outboxes) {
    let (message_in, message_out) = queue(EnvelopeKind::Message, capacity);
    let (notification_in, notification_out) = queue(EnvelopeKind::Notification, capacity);
    let (command_in, command_out) = queue(EnvelopeKind::Command, capacity);
    let (session_in, session_out) = queue(EnvelopeKind::Session, capacity);
    (
        Inboxes {
            message: message_in,
            notification: notification_in,
            command: command_in,
            session: session_in,
        },
        Outboxes {
            message: message_out,
            notification: notification_out,
            command: command_out,
            session: session_out,
        },
    )
}
