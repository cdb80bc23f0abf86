//! Channel: one transport, one session state, one delivery queue per
//! envelope kind.
//!
//! A single demux task owns the transport's receive side and routes every
//! inbound envelope into its queue. Sends from any number of callers are
//! serialized onto the transport behind an async lock.

mod inbox;
mod keepalive;
mod module;

pub use module::ChannelModule;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lime_transport::reason::codes;
use lime_transport::{
    Command, Document, Envelope, EnvelopeKind, Message, Node, Notification, Reason, Session,
    SessionState, Transport, TransportError,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ChannelConfig;
use crate::error::{ChannelError, CloseReason};
use crate::state::SessionStateMachine;
use inbox::{Inbox, Inboxes, Outboxes};
use module::ModuleList;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Modules {
    message: ModuleList<Message>,
    notification: ModuleList<Notification>,
    command: ModuleList<Command>,
    session: ModuleList<Session>,
}

impl Modules {
    async fn state_changed(&self, state: SessionState) {
        self.message.state_changed(state).await;
        self.notification.state_changed(state).await;
        self.command.state_changed(state).await;
        self.session.state_changed(state).await;
    }
}

#[derive(Default)]
struct Addressing {
    session_id: Option<String>,
    local_node: Option<Node>,
    remote_node: Option<Node>,
}

struct ChannelInner {
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    machine: Mutex<SessionStateMachine>,
    state_tx: watch::Sender<SessionState>,
    addressing: Mutex<Addressing>,
    send_lock: tokio::sync::Mutex<()>,
    inboxes: Inboxes,
    modules: Modules,
    /// Fires once the channel stops, whatever the cause.
    closed: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    last_received: Mutex<Instant>,
    /// The peer has announced `Established` on the wire.
    peer_established: AtomicBool,
    /// Ids of the latest unanswered keep-alive pings, oldest first.
    pending_pings: Mutex<VecDeque<String>>,
}

/// Session channel over one transport.
///
/// Cheap to clone; all clones share the same session. Must be created inside
/// a tokio runtime: construction spawns the demux task, plus the keep-alive
/// task when a ping interval or idle timeout is configured.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub fn new<T: Transport>(transport: T, config: ChannelConfig) -> Self {
        let (inboxes, outboxes) = inbox::queues(config.buffer);
        let (state_tx, _) = watch::channel(SessionState::New);
        let keep_alive = config.keep_alive_enabled();

        let channel = Self {
            inner: Arc::new(ChannelInner {
                transport: Arc::new(transport),
                config,
                machine: Mutex::new(SessionStateMachine::new()),
                state_tx,
                addressing: Mutex::new(Addressing::default()),
                send_lock: tokio::sync::Mutex::new(()),
                inboxes,
                modules: Modules {
                    message: ModuleList::new(),
                    notification: ModuleList::new(),
                    command: ModuleList::new(),
                    session: ModuleList::new(),
                },
                closed: CancellationToken::new(),
                close_reason: Mutex::new(None),
                last_received: Mutex::new(Instant::now()),
                peer_established: AtomicBool::new(false),
                pending_pings: Mutex::new(VecDeque::new()),
            }),
        };

        tokio::spawn(channel.clone().run_demux(outboxes));
        if keep_alive {
            tokio::spawn(channel.clone().run_keep_alive());
        }
        channel
    }

    // ── Accessors ─────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        lock(&self.inner.machine).state()
    }

    /// Observe state transitions as they happen.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn session_id(&self) -> Option<String> {
        lock(&self.inner.addressing).session_id.clone()
    }

    pub fn local_node(&self) -> Option<Node> {
        lock(&self.inner.addressing).local_node.clone()
    }

    pub fn remote_node(&self) -> Option<Node> {
        lock(&self.inner.addressing).remote_node.clone()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        lock(&self.inner.close_reason).clone()
    }

    /// Envelopes of `kind` received but not yet taken by a `receive_*` call.
    pub fn queued(&self, kind: EnvelopeKind) -> usize {
        let inboxes = &self.inner.inboxes;
        match kind {
            EnvelopeKind::Message => inboxes.message.pending(),
            EnvelopeKind::Notification => inboxes.notification.pending(),
            EnvelopeKind::Command => inboxes.command.pending(),
            EnvelopeKind::Session => inboxes.session.pending(),
        }
    }

    pub(crate) fn set_session_id(&self, session_id: Option<String>) {
        lock(&self.inner.addressing).session_id = session_id;
    }

    pub(crate) fn set_local_node(&self, node: Option<Node>) {
        lock(&self.inner.addressing).local_node = node;
    }

    pub(crate) fn set_remote_node(&self, node: Option<Node>) {
        lock(&self.inner.addressing).remote_node = node;
    }

    /// Move the session to `next` and notify modules and watchers.
    pub(crate) async fn set_state(&self, next: SessionState) -> Result<(), ChannelError> {
        let previous = {
            let mut machine = lock(&self.inner.machine);
            let previous = machine.state();
            machine.transition(next)?;
            previous
        };
        if previous == next {
            return Ok(());
        }
        tracing::debug!(
            session_id = ?self.session_id(),
            from = %previous,
            to = %next,
            "session state changed"
        );
        self.inner.state_tx.send_replace(next);
        self.inner.modules.state_changed(next).await;
        Ok(())
    }

    /// Session frame stamped with this channel's id and addressing.
    pub(crate) fn session_frame(&self, state: SessionState) -> Session {
        let addressing = lock(&self.inner.addressing);
        Session {
            id: addressing.session_id.clone(),
            from: addressing.local_node.clone(),
            to: addressing.remote_node.clone(),
            ..Session::new(state)
        }
    }

    // ── Modules ───────────────────────────────────────────────────────

    pub fn add_message_module(&self, module: Arc<dyn ChannelModule<Message>>) {
        self.inner.modules.message.add(module);
    }

    pub fn add_notification_module(&self, module: Arc<dyn ChannelModule<Notification>>) {
        self.inner.modules.notification.add(module);
    }

    pub fn add_command_module(&self, module: Arc<dyn ChannelModule<Command>>) {
        self.inner.modules.command.add(module);
    }

    pub fn add_session_module(&self, module: Arc<dyn ChannelModule<Session>>) {
        self.inner.modules.session.add(module);
    }

    // ── Sending ───────────────────────────────────────────────────────

    pub async fn send_message(
        &self,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        self.ensure_established("send a message")?;
        self.emit(message.into(), cancel).await
    }

    pub async fn send_notification(
        &self,
        notification: Notification,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        self.ensure_established("send a notification")?;
        self.emit(notification.into(), cancel).await
    }

    pub async fn send_command(
        &self,
        command: Command,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        self.ensure_established("send a command")?;
        self.emit(command.into(), cancel).await
    }

    /// Send a session frame. Allowed in every non-terminal state.
    pub async fn send_session(
        &self,
        session: Session,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        self.ensure_live("send a session")?;
        self.emit(session.into(), cancel).await
    }

    fn ensure_established(&self, operation: &'static str) -> Result<(), ChannelError> {
        match self.state() {
            SessionState::Established => Ok(()),
            state => Err(ChannelError::InvalidState { operation, state }),
        }
    }

    /// Application kinds are readable once established, and stay readable
    /// afterwards so queued envelopes can be drained.
    fn ensure_receivable(&self, operation: &'static str) -> Result<(), ChannelError> {
        match self.state() {
            state @ (SessionState::New
            | SessionState::Negotiating
            | SessionState::Authenticating) => Err(ChannelError::InvalidState { operation, state }),
            _ => Ok(()),
        }
    }

    pub(crate) fn ensure_state(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<(), ChannelError> {
        match self.state() {
            state if allowed.contains(&state) => Ok(()),
            state => Err(ChannelError::InvalidState { operation, state }),
        }
    }

    pub(crate) fn ensure_live(&self, operation: &'static str) -> Result<(), ChannelError> {
        match self.state() {
            state if state.is_terminal() => Err(ChannelError::InvalidState { operation, state }),
            _ => Ok(()),
        }
    }

    /// Run outbound modules then transmit, without any state check.
    pub(crate) async fn emit(
        &self,
        envelope: Envelope,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        let modules = &self.inner.modules;
        let envelope = match envelope {
            Envelope::Message(m) => modules.message.sending(m).await.map(Envelope::Message),
            Envelope::Notification(n) => modules
                .notification
                .sending(n)
                .await
                .map(Envelope::Notification),
            Envelope::Command(c) => modules.command.sending(c).await.map(Envelope::Command),
            Envelope::Session(s) => modules.session.sending(s).await.map(Envelope::Session),
        };
        match envelope {
            Some(envelope) => self.transmit(envelope, cancel).await,
            None => {
                tracing::trace!("outbound envelope suppressed by module");
                Ok(())
            }
        }
    }

    async fn transmit(
        &self,
        envelope: Envelope,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        if let Some(reason) = self.close_reason() {
            return Err(ChannelError::Closed(reason));
        }
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChannelError::Cancelled),
            guard = self.inner.send_lock.lock() => guard,
        };

        let kind = envelope.kind();
        let send = self.inner.transport.send(envelope, cancel);
        let result = match self.inner.config.send_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, send).await {
                Ok(result) => result,
                Err(_) => return Err(ChannelError::Timeout),
            },
            None => send.await,
        };

        match result {
            Ok(()) => {
                tracing::trace!(%kind, "envelope sent");
                Ok(())
            }
            Err(TransportError::Cancelled) => Err(ChannelError::Cancelled),
            Err(e) => {
                tracing::warn!(%kind, error = %e, "transport send failed");
                let e = Arc::new(e);
                self.fail(CloseReason::Transport(e.to_string()));
                Err(ChannelError::Transport(e))
            }
        }
    }

    // ── Receiving ─────────────────────────────────────────────────────

    pub async fn receive_message(&self, cancel: &CancellationToken) -> Result<Message, ChannelError> {
        self.ensure_receivable("receive a message")?;
        let inner = &self.inner;
        self.dequeue(&inner.inboxes.message, &inner.modules.message, cancel)
            .await
    }

    pub async fn receive_notification(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Notification, ChannelError> {
        self.ensure_receivable("receive a notification")?;
        let inner = &self.inner;
        self.dequeue(&inner.inboxes.notification, &inner.modules.notification, cancel)
            .await
    }

    pub async fn receive_command(&self, cancel: &CancellationToken) -> Result<Command, ChannelError> {
        self.ensure_receivable("receive a command")?;
        let inner = &self.inner;
        self.dequeue(&inner.inboxes.command, &inner.modules.command, cancel)
            .await
    }

    /// Wait for the next session frame. Only one caller may wait at a time.
    pub async fn receive_session(&self, cancel: &CancellationToken) -> Result<Session, ChannelError> {
        self.ensure_live("receive a session")?;
        let inner = &self.inner;
        self.dequeue(&inner.inboxes.session, &inner.modules.session, cancel)
            .await
    }

    async fn dequeue<T: Send + 'static>(
        &self,
        inbox: &Inbox<T>,
        modules: &ModuleList<T>,
        cancel: &CancellationToken,
    ) -> Result<T, ChannelError> {
        let mut rx = inbox.acquire()?;
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChannelError::Cancelled),
                item = rx.recv() => item,
            };
            let Some(item) = item else {
                return Err(ChannelError::Closed(
                    self.close_reason().unwrap_or(CloseReason::RemoteClosed),
                ));
            };
            match modules.receiving(item).await {
                Some(item) => return Ok(item),
                None => tracing::trace!("inbound envelope suppressed by module"),
            }
        }
    }

    // ── Closing ───────────────────────────────────────────────────────

    /// Close the channel and its transport. Idempotent; pending receives
    /// fail with [`CloseReason::Local`].
    pub async fn close(&self, cancel: &CancellationToken) -> Result<(), ChannelError> {
        self.shut_down(CloseReason::Local, cancel).await
    }

    pub(crate) async fn shut_down(
        &self,
        reason: CloseReason,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        self.fail(reason);
        self.inner.transport.close(cancel).await?;
        Ok(())
    }

    /// Record the first close cause and stop the background tasks.
    fn fail(&self, reason: CloseReason) {
        {
            let mut current = lock(&self.inner.close_reason);
            if current.is_none() {
                tracing::debug!(session_id = ?self.session_id(), %reason, "channel closing");
                *current = Some(reason);
            }
        }
        self.inner.closed.cancel();
    }

    // ── Demux ─────────────────────────────────────────────────────────

    async fn run_demux(self, outboxes: Outboxes) {
        tracing::debug!("demux loop started");
        let cause = loop {
            let envelope = match self.inner.transport.receive(&self.inner.closed).await {
                Ok(envelope) => envelope,
                Err(e) => break Self::receive_failure(e),
            };
            *lock(&self.inner.last_received) = Instant::now();
            if let Err(cause) = self.dispatch(envelope, &outboxes).await {
                break cause;
            }
        };

        self.fail(cause);
        if let Err(e) = self.inner.transport.close(&CancellationToken::new()).await {
            tracing::debug!(error = %e, "transport close after demux failed");
        }
        tracing::debug!(reason = ?self.close_reason(), "demux loop stopped");
        // Dropping the outboxes wakes every waiting receiver.
        drop(outboxes);
    }

    fn receive_failure(error: TransportError) -> CloseReason {
        match error {
            TransportError::Cancelled => CloseReason::Local,
            TransportError::Closed | TransportError::NotConnected => CloseReason::RemoteClosed,
            e => CloseReason::Transport(e.to_string()),
        }
    }

    async fn dispatch(&self, envelope: Envelope, outboxes: &Outboxes) -> Result<(), CloseReason> {
        let delivered = match envelope {
            Envelope::Session(session) => {
                if session.state == SessionState::Established {
                    self.inner.peer_established.store(true, Ordering::SeqCst);
                }
                outboxes.session.deliver(session)
            }
            Envelope::Message(mut message) => {
                self.check_application_traffic(EnvelopeKind::Message).await?;
                self.fill_recipients(&mut message.from, &mut message.to);
                outboxes.message.deliver(message)
            }
            Envelope::Notification(mut notification) => {
                self.check_application_traffic(EnvelopeKind::Notification)
                    .await?;
                self.fill_recipients(&mut notification.from, &mut notification.to);
                outboxes.notification.deliver(notification)
            }
            Envelope::Command(mut command) => {
                self.check_application_traffic(EnvelopeKind::Command).await?;
                self.fill_recipients(&mut command.from, &mut command.to);
                if self.inner.config.auto_reply_pings && command.is_ping_request() {
                    self.reply_ping(&command).await;
                    true
                } else if self.is_own_ping_response(&command) {
                    tracing::trace!(id = ?command.id, "keep-alive ping answered");
                    true
                } else {
                    outboxes.command.deliver(command)
                }
            }
        };
        if delivered {
            Ok(())
        } else {
            Err(self.close_reason().unwrap_or(CloseReason::Local))
        }
    }

    /// Application traffic before establishment fails the session.
    async fn check_application_traffic(&self, kind: EnvelopeKind) -> Result<(), CloseReason> {
        let state = self.state();
        let allowed = match state {
            SessionState::New | SessionState::Negotiating | SessionState::Authenticating => {
                self.inner.peer_established.load(Ordering::SeqCst)
            }
            _ => true,
        };
        if allowed {
            return Ok(());
        }

        let description = format!("{kind} received in the {state} state");
        tracing::warn!(session_id = ?self.session_id(), %kind, %state, "protocol violation");
        if self.set_state(SessionState::Failed).await.is_ok() {
            let failed = Session {
                reason: Some(Reason::new(
                    codes::SESSION_INVALID_ACTION_FOR_STATE,
                    description.clone(),
                )),
                ..self.session_frame(SessionState::Failed)
            };
            if let Err(e) = self.emit(failed.into(), &self.inner.closed).await {
                tracing::debug!(error = %e, "failed to report protocol violation");
            }
        }
        Err(CloseReason::Protocol(description))
    }

    fn fill_recipients(&self, from: &mut Option<Node>, to: &mut Option<Node>) {
        if !self.inner.config.fill_envelope_recipients {
            return;
        }
        let addressing = lock(&self.inner.addressing);
        if from.is_none() {
            from.clone_from(&addressing.remote_node);
        }
        if to.is_none() {
            to.clone_from(&addressing.local_node);
        }
    }

    async fn reply_ping(&self, ping: &Command) {
        let response = ping.success_response(Some(Document::ping()));
        tracing::trace!(id = ?ping.id, "answering ping");
        if let Err(e) = self.emit(response.into(), &self.inner.closed).await {
            tracing::warn!(error = %e, "failed to answer ping");
        }
    }

    fn is_own_ping_response(&self, command: &Command) -> bool {
        !command.is_request()
            && command
                .id
                .as_ref()
                .is_some_and(|id| {
                    let mut pending = lock(&self.inner.pending_pings);
                    match pending.iter().position(|pending_id| pending_id == id) {
                        Some(index) => pending.remove(index).is_some(),
                        None => false,
                    }
                })
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .field("local_node", &self.local_node())
            .field("remote_node", &self.remote_node())
            .field("closed", &self.is_closed())
            .finish()
    }
}
