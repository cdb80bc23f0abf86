use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use lime_transport::reason::codes;
use lime_transport::{
    Authentication, AuthenticationScheme, CancellationToken, Node, Reason, Session,
    SessionCompression, SessionEncryption, SessionState, Transport,
};

use super::{upgrade_transport, within};
use crate::channel::Channel;
use crate::config::ChannelConfig;
use crate::error::{ChannelError, CloseReason};

/// Outcome of one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationResult {
    /// Accepted; the session is established for this node.
    Success(Node),
    /// Another round is needed; the payload is sent back as a challenge.
    Roundtrip(Authentication),
    /// Rejected; the session fails with this reason.
    Failure(Reason),
}

/// Validates client credentials during establishment.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    /// `node` is the address the client announced, if any.
    async fn authenticate(
        &self,
        node: Option<&Node>,
        authentication: &Authentication,
    ) -> AuthenticationResult;
}

#[async_trait::async_trait]
impl<F> Authenticator for F
where
    F: Fn(Option<&Node>, &Authentication) -> AuthenticationResult + Send + Sync,
{
    async fn authenticate(
        &self,
        node: Option<&Node>,
        authentication: &Authentication,
    ) -> AuthenticationResult {
        self(node, authentication)
    }
}

/// What a server offers during establishment.
#[derive(Clone)]
pub struct ServerEstablishment {
    compression_options: Vec<SessionCompression>,
    encryption_options: Vec<SessionEncryption>,
    scheme_options: Vec<AuthenticationScheme>,
    authenticator: Arc<dyn Authenticator>,
    timeout: Option<Duration>,
}

impl ServerEstablishment {
    pub fn new(authenticator: impl Authenticator + 'static) -> Self {
        Self {
            compression_options: vec![SessionCompression::None],
            encryption_options: vec![SessionEncryption::None],
            scheme_options: vec![AuthenticationScheme::Guest],
            authenticator: Arc::new(authenticator),
            timeout: None,
        }
    }

    pub fn compression_options(mut self, options: Vec<SessionCompression>) -> Self {
        self.compression_options = options;
        self
    }

    pub fn encryption_options(mut self, options: Vec<SessionEncryption>) -> Self {
        self.encryption_options = options;
        self
    }

    pub fn scheme_options(mut self, options: Vec<AuthenticationScheme>) -> Self {
        self.scheme_options = options;
        self
    }

    /// Bound on the whole handshake.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Negotiation only happens when there is something to choose.
    fn needs_negotiation(&self) -> bool {
        self.compression_options.len() > 1 || self.encryption_options.len() > 1
    }
}

impl std::fmt::Debug for ServerEstablishment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerEstablishment")
            .field("compression_options", &self.compression_options)
            .field("encryption_options", &self.encryption_options)
            .field("scheme_options", &self.scheme_options)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Accepting side of a session.
///
/// Dereferences to the underlying [`Channel`] for application traffic.
#[derive(Debug, Clone)]
pub struct ServerChannel {
    channel: Channel,
}

impl Deref for ServerChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

impl ServerChannel {
    pub fn new<T: Transport>(
        session_id: impl Into<String>,
        server_node: Node,
        transport: T,
        config: ChannelConfig,
    ) -> Self {
        let channel = Channel::new(transport, config);
        channel.set_session_id(Some(session_id.into()));
        channel.set_local_node(Some(server_node));
        Self { channel }
    }

    /// Create a channel with a fresh random session id.
    pub fn accept<T: Transport>(server_node: Node, transport: T, config: ChannelConfig) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), server_node, transport, config)
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Receive the next client session frame.
    ///
    /// Past `New`, a frame carrying a foreign session id fails the session
    /// and is never returned.
    pub async fn receive_session(&self, cancel: &CancellationToken) -> Result<Session, ChannelError> {
        let session = self.channel.receive_session(cancel).await?;
        if self.state() == SessionState::New {
            return Ok(session);
        }

        let expected = self.session_id();
        if session.id != expected {
            let description = format!(
                "invalid session id '{}'",
                session.id.as_deref().unwrap_or_default()
            );
            tracing::warn!(
                session_id = ?expected,
                received = ?session.id,
                "session id mismatch"
            );
            return Err(self
                .fail_protocol(codes::SESSION_ERROR, description, cancel)
                .await);
        }
        Ok(session)
    }

    pub async fn receive_new_session(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Session, ChannelError> {
        self.ensure_state("receive a new session", &[SessionState::New])?;
        let session = self.receive_session(cancel).await?;
        if session.from.is_some() {
            self.set_remote_node(session.from.clone());
        }
        Ok(session)
    }

    /// Offer compression and encryption options and wait for the client's
    /// choice.
    pub async fn negotiate_session(
        &self,
        compression_options: Vec<SessionCompression>,
        encryption_options: Vec<SessionEncryption>,
        cancel: &CancellationToken,
    ) -> Result<Session, ChannelError> {
        self.ensure_state("negotiate a session", &[SessionState::New])?;
        if compression_options.is_empty() {
            return Err(ChannelError::InvalidArgument(
                "compression options must not be empty".into(),
            ));
        }
        if encryption_options.is_empty() {
            return Err(ChannelError::InvalidArgument(
                "encryption options must not be empty".into(),
            ));
        }

        self.set_state(SessionState::Negotiating).await?;
        let offer = Session {
            compression_options: Some(compression_options),
            encryption_options: Some(encryption_options),
            ..self.session_frame(SessionState::Negotiating)
        };
        self.channel.send_session(offer, cancel).await?;
        self.receive_session(cancel).await
    }

    /// Confirm the client's choice. The caller switches the transport
    /// afterwards.
    pub async fn send_negotiating_session(
        &self,
        compression: SessionCompression,
        encryption: SessionEncryption,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        self.ensure_state("confirm a negotiation", &[SessionState::Negotiating])?;
        let confirmation = Session {
            compression: Some(compression),
            encryption: Some(encryption),
            ..self.session_frame(SessionState::Negotiating)
        };
        self.channel.send_session(confirmation, cancel).await
    }

    /// Offer authentication schemes and wait for the client's attempt.
    pub async fn authenticate_session(
        &self,
        scheme_options: Vec<AuthenticationScheme>,
        cancel: &CancellationToken,
    ) -> Result<Session, ChannelError> {
        self.ensure_state(
            "start authentication",
            &[SessionState::New, SessionState::Negotiating],
        )?;
        if scheme_options.is_empty() {
            return Err(ChannelError::InvalidArgument(
                "scheme options must not be empty".into(),
            ));
        }

        self.set_state(SessionState::Authenticating).await?;
        let offer = Session {
            scheme_options: Some(scheme_options),
            ..self.session_frame(SessionState::Authenticating)
        };
        self.channel.send_session(offer, cancel).await?;
        self.receive_session(cancel).await
    }

    /// Send an authentication challenge and wait for the next attempt.
    pub async fn authenticate_roundtrip(
        &self,
        authentication: Authentication,
        cancel: &CancellationToken,
    ) -> Result<Session, ChannelError> {
        self.ensure_state("send an authentication roundtrip", &[SessionState::Authenticating])?;
        let challenge = Session {
            authentication: Some(authentication),
            ..self.session_frame(SessionState::Authenticating)
        };
        self.channel.send_session(challenge, cancel).await?;
        self.receive_session(cancel).await
    }

    pub async fn send_established_session(
        &self,
        node: Node,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        self.ensure_state(
            "establish the session",
            &[SessionState::New, SessionState::Authenticating],
        )?;
        self.set_remote_node(Some(node));
        self.set_state(SessionState::Established).await?;
        tracing::info!(
            session_id = ?self.session_id(),
            remote = ?self.remote_node(),
            "session established"
        );
        let established = self.session_frame(SessionState::Established);
        self.channel.send_session(established, cancel).await
    }

    /// Wait for the client to ask for the session to end.
    pub async fn receive_finishing_session(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Session, ChannelError> {
        self.ensure_state("receive a finishing session", &[SessionState::Established])?;
        let session = self.receive_session(cancel).await?;
        if session.state != SessionState::Finishing {
            let description = format!("expected a finishing session, got {}", session.state);
            return Err(self
                .fail_protocol(codes::SESSION_INVALID_ACTION_FOR_STATE, description, cancel)
                .await);
        }
        self.set_state(SessionState::Finishing).await?;
        Ok(session)
    }

    pub async fn send_finished_session(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        self.ensure_live("finish the session")?;
        self.set_state(SessionState::Finished).await?;
        let finished = self.session_frame(SessionState::Finished);
        let sent = self.emit(finished.into(), cancel).await;
        self.shut_down(CloseReason::Local, cancel).await?;
        tracing::info!(session_id = ?self.session_id(), "session finished");
        sent
    }

    pub async fn send_failed_session(
        &self,
        reason: Reason,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        self.ensure_live("fail the session")?;
        self.set_state(SessionState::Failed).await?;
        tracing::info!(session_id = ?self.session_id(), %reason, "session failed");
        let failed = Session {
            reason: Some(reason),
            ..self.session_frame(SessionState::Failed)
        };
        let sent = self.emit(failed.into(), cancel).await;
        self.shut_down(CloseReason::Local, cancel).await?;
        sent
    }

    /// Fail the session over a peer's protocol violation.
    async fn fail_protocol(
        &self,
        code: u32,
        description: String,
        cancel: &CancellationToken,
    ) -> ChannelError {
        let reason = Reason::new(code, description);
        if let Err(e) = self.send_failed_session(reason.clone(), cancel).await {
            tracing::debug!(error = %e, "failed to send failed session");
        }
        ChannelError::Protocol { reason }
    }

    // ── Driver ────────────────────────────────────────────────────────

    /// Run the whole accepting handshake.
    ///
    /// Returns the final state: `Established`, or `Failed` when the
    /// authenticator rejected the client. Peer misbehaviour fails the session
    /// and surfaces as [`ChannelError::Protocol`].
    pub async fn establish_session(
        &self,
        establishment: &ServerEstablishment,
        cancel: &CancellationToken,
    ) -> Result<SessionState, ChannelError> {
        let result = within(establishment.timeout, self.run_establishment(establishment, cancel)).await;
        if matches!(result, Err(ChannelError::Timeout)) && !self.state().is_terminal() {
            tracing::warn!(session_id = ?self.session_id(), "session establishment timed out");
            let reason = Reason::new(
                codes::SESSION_NEGOTIATION_TIMEOUT,
                "session establishment timed out",
            );
            if let Err(e) = self.send_failed_session(reason, cancel).await {
                tracing::debug!(error = %e, "failed to send failed session");
            }
        }
        result
    }

    async fn run_establishment(
        &self,
        establishment: &ServerEstablishment,
        cancel: &CancellationToken,
    ) -> Result<SessionState, ChannelError> {
        let new = self.receive_new_session(cancel).await?;
        if new.state != SessionState::New {
            let description = format!("expected a new session, got {}", new.state);
            return Err(self
                .fail_protocol(codes::SESSION_INVALID_ACTION_FOR_STATE, description, cancel)
                .await);
        }

        if establishment.needs_negotiation() {
            self.run_negotiation(establishment, cancel).await?;
        }

        let mut attempt = self
            .authenticate_session(establishment.scheme_options.clone(), cancel)
            .await?;
        loop {
            if attempt.state != SessionState::Authenticating {
                let description = format!("expected an authenticating session, got {}", attempt.state);
                return Err(self
                    .fail_protocol(codes::SESSION_INVALID_ACTION_FOR_STATE, description, cancel)
                    .await);
            }
            let Some(authentication) = attempt.authentication.take() else {
                return Err(self
                    .fail_protocol(
                        codes::SESSION_AUTHENTICATION_FAILED,
                        "missing authentication".into(),
                        cancel,
                    )
                    .await);
            };
            let scheme = authentication.scheme();
            if !establishment.scheme_options.contains(&scheme) {
                return Err(self
                    .fail_protocol(
                        codes::SESSION_AUTHENTICATION_FAILED,
                        format!("unsupported authentication scheme '{scheme}'"),
                        cancel,
                    )
                    .await);
            }

            let outcome = establishment
                .authenticator
                .authenticate(attempt.from.as_ref(), &authentication)
                .await;
            match outcome {
                AuthenticationResult::Success(node) => {
                    self.send_established_session(node, cancel).await?;
                    return Ok(SessionState::Established);
                }
                AuthenticationResult::Roundtrip(challenge) => {
                    tracing::debug!(%scheme, "authentication roundtrip");
                    attempt = self.authenticate_roundtrip(challenge, cancel).await?;
                }
                AuthenticationResult::Failure(reason) => {
                    self.send_failed_session(reason, cancel).await?;
                    return Ok(SessionState::Failed);
                }
            }
        }
    }

    async fn run_negotiation(
        &self,
        establishment: &ServerEstablishment,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        let choice = self
            .negotiate_session(
                establishment.compression_options.clone(),
                establishment.encryption_options.clone(),
                cancel,
            )
            .await?;

        let compression = choice
            .compression
            .filter(|c| establishment.compression_options.contains(c));
        let encryption = choice
            .encryption
            .filter(|e| establishment.encryption_options.contains(e));
        let (Some(compression), Some(encryption), SessionState::Negotiating) =
            (compression, encryption, choice.state)
        else {
            let description = format!(
                "invalid negotiation choice: compression {:?}, encryption {:?}",
                choice.compression, choice.encryption
            );
            return Err(self
                .fail_protocol(codes::SESSION_NEGOTIATION_INVALID_OPTIONS, description, cancel)
                .await);
        };

        self.send_negotiating_session(compression, encryption, cancel)
            .await?;
        upgrade_transport(&self.channel, compression, encryption, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lime_transport::{Envelope, PipeConfig, PipeTransport};

    fn server_node() -> Node {
        "postmaster@lime.test/server".parse().unwrap()
    }

    fn server(config: PipeConfig) -> (ServerChannel, PipeTransport) {
        let (client, server) = PipeTransport::pair(config);
        let channel = ServerChannel::new("s-1", server_node(), server, ChannelConfig::new());
        (channel, client)
    }

    async fn next_session(transport: &PipeTransport) -> Session {
        match transport.receive(&CancellationToken::new()).await.unwrap() {
            Envelope::Session(session) => session,
            other => panic!("expected session, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn negotiate_rejects_empty_options_without_sending() {
        let (channel, client) = server(PipeConfig::new());
        let cancel = CancellationToken::new();

        let err = channel
            .negotiate_session(vec![], vec![SessionEncryption::None], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidArgument(_)));
        let err = channel
            .negotiate_session(vec![SessionCompression::None], vec![], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidArgument(_)));
        assert_eq!(channel.state(), SessionState::New);

        // Nothing reached the wire.
        let silence = tokio::time::timeout(Duration::from_millis(20), client.receive(&cancel)).await;
        assert!(silence.is_err());
    }

    #[tokio::test]
    async fn steps_enforce_state() {
        let (channel, _client) = server(PipeConfig::new());
        let cancel = CancellationToken::new();

        assert!(matches!(
            channel
                .send_negotiating_session(SessionCompression::None, SessionEncryption::None, &cancel)
                .await,
            Err(ChannelError::InvalidState { state: SessionState::New, .. })
        ));
        assert!(matches!(
            channel.receive_finishing_session(&cancel).await,
            Err(ChannelError::InvalidState { .. })
        ));
        assert!(matches!(
            channel
                .authenticate_roundtrip(Authentication::Guest, &cancel)
                .await,
            Err(ChannelError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn foreign_session_id_fails_once() {
        let (channel, client) = server(PipeConfig::new());
        let cancel = CancellationToken::new();

        client
            .send(Session::new(SessionState::New).into(), &cancel)
            .await
            .unwrap();
        channel.receive_new_session(&cancel).await.unwrap();

        let attempt = tokio::spawn({
            let channel = channel.clone();
            async move {
                channel
                    .authenticate_session(vec![AuthenticationScheme::Guest], &CancellationToken::new())
                    .await
            }
        });

        let offer = next_session(&client).await;
        assert_eq!(offer.state, SessionState::Authenticating);
        assert_eq!(offer.id.as_deref(), Some("s-1"));

        let forged = Session {
            id: Some("forged".into()),
            authentication: Some(Authentication::Guest),
            ..Session::new(SessionState::Authenticating)
        };
        client.send(forged.into(), &cancel).await.unwrap();

        let err = attempt.await.unwrap().unwrap_err();
        match err {
            ChannelError::Protocol { reason } => assert_eq!(reason.code, codes::SESSION_ERROR),
            other => panic!("expected protocol error, got {other}"),
        }

        let failed = next_session(&client).await;
        assert_eq!(failed.state, SessionState::Failed);
        assert_eq!(failed.reason.unwrap().code, codes::SESSION_ERROR);
        // Exactly one failed frame, then the transport is gone.
        assert!(client.receive(&cancel).await.is_err());
        assert_eq!(channel.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn invalid_negotiation_choice_is_a_protocol_error() {
        let (channel, client) = server(PipeConfig::new());
        let establishment = ServerEstablishment::new(|node: Option<&Node>, _: &Authentication| {
            AuthenticationResult::Success(node.cloned().unwrap_or_default())
        })
        .compression_options(vec![SessionCompression::None, SessionCompression::Gzip]);

        let driver = tokio::spawn({
            let channel = channel.clone();
            async move {
                channel
                    .establish_session(&establishment, &CancellationToken::new())
                    .await
            }
        });

        let cancel = CancellationToken::new();
        client
            .send(Session::new(SessionState::New).into(), &cancel)
            .await
            .unwrap();
        let offer = next_session(&client).await;
        assert_eq!(offer.state, SessionState::Negotiating);

        let choice = Session {
            id: offer.id.clone(),
            compression: Some(SessionCompression::None),
            encryption: Some(SessionEncryption::Tls),
            ..Session::new(SessionState::Negotiating)
        };
        client.send(choice.into(), &cancel).await.unwrap();

        let err = driver.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol { reason } if reason.code == codes::SESSION_NEGOTIATION_INVALID_OPTIONS
        ));
        assert_eq!(next_session(&client).await.state, SessionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn establishment_timeout_fails_session() {
        let (channel, client) = server(PipeConfig::new());
        let establishment = ServerEstablishment::new(|_: Option<&Node>, _: &Authentication| {
            AuthenticationResult::Failure(Reason::new(codes::SESSION_AUTHENTICATION_FAILED, "no"))
        })
        .timeout(Duration::from_secs(5));

        let err = channel
            .establish_session(&establishment, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));

        let failed = next_session(&client).await;
        assert_eq!(failed.state, SessionState::Failed);
        assert_eq!(failed.reason.unwrap().code, codes::SESSION_NEGOTIATION_TIMEOUT);
    }
}
