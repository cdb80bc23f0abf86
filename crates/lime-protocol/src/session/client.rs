use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use lime_transport::reason::codes;
use lime_transport::{
    Authentication, AuthenticationScheme, CancellationToken, Identity, Node, Session,
    SessionCompression, SessionEncryption, SessionState, Transport,
};

use super::{upgrade_transport, within};
use crate::channel::Channel;
use crate::config::ChannelConfig;
use crate::error::{ChannelError, CloseReason};

type CompressionSelector = Arc<dyn Fn(&[SessionCompression]) -> Option<SessionCompression> + Send + Sync>;
type EncryptionSelector = Arc<dyn Fn(&[SessionEncryption]) -> Option<SessionEncryption> + Send + Sync>;
type ClientAuthenticator =
    Arc<dyn Fn(&[AuthenticationScheme], Option<&Authentication>) -> Option<Authentication> + Send + Sync>;

/// How a client answers the server during establishment.
///
/// By default the first offered compression and encryption are picked and
/// the configured authentication is sent whenever its scheme is offered.
#[derive(Clone)]
pub struct EstablishmentOptions {
    identity: Identity,
    instance: Option<String>,
    compression_selector: CompressionSelector,
    encryption_selector: EncryptionSelector,
    authenticator: ClientAuthenticator,
    timeout: Option<Duration>,
}

impl EstablishmentOptions {
    pub fn new(identity: Identity, authentication: Authentication) -> Self {
        Self {
            identity,
            instance: None,
            compression_selector: Arc::new(|offered: &[SessionCompression]| offered.first().copied()),
            encryption_selector: Arc::new(|offered: &[SessionEncryption]| offered.first().copied()),
            authenticator: Arc::new(move |offered: &[AuthenticationScheme], _: Option<&Authentication>| {
                offered
                    .contains(&authentication.scheme())
                    .then(|| authentication.clone())
            }),
            timeout: None,
        }
    }

    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn compression_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(&[SessionCompression]) -> Option<SessionCompression> + Send + Sync + 'static,
    {
        self.compression_selector = Arc::new(selector);
        self
    }

    pub fn encryption_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(&[SessionEncryption]) -> Option<SessionEncryption> + Send + Sync + 'static,
    {
        self.encryption_selector = Arc::new(selector);
        self
    }

    /// Answer each authentication step from the offered schemes and the
    /// server's roundtrip payload (`None` on the first step).
    pub fn authenticator<F>(mut self, authenticator: F) -> Self
    where
        F: Fn(&[AuthenticationScheme], Option<&Authentication>) -> Option<Authentication>
            + Send
            + Sync
            + 'static,
    {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// Bound on the whole handshake.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for EstablishmentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstablishmentOptions")
            .field("identity", &self.identity)
            .field("instance", &self.instance)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Initiating side of a session.
///
/// Follows the server: every received session frame moves this channel to
/// the state the server announced.
#[derive(Debug, Clone)]
pub struct ClientChannel {
    channel: Channel,
}

impl Deref for ClientChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

impl ClientChannel {
    pub fn new<T: Transport>(transport: T, config: ChannelConfig) -> Self {
        Self {
            channel: Channel::new(transport, config),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Receive the next server session frame and adopt its state.
    pub async fn receive_session(&self, cancel: &CancellationToken) -> Result<Session, ChannelError> {
        let session = self.channel.receive_session(cancel).await?;
        self.adopt(&session).await?;
        Ok(session)
    }

    async fn adopt(&self, session: &Session) -> Result<(), ChannelError> {
        if self.session_id().is_none() {
            self.set_session_id(session.id.clone());
        }
        if session.state == SessionState::Established {
            if session.to.is_some() {
                self.set_local_node(session.to.clone());
            }
            self.set_remote_node(session.from.clone());
        }

        let current = self.state();
        if self.set_state(session.state).await.is_err() {
            tracing::warn!(%current, received = %session.state, "unexpected session state from server");
            if let Err(e) = self.shut_down(CloseReason::Local, &CancellationToken::new()).await {
                tracing::debug!(error = %e, "shutdown after unexpected state failed");
            }
            return Err(ChannelError::protocol(
                codes::SESSION_INVALID_ACTION_FOR_STATE,
                format!("unexpected {} session in the {current} state", session.state),
            ));
        }

        match session.state {
            SessionState::Established => {
                tracing::info!(session_id = ?self.session_id(), remote = ?self.remote_node(), "session established");
            }
            SessionState::Finished | SessionState::Failed => {
                tracing::info!(state = %session.state, reason = ?session.reason, "session ended by server");
                self.shut_down(CloseReason::Local, &CancellationToken::new())
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Open the session and wait for the server's first answer.
    pub async fn start_new_session(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Session, ChannelError> {
        self.ensure_state("start a new session", &[SessionState::New])?;
        self.channel
            .send_session(Session::new(SessionState::New), cancel)
            .await?;
        self.receive_session(cancel).await
    }

    /// Send the chosen options and wait for the server's confirmation.
    pub async fn negotiate_session(
        &self,
        compression: SessionCompression,
        encryption: SessionEncryption,
        cancel: &CancellationToken,
    ) -> Result<Session, ChannelError> {
        self.ensure_state("negotiate a session", &[SessionState::Negotiating])?;
        let choice = Session {
            compression: Some(compression),
            encryption: Some(encryption),
            ..self.session_frame(SessionState::Negotiating)
        };
        self.channel.send_session(choice, cancel).await?;
        self.receive_session(cancel).await
    }

    /// After negotiation, wait for the authentication offer.
    pub async fn receive_authenticating_session(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Session, ChannelError> {
        self.ensure_state("receive an authenticating session", &[SessionState::Negotiating])?;
        self.receive_session(cancel).await
    }

    pub async fn authenticate_session(
        &self,
        identity: Identity,
        authentication: Authentication,
        instance: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Session, ChannelError> {
        self.ensure_state("authenticate", &[SessionState::Authenticating])?;
        let node = match instance {
            Some(instance) => identity.with_instance(instance),
            None => Node::from(identity),
        };
        self.set_local_node(Some(node));
        let attempt = Session {
            authentication: Some(authentication),
            ..self.session_frame(SessionState::Authenticating)
        };
        self.channel.send_session(attempt, cancel).await?;
        self.receive_session(cancel).await
    }

    pub async fn send_finishing_session(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        self.ensure_state("finish the session", &[SessionState::Established])?;
        self.set_state(SessionState::Finishing).await?;
        let finishing = self.session_frame(SessionState::Finishing);
        self.channel.send_session(finishing, cancel).await
    }

    pub async fn receive_finished_session(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Session, ChannelError> {
        self.ensure_state("receive a finished session", &[SessionState::Finishing])?;
        self.receive_session(cancel).await
    }

    // ── Driver ────────────────────────────────────────────────────────

    /// Run the whole initiating handshake and return the server's last
    /// session frame (`Established` or `Failed`).
    pub async fn establish_session(
        &self,
        options: &EstablishmentOptions,
        cancel: &CancellationToken,
    ) -> Result<Session, ChannelError> {
        let result = within(options.timeout, self.run_establishment(options, cancel)).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "session establishment failed");
            if matches!(e, ChannelError::Timeout) {
                if let Err(e) = self.close(cancel).await {
                    tracing::debug!(error = %e, "close after establishment timeout failed");
                }
            }
        }
        result
    }

    async fn run_establishment(
        &self,
        options: &EstablishmentOptions,
        cancel: &CancellationToken,
    ) -> Result<Session, ChannelError> {
        let mut session = self.start_new_session(cancel).await?;

        if session.state == SessionState::Negotiating {
            let compression = session
                .compression_options
                .as_deref()
                .and_then(|offered| (options.compression_selector)(offered));
            let encryption = session
                .encryption_options
                .as_deref()
                .and_then(|offered| (options.encryption_selector)(offered));
            let (Some(compression), Some(encryption)) = (compression, encryption) else {
                return Err(self
                    .reject(
                        codes::SESSION_NEGOTIATION_INVALID_OPTIONS,
                        "no acceptable compression or encryption offered".into(),
                        cancel,
                    )
                    .await);
            };

            session = self.negotiate_session(compression, encryption, cancel).await?;
            if session.state == SessionState::Negotiating {
                let compression = session.compression.unwrap_or(compression);
                let encryption = session.encryption.unwrap_or(encryption);
                upgrade_transport(&self.channel, compression, encryption, cancel).await?;
                session = self.receive_authenticating_session(cancel).await?;
            }
        }

        let mut offered = Vec::new();
        while session.state == SessionState::Authenticating {
            if let Some(schemes) = session.scheme_options.take() {
                offered = schemes;
            }
            let Some(answer) = (options.authenticator)(&offered, session.authentication.as_ref())
            else {
                return Err(self
                    .reject(
                        codes::SESSION_AUTHENTICATION_FAILED,
                        format!("no acceptable authentication scheme in {offered:?}"),
                        cancel,
                    )
                    .await);
            };
            session = self
                .authenticate_session(
                    options.identity.clone(),
                    answer,
                    options.instance.clone(),
                    cancel,
                )
                .await?;
        }
        Ok(session)
    }

    /// Give up on an offer the client cannot satisfy. The server sees the
    /// transport drop.
    async fn reject(&self, code: u32, description: String, cancel: &CancellationToken) -> ChannelError {
        tracing::warn!(%description, "rejecting server offer");
        if let Err(e) = self.close(cancel).await {
            tracing::debug!(error = %e, "close after rejection failed");
        }
        ChannelError::protocol(code, description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lime_transport::{Envelope, PipeConfig, PipeTransport};

    async fn next_session(transport: &PipeTransport) -> Session {
        match transport.receive(&CancellationToken::new()).await.unwrap() {
            Envelope::Session(session) => session,
            other => panic!("expected session, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn adopts_session_id_and_nodes_from_server() {
        let (client_end, server_end) = PipeTransport::pair(PipeConfig::new());
        let client = ClientChannel::new(client_end, ChannelConfig::new());
        let cancel = CancellationToken::new();

        let established = Session {
            id: Some("s-9".into()),
            from: Some("postmaster@lime.test/server".parse().unwrap()),
            to: Some("guest@lime.test/abc".parse().unwrap()),
            ..Session::new(SessionState::Established)
        };
        server_end.send(established.into(), &cancel).await.unwrap();

        let session = client.start_new_session(&cancel).await.unwrap();
        assert_eq!(session.state, SessionState::Established);
        assert_eq!(next_session(&server_end).await.state, SessionState::New);

        assert_eq!(client.state(), SessionState::Established);
        assert_eq!(client.session_id().as_deref(), Some("s-9"));
        assert_eq!(client.local_node(), Some("guest@lime.test/abc".parse().unwrap()));
        assert_eq!(client.remote_node(), Some("postmaster@lime.test/server".parse().unwrap()));
    }

    #[tokio::test]
    async fn backward_state_from_server_is_a_protocol_error() {
        let (client_end, server_end) = PipeTransport::pair(PipeConfig::new());
        let client = ClientChannel::new(client_end, ChannelConfig::new());
        let cancel = CancellationToken::new();

        server_end
            .send(Session::new(SessionState::Established).into(), &cancel)
            .await
            .unwrap();
        client.start_new_session(&cancel).await.unwrap();

        server_end
            .send(Session::new(SessionState::Negotiating).into(), &cancel)
            .await
            .unwrap();
        let err = client.receive_session(&cancel).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol { reason } if reason.code == codes::SESSION_INVALID_ACTION_FOR_STATE
        ));
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn finishing_requires_established() {
        let (client_end, _server_end) = PipeTransport::pair(PipeConfig::new());
        let client = ClientChannel::new(client_end, ChannelConfig::new());

        let err = client
            .send_finishing_session(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::InvalidState { state: SessionState::New, .. }
        ));
    }

    #[tokio::test]
    async fn failed_session_closes_the_channel() {
        let (client_end, server_end) = PipeTransport::pair(PipeConfig::new());
        let client = ClientChannel::new(client_end, ChannelConfig::new());
        let cancel = CancellationToken::new();

        server_end
            .send(Session::new(SessionState::Failed).into(), &cancel)
            .await
            .unwrap();
        let session = client.start_new_session(&cancel).await.unwrap();
        assert_eq!(session.state, SessionState::Failed);
        assert!(client.is_closed());
        assert!(client
            .send_session(Session::new(SessionState::New), &cancel)
            .await
            .is_err());
    }
}
