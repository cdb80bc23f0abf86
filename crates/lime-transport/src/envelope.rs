//! Envelope model: the four frame kinds exchanged on a channel.
//!
//! Every envelope shares the addressing fields `id`, `from`, `to`, `pp`
//! and `metadata`. An absent `id` marks a fire-and-forget envelope.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::authentication::{Authentication, AuthenticationScheme};
use crate::document::Document;
use crate::node::Node;
use crate::reason::Reason;

/// Ordered envelope metadata.
pub type Metadata = IndexMap<String, String>;

/// Resource path of the keep-alive ping.
pub const PING_URI: &str = "/ping";

/// Generate a fresh envelope identifier (UUID v4).
pub fn new_envelope_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Envelope discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Message,
    Notification,
    Command,
    Session,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvelopeKind::Message => "message",
            EnvelopeKind::Notification => "notification",
            EnvelopeKind::Command => "command",
            EnvelopeKind::Session => "session",
        };
        f.write_str(s)
    }
}

// ── Enumerations ──────────────────────────────────────────────────────

/// Message lifecycle event carried by a Notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Accepted,
    Validated,
    Authorized,
    Dispatched,
    Received,
    Consumed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMethod {
    Get,
    Set,
    Delete,
    Observe,
    Subscribe,
    Unsubscribe,
    Merge,
}

/// Command status. `Pending` marks a request, anything else a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    #[default]
    Pending,
    Success,
    Failure,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    New,
    Negotiating,
    Authenticating,
    Established,
    Finishing,
    Finished,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::New => "new",
            SessionState::Negotiating => "negotiating",
            SessionState::Authenticating => "authenticating",
            SessionState::Established => "established",
            SessionState::Finishing => "finishing",
            SessionState::Finished => "finished",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionCompression {
    #[default]
    None,
    Gzip,
}

impl fmt::Display for SessionCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionCompression::None => f.write_str("none"),
            SessionCompression::Gzip => f.write_str("gzip"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEncryption {
    #[default]
    None,
    Tls,
}

impl fmt::Display for SessionEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEncryption::None => f.write_str("none"),
            SessionEncryption::Tls => f.write_str("tls"),
        }
    }
}

// ── Envelope kinds ────────────────────────────────────────────────────

/// Application message with an opaque typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "wire::MessageWire", into = "wire::MessageWire")]
pub struct Message {
    pub id: Option<String>,
    pub from: Option<Node>,
    pub to: Option<Node>,
    pub pp: Option<Node>,
    pub metadata: Option<Metadata>,
    pub content: Document,
}

impl Message {
    /// Create a message with a fresh id.
    pub fn new(to: Option<Node>, content: Document) -> Self {
        Self {
            id: Some(new_envelope_id()),
            from: None,
            to,
            pp: None,
            metadata: None,
            content,
        }
    }

    /// Create a fire-and-forget message (no id, no notifications expected).
    pub fn fire_and_forget(to: Option<Node>, content: Document) -> Self {
        Self {
            id: None,
            ..Self::new(to, content)
        }
    }
}

/// Delivery lifecycle notification about a previously sent envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pp: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    pub event: Event,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Notification {
    pub fn new(event: Event) -> Self {
        Self {
            id: None,
            from: None,
            to: None,
            pp: None,
            metadata: None,
            event,
            reason: None,
        }
    }

    /// Notification about `envelope`, addressed back to its sender.
    pub fn for_envelope(envelope: &Envelope, event: Event) -> Self {
        Self {
            id: envelope.id().map(str::to_string),
            to: envelope.from().cloned(),
            ..Self::new(event)
        }
    }

    pub fn failed(envelope: &Envelope, reason: Reason) -> Self {
        Self {
            reason: Some(reason),
            ..Self::for_envelope(envelope, Event::Failed)
        }
    }
}

/// Request/response unit addressing a resource by URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "wire::CommandWire", into = "wire::CommandWire")]
pub struct Command {
    pub id: Option<String>,
    pub from: Option<Node>,
    pub to: Option<Node>,
    pub pp: Option<Node>,
    pub metadata: Option<Metadata>,
    pub method: CommandMethod,
    pub uri: Option<String>,
    pub resource: Option<Document>,
    pub status: CommandStatus,
    pub reason: Option<Reason>,
}

impl Command {
    /// Create a pending request with a fresh id.
    pub fn new(method: CommandMethod, uri: impl Into<String>) -> Self {
        Self {
            id: Some(new_envelope_id()),
            from: None,
            to: None,
            pp: None,
            metadata: None,
            method,
            uri: Some(uri.into()),
            resource: None,
            status: CommandStatus::Pending,
            reason: None,
        }
    }

    pub fn with_resource(mut self, resource: Document) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Keep-alive ping request (`get /ping`).
    pub fn ping_request() -> Self {
        Self::new(CommandMethod::Get, PING_URI)
    }

    pub fn is_request(&self) -> bool {
        self.status == CommandStatus::Pending
    }

    pub fn is_ping_request(&self) -> bool {
        self.is_request()
            && self.method == CommandMethod::Get
            && self
                .uri
                .as_deref()
                .is_some_and(|uri| uri.eq_ignore_ascii_case(PING_URI))
    }

    /// Successful response correlated by id, addressed back to the requester.
    pub fn success_response(&self, resource: Option<Document>) -> Self {
        Self {
            id: self.id.clone(),
            from: None,
            to: self.from.clone(),
            pp: None,
            metadata: None,
            method: self.method,
            uri: None,
            resource,
            status: CommandStatus::Success,
            reason: None,
        }
    }

    pub fn failure_response(&self, reason: Reason) -> Self {
        Self {
            status: CommandStatus::Failure,
            reason: Some(reason),
            ..self.success_response(None)
        }
    }
}

/// Session-control frame driving the connection lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "wire::SessionWire", into = "wire::SessionWire")]
pub struct Session {
    pub id: Option<String>,
    pub from: Option<Node>,
    pub to: Option<Node>,
    pub pp: Option<Node>,
    pub metadata: Option<Metadata>,
    pub state: SessionState,
    pub encryption_options: Option<Vec<SessionEncryption>>,
    pub encryption: Option<SessionEncryption>,
    pub compression_options: Option<Vec<SessionCompression>>,
    pub compression: Option<SessionCompression>,
    pub scheme_options: Option<Vec<AuthenticationScheme>>,
    pub authentication: Option<Authentication>,
    pub reason: Option<Reason>,
}

impl Session {
    pub fn new(state: SessionState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    /// Scheme of the carried authentication payload.
    pub fn scheme(&self) -> Option<AuthenticationScheme> {
        self.authentication.as_ref().map(Authentication::scheme)
    }
}

// ── Envelope ──────────────────────────────────────────────────────────

/// One frame on the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Message(Message),
    Notification(Notification),
    Command(Command),
    Session(Session),
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Message(_) => EnvelopeKind::Message,
            Envelope::Notification(_) => EnvelopeKind::Notification,
            Envelope::Command(_) => EnvelopeKind::Command,
            Envelope::Session(_) => EnvelopeKind::Session,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Envelope::Message(m) => m.id.as_deref(),
            Envelope::Notification(n) => n.id.as_deref(),
            Envelope::Command(c) => c.id.as_deref(),
            Envelope::Session(s) => s.id.as_deref(),
        }
    }

    pub fn from(&self) -> Option<&Node> {
        match self {
            Envelope::Message(m) => m.from.as_ref(),
            Envelope::Notification(n) => n.from.as_ref(),
            Envelope::Command(c) => c.from.as_ref(),
            Envelope::Session(s) => s.from.as_ref(),
        }
    }

    pub fn to(&self) -> Option<&Node> {
        match self {
            Envelope::Message(m) => m.to.as_ref(),
            Envelope::Notification(n) => n.to.as_ref(),
            Envelope::Command(c) => c.to.as_ref(),
            Envelope::Session(s) => s.to.as_ref(),
        }
    }

    pub fn pp(&self) -> Option<&Node> {
        match self {
            Envelope::Message(m) => m.pp.as_ref(),
            Envelope::Notification(n) => n.pp.as_ref(),
            Envelope::Command(c) => c.pp.as_ref(),
            Envelope::Session(s) => s.pp.as_ref(),
        }
    }
}

impl From<Message> for Envelope {
    fn from(m: Message) -> Self {
        Envelope::Message(m)
    }
}

impl From<Notification> for Envelope {
    fn from(n: Notification) -> Self {
        Envelope::Notification(n)
    }
}

impl From<Command> for Envelope {
    fn from(c: Command) -> Self {
        Envelope::Command(c)
    }
}

impl From<Session> for Envelope {
    fn from(s: Session) -> Self {
        Envelope::Session(s)
    }
}

// ── Wire mapping ──────────────────────────────────────────────────────

mod wire {
    use super::*;

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageWire {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pp: Option<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Metadata>,
        #[serde(rename = "type")]
        media_type: String,
        content: serde_json::Value,
    }

    impl From<MessageWire> for Message {
        fn from(w: MessageWire) -> Self {
            Message {
                id: w.id,
                from: w.from,
                to: w.to,
                pp: w.pp,
                metadata: w.metadata,
                content: Document::new(w.media_type, w.content),
            }
        }
    }

    impl From<Message> for MessageWire {
        fn from(m: Message) -> Self {
            MessageWire {
                id: m.id,
                from: m.from,
                to: m.to,
                pp: m.pp,
                metadata: m.metadata,
                media_type: m.content.media_type,
                content: m.content.value,
            }
        }
    }

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CommandWire {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pp: Option<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Metadata>,
        method: CommandMethod,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uri: Option<String>,
        #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "is_pending")]
        status: CommandStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<Reason>,
    }

    fn is_pending(status: &CommandStatus) -> bool {
        *status == CommandStatus::Pending
    }

    impl From<CommandWire> for Command {
        fn from(w: CommandWire) -> Self {
            let resource = match (w.media_type, w.resource) {
                (Some(media_type), Some(value)) => Some(Document::new(media_type, value)),
                (Some(media_type), None) => Some(Document::new(media_type, serde_json::Value::Null)),
                (None, Some(value)) => Some(Document::new(crate::document::APPLICATION_JSON, value)),
                (None, None) => None,
            };
            Command {
                id: w.id,
                from: w.from,
                to: w.to,
                pp: w.pp,
                metadata: w.metadata,
                method: w.method,
                uri: w.uri,
                resource,
                status: w.status,
                reason: w.reason,
            }
        }
    }

    impl From<Command> for CommandWire {
        fn from(c: Command) -> Self {
            let (media_type, resource) = match c.resource {
                Some(doc) => (Some(doc.media_type), Some(doc.value)),
                None => (None, None),
            };
            CommandWire {
                id: c.id,
                from: c.from,
                to: c.to,
                pp: c.pp,
                metadata: c.metadata,
                method: c.method,
                uri: c.uri,
                media_type,
                resource,
                status: c.status,
                reason: c.reason,
            }
        }
    }

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SessionWire {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pp: Option<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Metadata>,
        state: SessionState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encryption_options: Option<Vec<SessionEncryption>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encryption: Option<SessionEncryption>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compression_options: Option<Vec<SessionCompression>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compression: Option<SessionCompression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scheme_options: Option<Vec<AuthenticationScheme>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scheme: Option<AuthenticationScheme>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        authentication: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<Reason>,
    }

    impl TryFrom<SessionWire> for Session {
        type Error = serde_json::Error;

        fn try_from(w: SessionWire) -> Result<Self, Self::Error> {
            let authentication = match w.scheme {
                Some(scheme) => Some(Authentication::from_wire(scheme, w.authentication)?),
                None => None,
            };
            Ok(Session {
                id: w.id,
                from: w.from,
                to: w.to,
                pp: w.pp,
                metadata: w.metadata,
                state: w.state,
                encryption_options: w.encryption_options,
                encryption: w.encryption,
                compression_options: w.compression_options,
                compression: w.compression,
                scheme_options: w.scheme_options,
                authentication,
                reason: w.reason,
            })
        }
    }

    impl From<Session> for SessionWire {
        fn from(s: Session) -> Self {
            SessionWire {
                scheme: s.scheme(),
                authentication: s.authentication.as_ref().map(Authentication::to_wire),
                id: s.id,
                from: s.from,
                to: s.to,
                pp: s.pp,
                metadata: s.metadata,
                state: s.state,
                encryption_options: s.encryption_options,
                encryption: s.encryption,
                compression_options: s.compression_options,
                compression: s.compression,
                scheme_options: s.scheme_options,
                reason: s.reason,
            }
        }
    }
}
