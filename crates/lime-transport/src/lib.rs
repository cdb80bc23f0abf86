//! LIME transport layer.
//!
//! Envelope model, addressing, the serializer and transport contracts that a
//! channel is built on, plus an in-memory transport pair for local use.
//!
//! # Quick start
//!
//! ```rust
//! use lime_transport::{Document, Envelope, Message, PipeConfig, PipeTransport, Transport};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), lime_transport::TransportError> {
//! let (client, server) = PipeTransport::pair(PipeConfig::new());
//! let cancel = CancellationToken::new();
//!
//! let message = Message::new(Some("bob@example.org".parse()?), Document::text("Hello!"));
//! client.send(message.into(), &cancel).await?;
//!
//! if let Envelope::Message(received) = server.receive(&cancel).await? {
//!     println!("{:?}", received.content.as_text());
//! }
//! # Ok(())
//! # }
//! ```

mod authentication;
mod config;
mod document;
mod envelope;
mod error;
mod listener;
mod node;
mod pipe;
pub mod reason;
mod serializer;
mod transport;

pub use authentication::{Authentication, AuthenticationScheme};
pub use config::PipeConfig;
pub use document::{Document, APPLICATION_JSON, PING_MEDIA_TYPE, TEXT_PLAIN};
pub use envelope::{
    new_envelope_id, Command, CommandMethod, CommandStatus, Envelope, EnvelopeKind, Event,
    Message, Metadata, Notification, Session, SessionCompression, SessionEncryption,
    SessionState, PING_URI,
};
pub use error::TransportError;
pub use listener::{PipeConnector, PipeTransportListener, TransportListener};
pub use node::{Identity, Node};
pub use pipe::PipeTransport;
pub use reason::Reason;
pub use serializer::{EnvelopeSerializer, JsonEnvelopeSerializer};
pub use transport::{Transport, TransportEvent, TransportEvents};

// Re-export for implementors of `Transport` and callers of its methods.
pub use tokio_util::sync::CancellationToken;
