//! LIME protocol layer.
//!
//! Session channel, establishment and listeners on top of `lime-transport`.
//!
//! A [`Channel`] owns one transport, enforces the session state machine and
//! splits the inbound stream into per-kind queues. [`ServerChannel`] and
//! [`ClientChannel`] drive session establishment; [`ChannelListener`] and
//! [`BufferedChannelListener`] feed application consumers once established.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use lime_protocol::{
//!     AuthenticationResult, ChannelConfig, ClientChannel, EstablishmentOptions, ServerChannel,
//!     ServerEstablishment,
//! };
//! use lime_transport::{
//!     Authentication, AuthenticationScheme, CancellationToken, Node, PipeConfig, PipeTransport,
//! };
//!
//! # async fn example() -> Result<(), lime_protocol::ChannelError> {
//! let (client_end, server_end) = PipeTransport::pair(PipeConfig::new());
//! let server_node: Node = "postmaster@example.org/server".parse().expect("valid node");
//! let server = ServerChannel::accept(server_node, server_end, ChannelConfig::new());
//! let client = ClientChannel::new(client_end, ChannelConfig::new());
//! let cancel = CancellationToken::new();
//!
//! let establishment = ServerEstablishment::new(|node: Option<&Node>, _: &Authentication| {
//!     AuthenticationResult::Success(node.cloned().unwrap_or_default())
//! })
//! .scheme_options(vec![AuthenticationScheme::Plain]);
//! let options = EstablishmentOptions::new(
//!     "alice@example.org".parse().expect("valid identity"),
//!     Authentication::plain("secret"),
//! )
//! .instance("home");
//!
//! let (server_state, client_session) = tokio::join!(
//!     server.establish_session(&establishment, &cancel),
//!     client.establish_session(&options, &cancel),
//! );
//! println!("{:?} / {:?}", server_state?, client_session?.state);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod listener;
pub mod session;
pub mod state;

pub use channel::{Channel, ChannelModule};
pub use config::{ChannelConfig, BUFFER_ENV};
pub use error::{ChannelError, CloseReason};
pub use listener::{
    BufferedChannelListener, ChannelListener, Completion, Consumer, Consumers, EstablishedReceiver,
};
pub use session::{
    AuthenticationResult, Authenticator, ClientChannel, EstablishmentOptions, ServerChannel,
    ServerEstablishment,
};
pub use state::SessionStateMachine;
