//! Session establishment on top of [`Channel`](crate::Channel) primitives.
//!
//! [`ServerChannel`] accepts sessions, [`ClientChannel`] initiates them.
//! Both expose the individual handshake steps plus an `establish_session`
//! driver that runs the whole exchange.

mod client;
mod server;

pub use client::{ClientChannel, EstablishmentOptions};
pub use server::{AuthenticationResult, Authenticator, ServerChannel, ServerEstablishment};

use std::future::Future;
use std::time::Duration;

use lime_transport::{CancellationToken, SessionCompression, SessionEncryption};

use crate::channel::Channel;
use crate::error::ChannelError;

/// Apply the negotiated options to the transport, touching only what changed.
async fn upgrade_transport(
    channel: &Channel,
    compression: SessionCompression,
    encryption: SessionEncryption,
    cancel: &CancellationToken,
) -> Result<(), ChannelError> {
    let transport = channel.transport();
    if transport.compression() != compression {
        transport.set_compression(compression, cancel).await?;
        tracing::debug!(%compression, "transport compression upgraded");
    }
    if transport.encryption() != encryption {
        transport.set_encryption(encryption, cancel).await?;
        tracing::debug!(%encryption, "transport encryption upgraded");
    }
    Ok(())
}

/// Race `future` against an optional deadline.
async fn within<T>(
    timeout: Option<Duration>,
    future: impl Future<Output = Result<T, ChannelError>>,
) -> Result<T, ChannelError> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, future)
            .await
            .unwrap_or(Err(ChannelError::Timeout)),
        None => future.await,
    }
}
