//! Keep-alive supervision.
//!
//! Pings the remote party after `remote_ping_interval` of inbound silence and
//! finishes the session after `remote_idle_timeout` of it. Any inbound frame
//! resets both clocks.

use lime_transport::{Command, SessionState};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{lock, Channel};
use crate::error::CloseReason;

/// Unanswered ping ids remembered for swallowing late responses. Older ids
/// are forgotten; a response to one of them reaches `receive_command`.
pub(super) const MAX_PENDING_PINGS: usize = 4;

impl Channel {
    pub(super) async fn run_keep_alive(self) {
        let ping_interval = self.inner.config.remote_ping_interval;
        let idle_timeout = self.inner.config.remote_idle_timeout;
        let mut last_ping = Instant::now();

        tracing::debug!(?ping_interval, ?idle_timeout, "keep-alive started");
        loop {
            let last_received = *lock(&self.inner.last_received);
            let ping_at = ping_interval.map(|interval| last_received.max(last_ping) + interval);
            let idle_at = idle_timeout.map(|timeout| last_received + timeout);
            let Some(wake) = ping_at.into_iter().chain(idle_at).min() else {
                return;
            };

            tokio::select! {
                biased;
                _ = self.inner.closed.cancelled() => return,
                _ = tokio::time::sleep_until(wake) => {}
            }

            let now = Instant::now();
            let last_received = *lock(&self.inner.last_received);
            if idle_timeout.is_some_and(|timeout| now >= last_received + timeout) {
                self.shut_down_idle().await;
                return;
            }
            if ping_interval.is_some_and(|interval| now >= last_received.max(last_ping) + interval) {
                last_ping = now;
                if self.state() == SessionState::Established {
                    self.send_ping().await;
                }
            }
        }
    }

    async fn send_ping(&self) {
        let ping = Command {
            to: self.remote_node(),
            ..Command::ping_request()
        };
        if let Some(id) = &ping.id {
            let mut pending = lock(&self.inner.pending_pings);
            if pending.len() == MAX_PENDING_PINGS {
                pending.pop_front();
            }
            pending.push_back(id.clone());
        }
        tracing::trace!(id = ?ping.id, "sending keep-alive ping");
        if let Err(e) = self.emit(ping.into(), &self.inner.closed).await {
            tracing::debug!(error = %e, "keep-alive ping failed");
        }
    }

    async fn shut_down_idle(&self) {
        tracing::warn!(
            session_id = ?self.session_id(),
            "remote idle timeout elapsed, finishing session"
        );
        if self.state() == SessionState::Established
            && self.set_state(SessionState::Finishing).await.is_ok()
        {
            let finishing = self.session_frame(SessionState::Finishing);
            if let Err(e) = self.emit(finishing.into(), &self.inner.closed).await {
                tracing::debug!(error = %e, "failed to send finishing session");
            }
        }
        if let Err(e) = self
            .shut_down(CloseReason::IdleTimeout, &CancellationToken::new())
            .await
        {
            tracing::debug!(error = %e, "transport close after idle timeout failed");
        }
    }
}
