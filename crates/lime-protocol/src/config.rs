use std::time::Duration;

/// Environment override for the per-kind queue capacity.
pub const BUFFER_ENV: &str = "LIME_CHANNEL_BUFFER";

const DEFAULT_BUFFER: usize = 64;

/// Configuration for a [`Channel`](crate::Channel).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Capacity of each per-kind delivery queue.
    pub(crate) buffer: usize,
    /// Back-fill missing `from`/`to` on inbound traffic.
    pub(crate) fill_envelope_recipients: bool,
    /// Answer inbound `get /ping` commands without surfacing them.
    pub(crate) auto_reply_pings: bool,
    /// Send a ping when nothing has been received for this long.
    pub(crate) remote_ping_interval: Option<Duration>,
    /// Finish the session when nothing has been received for this long.
    pub(crate) remote_idle_timeout: Option<Duration>,
    /// Upper bound on one transport send.
    pub(crate) send_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        let buffer = std::env::var(BUFFER_ENV)
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|&value| value > 0)
            .unwrap_or(DEFAULT_BUFFER);
        Self {
            buffer,
            fill_envelope_recipients: false,
            auto_reply_pings: true,
            remote_ping_interval: None,
            remote_idle_timeout: None,
            send_timeout: None,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(mut self, capacity: usize) -> Self {
        self.buffer = capacity.max(1);
        self
    }

    pub fn fill_envelope_recipients(mut self, enabled: bool) -> Self {
        self.fill_envelope_recipients = enabled;
        self
    }

    pub fn auto_reply_pings(mut self, enabled: bool) -> Self {
        self.auto_reply_pings = enabled;
        self
    }

    pub fn remote_ping_interval(mut self, interval: Duration) -> Self {
        self.remote_ping_interval = Some(interval);
        self
    }

    pub fn remote_idle_timeout(mut self, timeout: Duration) -> Self {
        self.remote_idle_timeout = Some(timeout);
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Whether the keep-alive supervisor has anything to do.
    pub(crate) fn keep_alive_enabled(&self) -> bool {
        self.remote_ping_interval.is_some() || self.remote_idle_timeout.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = ChannelConfig::new()
            .buffer(8)
            .fill_envelope_recipients(true)
            .auto_reply_pings(false)
            .remote_ping_interval(Duration::from_secs(5))
            .remote_idle_timeout(Duration::from_secs(30));

        assert_eq!(config.buffer, 8);
        assert!(config.fill_envelope_recipients);
        assert!(!config.auto_reply_pings);
        assert_eq!(config.remote_ping_interval, Some(Duration::from_secs(5)));
        assert!(config.keep_alive_enabled());
        assert!(config.send_timeout.is_none());
    }

    #[test]
    fn zero_buffer_is_clamped() {
        assert_eq!(ChannelConfig::new().buffer(0).buffer, 1);
    }
}
