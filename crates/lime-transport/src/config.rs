use crate::envelope::{SessionCompression, SessionEncryption};

/// Configuration for an in-memory [`PipeTransport`](crate::PipeTransport) pair.
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use lime_transport::{PipeConfig, SessionCompression};
///
/// let config = PipeConfig::new()
///     .buffer(64)
///     .compression_options(vec![SessionCompression::None, SessionCompression::Gzip]);
/// ```
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Frames buffered in each direction before `send` waits.
    pub(crate) buffer: usize,
    /// Maximum serialized frame size in bytes.
    pub(crate) max_frame_size: usize,
    pub(crate) compression_options: Vec<SessionCompression>,
    pub(crate) encryption_options: Vec<SessionEncryption>,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeConfig {
    pub fn new() -> Self {
        Self {
            buffer: 256,
            max_frame_size: 1024 * 1024, // 1 MB
            compression_options: vec![SessionCompression::None],
            encryption_options: vec![SessionEncryption::None],
        }
    }

    /// Set the per-direction frame buffer (default: 256).
    pub fn buffer(mut self, capacity: usize) -> Self {
        self.buffer = capacity.max(1);
        self
    }

    /// Set maximum serialized frame size (default: 1 MB).
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Compression modes both ends accept.
    pub fn compression_options(mut self, options: Vec<SessionCompression>) -> Self {
        self.compression_options = options;
        self
    }

    /// Encryption modes both ends accept.
    pub fn encryption_options(mut self, options: Vec<SessionEncryption>) -> Self {
        self.encryption_options = options;
        self
    }
}
