use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FrameError {
    /// The bytes on the wire do not form a valid message.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The message exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(Arc<io::Error>),

    /// The remote end aborted the stream.
    #[error("stream reset")]
    StreamReset,

    /// A read or write did not complete within the configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// True when the stream was aborted rather than closed or corrupted.
    pub fn is_stream_reset(&self) -> bool {
        matches!(self, Self::StreamReset)
    }
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset => Self::StreamReset,
            _ => Self::Io(Arc::new(err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
