use std::time::Duration;

use dhtnet_frame::{FrameError, MessageType};
use dhtnet_transport::TransportError;

use crate::handler::HandlerError;
use crate::session::SessionState;

/// Coarse classification of a [`NetError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bytes on the wire could not be decoded, or a message was too large.
    Framing,
    /// The stream failed, ended, or timed out.
    Stream,
    /// The remote sent something this node does not handle.
    Protocol,
    /// The caller gave up.
    Cancelled,
    /// No stream to the peer could be opened.
    Unavailable,
}

/// Errors that can occur in messaging operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NetError {
    /// Transport-level error, typically a failed dial.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(FrameError),

    /// The stream was reset, locally or by the remote.
    #[error("stream reset")]
    StreamReset,

    /// The remote closed the stream before replying.
    #[error("stream closed before a reply arrived")]
    StreamClosed,

    /// No complete message arrived within the read timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The session already has an operation in flight.
    #[error("session busy ({0})")]
    SessionBusy(SessionState),

    /// No handler is registered for an inbound message type.
    #[error("no handler for message type {0}")]
    UnknownMessageType(MessageType),

    /// A handler rejected an inbound request.
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl NetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Frame(FrameError::Malformed(_) | FrameError::MessageTooLarge { .. }) => {
                ErrorKind::Framing
            }
            Self::Frame(_)
            | Self::StreamReset
            | Self::StreamClosed
            | Self::Timeout(_)
            | Self::SessionBusy(_) => ErrorKind::Stream,
            Self::UnknownMessageType(_) | Self::Handler(_) => ErrorKind::Protocol,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Transport(_) => ErrorKind::Unavailable,
        }
    }

    /// True when the stream was aborted rather than closed or corrupted.
    pub fn is_stream_reset(&self) -> bool {
        matches!(self, Self::StreamReset)
    }
}

impl From<FrameError> for NetError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::StreamReset => Self::StreamReset,
            FrameError::Timeout(limit) => Self::Timeout(limit),
            other => Self::Frame(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, NetError>;

#[cfg(test)]
mod tests {
    use std::io;

    use dhtnet_transport::PeerId;

    use super::*;

    #[test]
    fn frame_errors_map_to_typed_variants() {
        let reset = NetError::from(FrameError::from(io::Error::from(
            io::ErrorKind::ConnectionReset,
        )));
        assert!(reset.is_stream_reset());
        assert_eq!(reset.kind(), ErrorKind::Stream);

        let timeout = NetError::from(FrameError::Timeout(Duration::from_secs(1)));
        assert!(matches!(timeout, NetError::Timeout(d) if d == Duration::from_secs(1)));

        let closed = NetError::from(FrameError::ConnectionClosed);
        assert!(matches!(closed, NetError::Frame(FrameError::ConnectionClosed)));
        assert_eq!(closed.kind(), ErrorKind::Stream);
    }

    #[test]
    fn kinds() {
        assert_eq!(
            NetError::from(FrameError::Malformed("x".into())).kind(),
            ErrorKind::Framing
        );
        assert_eq!(
            NetError::from(FrameError::MessageTooLarge { size: 2, max: 1 }).kind(),
            ErrorKind::Framing
        );
        assert_eq!(
            NetError::UnknownMessageType(MessageType(99)).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            NetError::from(HandlerError::Failed("boom".into())).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(NetError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            NetError::from(TransportError::UnknownPeer(PeerId::new("p"))).kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(
            NetError::SessionBusy(SessionState::AwaitingReply).kind(),
            ErrorKind::Stream
        );
    }

    #[test]
    fn display() {
        assert_eq!(
            NetError::SessionBusy(SessionState::Sending).to_string(),
            "session busy (sending)"
        );
        assert_eq!(
            NetError::UnknownMessageType(MessageType::PING).to_string(),
            "no handler for message type ping"
        );
    }
}
