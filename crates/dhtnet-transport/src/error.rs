use std::sync::Arc;

use crate::traits::PeerId;

/// Errors that can occur in transport operations.
///
/// I/O sources are held behind [`Arc`] so the error stays `Clone`; a failed
/// dial is reported both to the caller and to anything recording it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: Arc<std::io::Error>,
    },

    /// Failed to open a stream to the specified peer.
    #[error("failed to dial {peer}: {source}")]
    Dial {
        peer: PeerId,
        source: Arc<std::io::Error>,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(Arc<std::io::Error>),

    /// No address is known for the peer.
    #[error("no known address for peer {0}")]
    UnknownPeer(PeerId),

    /// The identify exchange on a fresh stream failed.
    #[error("identify failed: {0}")]
    Identify(String),

    /// The remote end identified as a different peer than the one dialed.
    #[error("dialed {expected} but remote identified as {actual}")]
    PeerMismatch { expected: PeerId, actual: PeerId },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
