use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Opaque identifier of a remote node.
///
/// Cheap to clone; used as the key for stream pooling and peer bookkeeping.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Arc<str>);

impl PeerId {
    /// Create a peer identifier from its textual form.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// The textual form of this identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", &self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// A connected, negotiated, bidirectional byte stream to one remote peer.
///
/// Dropping a stream closes it. [`DuplexStream::reset`] aborts it instead,
/// which the remote end observes as `ConnectionReset` rather than
/// end-of-input. A graceful half-close is `AsyncWriteExt::shutdown`.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// The peer on the other end of this stream.
    fn remote_peer(&self) -> &PeerId;

    /// Protocols the remote end advertised when the stream was opened.
    fn remote_protocols(&self) -> &[String] {
        &[]
    }

    /// Abort the stream. Idempotent.
    fn reset(&mut self);
}

/// Boxed duplex stream as handed out by dialers and listeners.
pub type BoxStream = Box<dyn DuplexStream>;

/// Opens new outbound streams to peers.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Open a fresh stream to `peer`.
    async fn open_stream(&self, peer: &PeerId) -> Result<BoxStream>;
}

/// Yields inbound streams opened by remote peers.
#[async_trait]
pub trait Listener: Send + 'static {
    /// Wait for the next inbound stream.
    ///
    /// Returns [`TransportError::Shutdown`](crate::TransportError::Shutdown)
    /// once no further streams can arrive.
    async fn accept(&mut self) -> Result<BoxStream>;

    /// The identity inbound streams are addressed to.
    fn local_peer(&self) -> &PeerId;
}
