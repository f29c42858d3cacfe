use std::io::{self, ErrorKind};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream as Pipe, ReadBuf};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::{BoxStream, Dialer, DuplexStream, Listener, PeerId};

/// Per-direction buffer of an in-memory stream.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

const ACCEPT_BACKLOG: usize = 64;

struct Endpoint {
    inbound: mpsc::Sender<BoxStream>,
    protocols: Vec<String>,
}

/// In-process network: a registry of listening peers that dialers connect to.
///
/// Cloning shares the registry.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<DashMap<PeerId, Endpoint>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer` as reachable and return the listener for its inbound
    /// streams. Re-registering a peer replaces its previous listener.
    pub fn listen<I, S>(&self, peer: PeerId, protocols: I) -> MemoryListener
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        self.endpoints.insert(
            peer.clone(),
            Endpoint {
                inbound: tx,
                protocols: protocols.into_iter().map(Into::into).collect(),
            },
        );
        MemoryListener {
            local: peer,
            inbound: rx,
        }
    }

    /// Remove `peer` from the network. Its listener reports shutdown once
    /// queued streams are drained.
    pub fn unregister(&self, peer: &PeerId) {
        self.endpoints.remove(peer);
    }

    /// Create a dialer that opens streams on behalf of `local`.
    pub fn dialer<I, S>(&self, local: PeerId, protocols: I) -> MemoryDialer
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MemoryDialer {
            network: self.clone(),
            local,
            protocols: protocols.into_iter().map(Into::into).collect(),
            dials: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Opens in-memory streams to peers registered on a [`MemoryNetwork`].
pub struct MemoryDialer {
    network: MemoryNetwork,
    local: PeerId,
    protocols: Vec<String>,
    dials: Arc<AtomicUsize>,
}

impl MemoryDialer {
    /// Number of streams successfully opened so far.
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::Relaxed)
    }

    /// The identity this dialer connects as.
    pub fn local_peer(&self) -> &PeerId {
        &self.local
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn open_stream(&self, peer: &PeerId) -> Result<BoxStream> {
        let (inbound, remote_protocols) = match self.network.endpoints.get(peer) {
            Some(endpoint) => (endpoint.inbound.clone(), endpoint.protocols.clone()),
            None => return Err(TransportError::UnknownPeer(peer.clone())),
        };

        let (local_end, remote_end) = MemStream::connect(
            self.local.clone(),
            self.protocols.clone(),
            peer.clone(),
            remote_protocols,
        );

        inbound
            .send(Box::new(remote_end))
            .await
            .map_err(|_| TransportError::Dial {
                peer: peer.clone(),
                source: Arc::new(io::Error::new(
                    ErrorKind::ConnectionRefused,
                    "listener closed",
                )),
            })?;

        self.dials.fetch_add(1, Ordering::Relaxed);
        trace!(local = %self.local, remote = %peer, "opened in-memory stream");
        Ok(Box::new(local_end))
    }
}

/// Inbound side of a peer registered on a [`MemoryNetwork`].
pub struct MemoryListener {
    local: PeerId,
    inbound: mpsc::Receiver<BoxStream>,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&mut self) -> Result<BoxStream> {
        self.inbound.recv().await.ok_or(TransportError::Shutdown)
    }

    fn local_peer(&self) -> &PeerId {
        &self.local
    }
}

/// One end of an in-memory duplex stream.
///
/// Both ends share a reset flag: after either end calls
/// [`DuplexStream::reset`], the other end's reads and writes fail with
/// `ConnectionReset` instead of reporting end-of-input.
pub struct MemStream {
    pipe: Option<Pipe>,
    remote: PeerId,
    remote_protocols: Vec<String>,
    reset: Arc<AtomicBool>,
}

impl MemStream {
    /// Create a connected pair: the first end talks to `remote`, the second
    /// end talks to `local`.
    pub fn pair(local: PeerId, remote: PeerId) -> (Self, Self) {
        Self::connect(local, Vec::new(), remote, Vec::new())
    }

    fn connect(
        local: PeerId,
        local_protocols: Vec<String>,
        remote: PeerId,
        remote_protocols: Vec<String>,
    ) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(DEFAULT_PIPE_CAPACITY);
        let reset = Arc::new(AtomicBool::new(false));
        let local_end = Self {
            pipe: Some(a),
            remote,
            remote_protocols,
            reset: Arc::clone(&reset),
        };
        let remote_end = Self {
            pipe: Some(b),
            remote: local,
            remote_protocols: local_protocols,
            reset,
        };
        (local_end, remote_end)
    }

    fn was_reset(&self) -> bool {
        self.reset.load(Ordering::SeqCst)
    }
}

fn reset_error() -> io::Error {
    io::Error::new(ErrorKind::ConnectionReset, "stream reset")
}

impl AsyncRead for MemStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(pipe) = this.pipe.as_mut() else {
            return Poll::Ready(Err(reset_error()));
        };

        let before = buf.filled().len();
        let wants_data = buf.remaining() > 0;
        match Pin::new(pipe).poll_read(cx, buf) {
            Poll::Ready(Ok(()))
                if wants_data && buf.filled().len() == before && this.was_reset() =>
            {
                Poll::Ready(Err(reset_error()))
            }
            other => other,
        }
    }
}

impl AsyncWrite for MemStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(pipe) = this.pipe.as_mut() else {
            return Poll::Ready(Err(reset_error()));
        };

        match Pin::new(pipe).poll_write(cx, data) {
            Poll::Ready(Err(_)) if this.was_reset() => Poll::Ready(Err(reset_error())),
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().pipe.as_mut() {
            Some(pipe) => Pin::new(pipe).poll_flush(cx),
            None => Poll::Ready(Err(reset_error())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().pipe.as_mut() {
            Some(pipe) => Pin::new(pipe).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl DuplexStream for MemStream {
    fn remote_peer(&self) -> &PeerId {
        &self.remote
    }

    fn remote_protocols(&self) -> &[String] {
        &self.remote_protocols
    }

    fn reset(&mut self) {
        self.reset.store(true, Ordering::SeqCst);
        if self.pipe.take().is_some() {
            trace!(remote = %self.remote, "in-memory stream reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn peer(name: &str) -> PeerId {
        PeerId::new(name)
    }

    #[tokio::test]
    async fn dial_delivers_stream_to_listener() {
        let network = MemoryNetwork::new();
        let mut listener = network.listen(peer("server"), ["/ipfs/kad/1.0.0"]);
        let dialer = network.dialer(peer("client"), ["/ipfs/kad/1.0.0", "/meshsub/1.1.0"]);

        let mut outbound = dialer.open_stream(&peer("server")).await.unwrap();
        let mut inbound = listener.accept().await.unwrap();

        assert_eq!(outbound.remote_peer(), &peer("server"));
        assert_eq!(outbound.remote_protocols(), ["/ipfs/kad/1.0.0"]);
        assert_eq!(inbound.remote_peer(), &peer("client"));
        assert_eq!(inbound.remote_protocols().len(), 2);
        assert_eq!(listener.local_peer(), &peer("server"));

        outbound.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        inbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        inbound.write_all(b"pong").await.unwrap();
        outbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        assert_eq!(dialer.dial_count(), 1);
    }

    #[tokio::test]
    async fn dial_unknown_peer_fails() {
        let network = MemoryNetwork::new();
        let dialer = network.dialer(peer("client"), Vec::<String>::new());

        let err = match dialer.open_stream(&peer("nobody")).await {
            Ok(_) => panic!("dial should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, TransportError::UnknownPeer(p) if p == peer("nobody")));
        assert_eq!(dialer.dial_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_is_end_of_input() {
        let (mut a, mut b) = MemStream::pair(peer("a"), peer("b"));

        a.write_all(b"bye").await.unwrap();
        a.shutdown().await.unwrap();

        let mut received = Vec::new();
        b.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"bye");
    }

    #[tokio::test]
    async fn reset_is_connection_reset_on_remote_read() {
        let (mut a, mut b) = MemStream::pair(peer("a"), peer("b"));

        a.write_all(b"partial").await.unwrap();
        a.reset();

        // Data written before the reset is still readable.
        let mut buf = [0u8; 7];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"partial");

        let err = b.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn write_after_remote_reset_fails() {
        let (mut a, mut b) = MemStream::pair(peer("a"), peer("b"));
        b.reset();

        let err = a.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let (mut a, _b) = MemStream::pair(peer("a"), peer("b"));
        a.reset();
        a.reset();

        let mut buf = [0u8; 1];
        let err = a.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn unregister_shuts_listener_down() {
        let network = MemoryNetwork::new();
        let mut listener = network.listen(peer("server"), Vec::<String>::new());
        network.unregister(&peer("server"));

        let err = match listener.accept().await {
            Ok(_) => panic!("accept should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, TransportError::Shutdown));
    }
}
