use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::traits::{BoxStream, Dialer, DuplexStream, Listener, PeerId};

/// Upper bound on an encoded identify message.
pub const MAX_IDENTIFY_SIZE: usize = 4096;

/// How long either side waits for the identify exchange to complete.
pub const DEFAULT_IDENTIFY_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_PEER_ID_LEN: usize = 128;

/// First message on every TCP stream, sent by both ends.
///
/// Encoded as a 4-byte big-endian length followed by a JSON body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    pub peer_id: String,
    #[serde(default)]
    pub protocols: Vec<String>,
}

impl Identify {
    pub fn new<I, S>(peer: &PeerId, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            peer_id: peer.as_str().to_string(),
            protocols: protocols.into_iter().map(Into::into).collect(),
        }
    }

    /// Check the advertised identity and return it as a [`PeerId`].
    pub fn validate(&self) -> Result<PeerId> {
        if self.peer_id.is_empty() {
            return Err(TransportError::Identify("empty peer id".to_string()));
        }
        if self.peer_id.len() > MAX_PEER_ID_LEN {
            return Err(TransportError::Identify(format!(
                "peer id exceeds {MAX_PEER_ID_LEN} bytes"
            )));
        }
        Ok(PeerId::new(&self.peer_id))
    }
}

async fn write_identify<W>(writer: &mut W, identify: &Identify) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(identify)
        .map_err(|e| TransportError::Identify(format!("encode: {e}")))?;
    if body.len() > MAX_IDENTIFY_SIZE {
        return Err(TransportError::Identify(format!(
            "identify message of {} bytes exceeds {MAX_IDENTIFY_SIZE}",
            body.len()
        )));
    }

    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_identify<R>(reader: &mut R) -> Result<Identify>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_IDENTIFY_SIZE {
        return Err(TransportError::Identify(format!(
            "identify message of {len} bytes exceeds {MAX_IDENTIFY_SIZE}"
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body).map_err(|e| TransportError::Identify(format!("decode: {e}")))
}

async fn exchange_identify(
    stream: &mut TcpStream,
    local: &Identify,
    timeout: Duration,
) -> Result<(PeerId, Vec<String>)> {
    let remote = tokio::time::timeout(timeout, async {
        write_identify(&mut *stream, local).await?;
        read_identify(&mut *stream).await
    })
    .await
    .map_err(|_| TransportError::Identify(format!("timed out after {timeout:?}")))??;

    let peer = remote.validate()?;
    Ok((peer, remote.protocols))
}

/// Run identify on a freshly accepted connection.
async fn identify_inbound(
    mut stream: TcpStream,
    addr: SocketAddr,
    local: Identify,
    timeout: Duration,
) -> (SocketAddr, Result<TcpDuplexStream>) {
    let identified = exchange_identify(&mut stream, &local, timeout)
        .await
        .map(|(remote, protocols)| TcpDuplexStream::new(stream, remote, protocols));
    (addr, identified)
}

fn set_nodelay(stream: &TcpStream) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(error = %err, "failed to set TCP_NODELAY");
    }
}

/// TCP listener that yields identified inbound streams.
///
/// Each connection identifies on its own task, so a slow or silent client
/// only holds up itself.
pub struct TcpTransport {
    listener: TcpListener,
    handshakes: JoinSet<(SocketAddr, Result<TcpDuplexStream>)>,
    local_peer: PeerId,
    local: Identify,
    local_addr: SocketAddr,
    identify_timeout: Duration,
}

impl TcpTransport {
    /// Bind to `addr` and accept streams addressed to `local`.
    pub async fn bind<I, S>(addr: &str, local: PeerId, protocols: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bind_err = |e: io::Error| TransportError::Bind {
            addr: addr.to_string(),
            source: Arc::new(e),
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        debug!(%local_addr, peer = %local, "tcp transport listening");
        Ok(Self {
            listener,
            handshakes: JoinSet::new(),
            local: Identify::new(&local, protocols),
            local_peer: local,
            local_addr,
            identify_timeout: DEFAULT_IDENTIFY_TIMEOUT,
        })
    }

    pub fn with_identify_timeout(mut self, timeout: Duration) -> Self {
        self.identify_timeout = timeout;
        self
    }

    /// The address actually bound, with any port 0 resolved.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Listener for TcpTransport {
    async fn accept(&mut self) -> Result<BoxStream> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = accepted.map_err(|e| TransportError::Accept(Arc::new(e)))?;
                    set_nodelay(&stream);
                    self.handshakes.spawn(identify_inbound(
                        stream,
                        addr,
                        self.local.clone(),
                        self.identify_timeout,
                    ));
                }
                Some(joined) = self.handshakes.join_next(), if !self.handshakes.is_empty() => {
                    match joined {
                        Ok((addr, Ok(stream))) => {
                            debug!(%addr, remote = %stream.remote, "accepted tcp stream");
                            return Ok(Box::new(stream));
                        }
                        Ok((addr, Err(err))) => {
                            warn!(%addr, error = %err, "dropping inbound connection");
                        }
                        Err(err) => {
                            warn!(error = %err, "identify task failed");
                        }
                    }
                }
            }
        }
    }

    fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }
}

/// Opens one TCP connection per stream to peers with a known address.
pub struct TcpDialer {
    local: Identify,
    addresses: DashMap<PeerId, SocketAddr>,
    dials: AtomicUsize,
    identify_timeout: Duration,
}

impl TcpDialer {
    pub fn new<I, S>(local: &PeerId, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            local: Identify::new(local, protocols),
            addresses: DashMap::new(),
            dials: AtomicUsize::new(0),
            identify_timeout: DEFAULT_IDENTIFY_TIMEOUT,
        }
    }

    pub fn with_identify_timeout(mut self, timeout: Duration) -> Self {
        self.identify_timeout = timeout;
        self
    }

    /// Record where `peer` can be reached, replacing any previous address.
    pub fn add_address(&self, peer: PeerId, addr: SocketAddr) {
        self.addresses.insert(peer, addr);
    }

    /// Number of streams successfully opened so far.
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn open_stream(&self, peer: &PeerId) -> Result<BoxStream> {
        let addr = self
            .addresses
            .get(peer)
            .map(|entry| *entry)
            .ok_or_else(|| TransportError::UnknownPeer(peer.clone()))?;

        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Dial {
                peer: peer.clone(),
                source: Arc::new(e),
            })?;
        set_nodelay(&stream);

        let (remote, protocols) =
            exchange_identify(&mut stream, &self.local, self.identify_timeout).await?;
        if remote != *peer {
            return Err(TransportError::PeerMismatch {
                expected: peer.clone(),
                actual: remote,
            });
        }

        self.dials.fetch_add(1, Ordering::Relaxed);
        debug!(%addr, %remote, "opened tcp stream");
        Ok(Box::new(TcpDuplexStream::new(stream, remote, protocols)))
    }
}

/// An identified TCP connection.
///
/// Reset closes the socket immediately; the remote end sees the connection
/// end, mid-frame or otherwise.
pub struct TcpDuplexStream {
    inner: Option<TcpStream>,
    remote: PeerId,
    protocols: Vec<String>,
}

impl TcpDuplexStream {
    fn new(stream: TcpStream, remote: PeerId, protocols: Vec<String>) -> Self {
        Self {
            inner: Some(stream),
            remote,
            protocols,
        }
    }
}

fn reset_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, "stream reset")
}

impl AsyncRead for TcpDuplexStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().inner.as_mut() {
            Some(stream) => Pin::new(stream).poll_read(cx, buf),
            None => Poll::Ready(Err(reset_error())),
        }
    }
}

impl AsyncWrite for TcpDuplexStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().inner.as_mut() {
            Some(stream) => Pin::new(stream).poll_write(cx, data),
            None => Poll::Ready(Err(reset_error())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().inner.as_mut() {
            Some(stream) => Pin::new(stream).poll_flush(cx),
            None => Poll::Ready(Err(reset_error())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().inner.as_mut() {
            Some(stream) => Pin::new(stream).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl DuplexStream for TcpDuplexStream {
    fn remote_peer(&self) -> &PeerId {
        &self.remote
    }

    fn remote_protocols(&self) -> &[String] {
        &self.protocols
    }

    fn reset(&mut self) {
        if self.inner.take().is_some() {
            debug!(remote = %self.remote, "tcp stream reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    const KAD: &str = "/ipfs/kad/1.0.0";

    async fn bind(name: &str) -> TcpTransport {
        TcpTransport::bind("127.0.0.1:0", PeerId::new(name), [KAD])
            .await
            .expect("bind should succeed")
    }

    #[test]
    fn identify_validation() {
        let ok = Identify::new(&PeerId::new("node-a"), [KAD]);
        assert_eq!(ok.validate().unwrap(), PeerId::new("node-a"));

        let empty = Identify {
            peer_id: String::new(),
            protocols: Vec::new(),
        };
        assert!(matches!(empty.validate(), Err(TransportError::Identify(_))));

        let long = Identify {
            peer_id: "x".repeat(MAX_PEER_ID_LEN + 1),
            protocols: Vec::new(),
        };
        assert!(matches!(long.validate(), Err(TransportError::Identify(_))));
    }

    #[tokio::test]
    async fn identify_round_trips_over_a_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let sent = Identify::new(&PeerId::new("node-a"), [KAD, "/meshsub/1.1.0"]);

        write_identify(&mut a, &sent).await.unwrap();
        let received = read_identify(&mut b).await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn oversized_identify_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32((MAX_IDENTIFY_SIZE + 1) as u32).await.unwrap();

        let err = read_identify(&mut b).await.unwrap_err();
        assert!(matches!(err, TransportError::Identify(_)));
    }

    #[tokio::test]
    async fn dial_and_accept_exchange_identities() {
        let mut transport = bind("server").await;
        let dialer = TcpDialer::new(&PeerId::new("client"), [KAD, "/meshsub/1.1.0"]);
        dialer.add_address(PeerId::new("server"), transport.local_addr());

        let server = PeerId::new("server");
        let (outbound, inbound) = tokio::join!(dialer.open_stream(&server), transport.accept());
        let mut outbound = outbound.expect("dial should succeed");
        let mut inbound = inbound.expect("accept should succeed");

        assert_eq!(outbound.remote_peer(), &server);
        assert_eq!(outbound.remote_protocols(), [KAD]);
        assert_eq!(inbound.remote_peer(), &PeerId::new("client"));
        assert_eq!(inbound.remote_protocols().len(), 2);
        assert_eq!(dialer.dial_count(), 1);

        outbound.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        inbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn dial_detects_peer_mismatch() {
        let mut transport = bind("actual").await;
        let dialer = TcpDialer::new(&PeerId::new("client"), [KAD]);
        dialer.add_address(PeerId::new("expected"), transport.local_addr());

        let accept = tokio::spawn(async move {
            let _ = transport.accept().await;
        });

        let err = match dialer.open_stream(&PeerId::new("expected")).await {
            Ok(_) => panic!("dial should fail"),
            Err(err) => err,
        };
        assert!(matches!(
            err,
            TransportError::PeerMismatch { ref expected, ref actual }
                if expected.as_str() == "expected" && actual.as_str() == "actual"
        ));
        assert_eq!(dialer.dial_count(), 0);
        accept.abort();
    }

    #[tokio::test]
    async fn dial_without_address_fails() {
        let dialer = TcpDialer::new(&PeerId::new("client"), [KAD]);
        let err = match dialer.open_stream(&PeerId::new("nowhere")).await {
            Ok(_) => panic!("dial should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, TransportError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn accept_skips_connections_that_fail_identify() {
        let mut transport = bind("server").await;
        let addr = transport.local_addr();

        let mut garbage = TcpStream::connect(addr).await.unwrap();
        garbage.write_u32(10).await.unwrap();
        garbage.write_all(b"not json!!").await.unwrap();

        let dialer = TcpDialer::new(&PeerId::new("client"), [KAD]);
        dialer.add_address(PeerId::new("server"), addr);

        let server = PeerId::new("server");
        let (outbound, inbound) =
            tokio::join!(dialer.open_stream(&server), transport.accept());
        assert!(outbound.is_ok());
        let inbound = inbound.expect("second connection should be accepted");
        assert_eq!(inbound.remote_peer(), &PeerId::new("client"));
        drop(garbage);
    }

    #[tokio::test]
    async fn silent_client_does_not_hold_up_other_connections() {
        let mut transport = bind("server")
            .await
            .with_identify_timeout(Duration::from_secs(2));
        let addr = transport.local_addr();

        let silent = TcpStream::connect(addr).await.unwrap();

        let dialer = TcpDialer::new(&PeerId::new("client"), [KAD]);
        dialer.add_address(PeerId::new("server"), addr);

        let started = Instant::now();
        let server = PeerId::new("server");
        let (outbound, inbound) =
            tokio::join!(dialer.open_stream(&server), transport.accept());
        let elapsed = started.elapsed();

        assert!(outbound.is_ok());
        let inbound = inbound.expect("identified connection should be accepted");
        assert_eq!(inbound.remote_peer(), &PeerId::new("client"));
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
        drop(silent);
    }

    #[tokio::test]
    async fn reset_stream_rejects_io() {
        let mut transport = bind("server").await;
        let dialer = TcpDialer::new(&PeerId::new("client"), [KAD]);
        dialer.add_address(PeerId::new("server"), transport.local_addr());

        let server = PeerId::new("server");
        let (outbound, inbound) = tokio::join!(dialer.open_stream(&server), transport.accept());
        let mut outbound = outbound.unwrap();
        let mut inbound = inbound.unwrap();

        outbound.reset();
        let err = outbound.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);

        let mut buf = Vec::new();
        let read = inbound.read_to_end(&mut buf).await;
        assert!(read.map(|n| n == 0).unwrap_or(true));
    }
}
