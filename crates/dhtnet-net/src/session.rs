use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use dhtnet_frame::{FrameConfig, FrameReader, FrameWriter, Message};
use dhtnet_transport::{BoxStream, PeerId};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{NetError, Result};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a [`MessageSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    AwaitingReply,
    Destroyed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::AwaitingReply => "awaiting reply",
            Self::Destroyed => "destroyed",
        })
    }
}

struct SessionIo {
    reader: FrameReader<ReadHalf<BoxStream>>,
    writer: FrameWriter<WriteHalf<BoxStream>>,
}

impl SessionIo {
    fn reset(self) {
        let mut stream = self.reader.into_inner().unsplit(self.writer.into_inner());
        stream.reset();
    }
}

struct Status {
    state: SessionState,
    terminal: Option<NetError>,
}

struct Shared {
    id: u64,
    peer: PeerId,
    status: Mutex<Status>,
    io: tokio::sync::Mutex<Option<SessionIo>>,
    closed: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn state(&self) -> SessionState {
        lock(&self.status).state
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut status = lock(&self.status);
        if status.state != from {
            return false;
        }
        status.state = to;
        true
    }

    fn terminal_error(&self) -> NetError {
        lock(&self.status)
            .terminal
            .clone()
            .unwrap_or(NetError::StreamReset)
    }

    /// Move to `Destroyed`, reset the stream, and return the recorded
    /// terminal error. The first error recorded wins.
    ///
    /// If the stream is busy in a pending read or write, that operation
    /// observes `closed`, returns, and calls `destroy` again, which then
    /// performs the reset.
    fn destroy(&self, err: NetError) -> NetError {
        let (terminal, first) = {
            let mut status = lock(&self.status);
            let first = status.state != SessionState::Destroyed;
            status.state = SessionState::Destroyed;
            (status.terminal.get_or_insert(err).clone(), first)
        };

        self.closed.cancel();
        if let Ok(mut io) = self.io.try_lock() {
            if let Some(io) = io.take() {
                io.reset();
            }
        }

        if first {
            debug!(session = self.id, peer = %self.peer, error = %terminal, "session destroyed");
        }
        terminal
    }

    async fn write(&self, msg: &Message) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(self.terminal_error()),
            result = async {
                let mut io = self.io.lock().await;
                let io = io.as_mut().ok_or(NetError::StreamReset)?;
                io.writer.send(msg).await.map_err(NetError::from)
            } => result,
        }
    }

    async fn read_reply(self: Arc<Self>, tx: oneshot::Sender<Message>) {
        let result = tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(self.terminal_error()),
            result = async {
                let mut io = self.io.lock().await;
                let io = io.as_mut().ok_or(NetError::StreamReset)?;
                match io.reader.read_message().await {
                    Ok(Some(reply)) => Ok(reply),
                    Ok(None) => Err(NetError::StreamClosed),
                    Err(err) => Err(NetError::from(err)),
                }
            } => result,
        };

        match result {
            Ok(reply) => {
                trace!(session = self.id, msg_type = %reply.msg_type(), "reply received");
                self.transition(SessionState::AwaitingReply, SessionState::Idle);
                if tx.send(reply).is_err() {
                    trace!(session = self.id, "reply receiver dropped");
                }
            }
            Err(err) => {
                self.destroy(err);
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(io) = self.io.get_mut().take() {
            trace!(session = self.id, peer = %self.peer, "session dropped; resetting stream");
            io.reset();
        }
    }
}

/// One live stream to one peer, carrying at most one request at a time.
///
/// A session is owned by exactly one caller at a time: the pool while idle,
/// the requester while checked out. The handle is not `Clone`.
pub struct MessageSession {
    shared: Arc<Shared>,
}

impl MessageSession {
    /// Wrap a freshly opened stream.
    pub fn new(stream: BoxStream, config: &FrameConfig) -> Self {
        let peer = stream.remote_peer().clone();
        let (read_half, write_half) = tokio::io::split(stream);
        let io = SessionIo {
            reader: FrameReader::with_config(read_half, config.clone()),
            writer: FrameWriter::with_config(write_half, config.clone()),
        };

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        trace!(session = id, %peer, "session opened");
        Self {
            shared: Arc::new(Shared {
                id,
                peer,
                status: Mutex::new(Status {
                    state: SessionState::Idle,
                    terminal: None,
                }),
                io: tokio::sync::Mutex::new(Some(io)),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Process-unique session id, for logging.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn peer(&self) -> &PeerId {
        &self.shared.peer
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// True unless the session was destroyed.
    pub fn is_healthy(&self) -> bool {
        !self.shared.closed.is_cancelled() && self.state() != SessionState::Destroyed
    }

    /// The terminal error of a destroyed session.
    pub fn err(&self) -> Option<NetError> {
        lock(&self.shared.status).terminal.clone()
    }

    /// Write and flush `msg` without expecting a reply.
    pub async fn send(&self, msg: &Message) -> Result<()> {
        self.begin_send()?;
        if let Err(err) = self.shared.write(msg).await {
            return Err(self.shared.destroy(err));
        }
        if !self
            .shared
            .transition(SessionState::Sending, SessionState::Idle)
        {
            return Err(self.shared.terminal_error());
        }
        Ok(())
    }

    /// Write and flush `msg`, then read the reply in the background.
    ///
    /// Returns once the request is flushed. The returned [`PendingReply`]
    /// yields the reply, or `None` if the session was destroyed first; in
    /// that case [`err`](Self::err) says why.
    pub async fn request(&self, msg: &Message) -> Result<PendingReply> {
        self.begin_send()?;
        if let Err(err) = self.shared.write(msg).await {
            return Err(self.shared.destroy(err));
        }
        if !self
            .shared
            .transition(SessionState::Sending, SessionState::AwaitingReply)
        {
            return Err(self.shared.terminal_error());
        }

        let (tx, rx) = oneshot::channel();
        tokio::spawn(Arc::clone(&self.shared).read_reply(tx));
        Ok(PendingReply { rx })
    }

    /// Abort the stream. Idempotent; interrupts a pending reply read.
    pub fn reset(&self) {
        self.shared.destroy(NetError::StreamReset);
    }

    fn begin_send(&self) -> Result<()> {
        let mut status = lock(&self.shared.status);
        match status.state {
            SessionState::Idle => {
                status.state = SessionState::Sending;
                Ok(())
            }
            SessionState::Destroyed => Err(status.terminal.clone().unwrap_or(NetError::StreamReset)),
            busy => Err(NetError::SessionBusy(busy)),
        }
    }
}

impl fmt::Debug for MessageSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSession")
            .field("id", &self.shared.id)
            .field("peer", &self.shared.peer)
            .field("state", &self.state())
            .finish()
    }
}

/// The eventual reply to a [`MessageSession::request`].
///
/// Resolves to `None` if the session was destroyed before a reply arrived.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Message>,
}

impl Future for PendingReply {
    type Output = Option<Message>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|reply| reply.ok())
    }
}
