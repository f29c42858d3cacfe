use std::sync::Arc;
use std::time::Instant;

use dhtnet_frame::{FrameConfig, Message};
use dhtnet_transport::{Dialer, PeerId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{NetError, Result};
use crate::metrics::MessageMetrics;
use crate::peerstore::PeerBook;
use crate::pool::StreamPool;
use crate::session::{MessageSession, PendingReply};

/// Client side of the messaging layer: pooled sessions, request/reply
/// correlation, and cancellation.
#[derive(Clone)]
pub struct RequestCoordinator {
    pool: Arc<StreamPool>,
    dialer: Arc<dyn Dialer>,
    book: PeerBook,
    metrics: Arc<dyn MessageMetrics>,
    frame_config: FrameConfig,
}

impl RequestCoordinator {
    pub fn new(
        pool: Arc<StreamPool>,
        dialer: Arc<dyn Dialer>,
        book: PeerBook,
        metrics: Arc<dyn MessageMetrics>,
        frame_config: FrameConfig,
    ) -> Self {
        Self {
            pool,
            dialer,
            book,
            metrics,
            frame_config,
        }
    }

    /// Send `request` to `peer` and wait for its reply.
    ///
    /// If `ctx` fires first the call returns [`NetError::Cancelled`] at once.
    /// The session is not torn down: a background task keeps waiting for
    /// the reply and returns the session to the pool if it arrives. The same
    /// happens when the returned future is dropped mid-request.
    pub async fn send_request(
        &self,
        ctx: &CancellationToken,
        peer: &PeerId,
        request: &Message,
    ) -> Result<Message> {
        if ctx.is_cancelled() {
            return Err(NetError::Cancelled);
        }
        let started = Instant::now();
        self.metrics.message_sent(request.msg_type(), request.size());

        let session = self.session_for(ctx, peer).await?;
        self.metrics.write_latency(request.msg_type(), started.elapsed());

        let sent = Instant::now();
        let pending = match session.request(request).await {
            Ok(pending) => pending,
            Err(err) => {
                self.pool.discard(session);
                return Err(err);
            }
        };

        let mut in_flight = InFlight {
            coordinator: self,
            parts: Some((session, pending)),
            sent,
        };
        tokio::select! {
            biased;
            reply = in_flight.reply() => reply,
            _ = ctx.cancelled() => Err(NetError::Cancelled),
        }
    }

    /// Send `msg` to `peer` without waiting for a reply.
    pub async fn send_message(
        &self,
        ctx: &CancellationToken,
        peer: &PeerId,
        msg: &Message,
    ) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(NetError::Cancelled);
        }
        let started = Instant::now();
        self.metrics.message_sent(msg.msg_type(), msg.size());

        let session = self.session_for(ctx, peer).await?;
        self.metrics.write_latency(msg.msg_type(), started.elapsed());

        match session.send(msg).await {
            Ok(()) => {
                self.pool.release(session);
                Ok(())
            }
            Err(err) => {
                self.pool.discard(session);
                Err(err)
            }
        }
    }

    pub fn pool(&self) -> &Arc<StreamPool> {
        &self.pool
    }

    async fn session_for(&self, ctx: &CancellationToken, peer: &PeerId) -> Result<MessageSession> {
        if let Some(session) = self.pool.acquire(peer) {
            return Ok(session);
        }

        let stream = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(NetError::Cancelled),
            stream = self.dialer.open_stream(peer) => stream?,
        };
        self.book.observe_protocols(peer, stream.remote_protocols());

        let session = MessageSession::new(stream, &self.frame_config);
        trace!(session = session.id(), %peer, "opened new session");
        Ok(session)
    }

    fn complete(&self, session: MessageSession, sent: Instant) {
        let peer = session.peer().clone();
        self.pool.release(session);
        self.book.update_from_message(&peer);
        self.book.record_latency(&peer, sent.elapsed());
    }

    /// Keep reading a reply nobody waits for any more, so the session can
    /// still be pooled. Bounded by the session read timeout.
    fn drain_orphan(&self, session: MessageSession, pending: PendingReply, sent: Instant) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.pool.discard(session);
            return;
        };
        debug!(session = session.id(), peer = %session.peer(), "request abandoned; draining reply");
        let this = self.clone();
        runtime.spawn(async move {
            match pending.await {
                Some(_late) => {
                    trace!(session = session.id(), "late reply drained");
                    this.complete(session, sent);
                }
                None => {
                    trace!(session = session.id(), "drained session failed");
                    this.pool.discard(session);
                }
            }
        });
    }
}

/// A request written to a session whose reply has not been consumed.
///
/// Dropped before [`InFlight::reply`] resolves, it hands the session to
/// [`RequestCoordinator::drain_orphan`].
struct InFlight<'a> {
    coordinator: &'a RequestCoordinator,
    parts: Option<(MessageSession, PendingReply)>,
    sent: Instant,
}

impl InFlight<'_> {
    async fn reply(&mut self) -> Result<Message> {
        let reply = match &mut self.parts {
            Some((_, pending)) => pending.await,
            None => None,
        };
        let Some((session, _)) = self.parts.take() else {
            return Err(NetError::StreamClosed);
        };

        match reply {
            Some(reply) => {
                self.coordinator.complete(session, self.sent);
                Ok(reply)
            }
            None => {
                let err = session.err().unwrap_or(NetError::StreamClosed);
                self.coordinator.pool.discard(session);
                Err(err)
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some((session, pending)) = self.parts.take() {
            self.coordinator.drain_orphan(session, pending, self.sent);
        }
    }
}
