use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dhtnet_transport::PeerId;
use tracing::{debug, trace};

use crate::config::PoolConfig;
use crate::session::{MessageSession, SessionState};

struct IdleSession {
    session: MessageSession,
    since: Instant,
}

/// Per-peer cache of idle, healthy sessions.
///
/// Sessions are moved in and out: a checked-out session belongs to the
/// caller until it is released or discarded. Sessions pushed out of the
/// pool are reset once the per-peer lock is dropped.
pub struct StreamPool {
    idle: DashMap<PeerId, VecDeque<IdleSession>>,
    config: PoolConfig,
    closed: AtomicBool,
}

impl StreamPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            idle: DashMap::new(),
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Take the most recently idled session for `peer`.
    ///
    /// Unhealthy or expired sessions found on the way are reset. `None`
    /// means the caller must open a new stream.
    pub fn acquire(&self, peer: &PeerId) -> Option<MessageSession> {
        let mut stale = Vec::new();
        let found = {
            let mut queue = self.idle.get_mut(peer)?;
            let mut found = None;
            while let Some(idle) = queue.pop_back() {
                if !idle.session.is_healthy() {
                    stale.push((idle.session, "unhealthy"));
                } else if self.is_expired(idle.since) {
                    stale.push((idle.session, "expired"));
                } else {
                    found = Some(idle.session);
                    break;
                }
            }
            found
        };
        self.idle.remove_if(peer, |_, queue| queue.is_empty());

        for (session, reason) in stale {
            trace!(session = session.id(), %peer, reason, "dropping idle session");
            session.reset();
        }
        if let Some(session) = &found {
            trace!(session = session.id(), %peer, "reusing idle session");
        }
        found
    }

    /// Return a session after a successful exchange.
    ///
    /// Only healthy, idle sessions are kept. Past the per-peer capacity the
    /// oldest idle session is evicted.
    pub fn release(&self, session: MessageSession) {
        if self.is_closed() {
            trace!(session = session.id(), "pool closed; resetting released session");
            session.reset();
            return;
        }
        let state = session.state();
        if state != SessionState::Idle || !session.is_healthy() {
            debug!(session = session.id(), peer = %session.peer(), %state, "not pooling session");
            session.reset();
            return;
        }
        if self.config.max_idle_per_peer == 0 {
            session.reset();
            return;
        }

        let peer = session.peer().clone();
        let evicted = {
            let mut queue = self.idle.entry(peer.clone()).or_default();
            queue.push_back(IdleSession {
                session,
                since: Instant::now(),
            });
            let excess = queue.len().saturating_sub(self.config.max_idle_per_peer);
            let evicted: Vec<IdleSession> = queue.drain(..excess).collect();
            evicted
        };
        for idle in evicted {
            trace!(session = idle.session.id(), %peer, "evicting idle session");
            idle.session.reset();
        }

        // Lost a race with close(): make sure nothing stays pooled.
        if self.is_closed() {
            self.drain();
        }
    }

    /// Reset a session and never pool it again.
    pub fn discard(&self, session: MessageSession) {
        trace!(session = session.id(), peer = %session.peer(), "discarding session");
        session.reset();
    }

    pub fn idle_count(&self, peer: &PeerId) -> usize {
        self.idle.get(peer).map_or(0, |queue| queue.len())
    }

    pub fn total_idle(&self) -> usize {
        self.idle.iter().map(|entry| entry.value().len()).sum()
    }

    /// Reset every idle session and refuse further releases.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(idle = self.total_idle(), "closing stream pool");
        }
        self.drain();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn drain(&self) {
        let peers: Vec<PeerId> = self.idle.iter().map(|entry| entry.key().clone()).collect();
        for peer in peers {
            if let Some((_, queue)) = self.idle.remove(&peer) {
                for idle in queue {
                    idle.session.reset();
                }
            }
        }
    }

    fn is_expired(&self, since: Instant) -> bool {
        self.config
            .idle_timeout
            .is_some_and(|timeout| since.elapsed() >= timeout)
    }
}

impl Default for StreamPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
