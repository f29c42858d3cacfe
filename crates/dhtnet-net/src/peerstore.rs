use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dhtnet_transport::PeerId;
use tracing::{debug, trace};

/// Weight of a new sample in the latency moving average.
pub const LATENCY_SMOOTHING: f64 = 0.1;

/// Errors reported by a [`PeerStore`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum PeerStoreError {
    #[error("peer {0} not found")]
    NotFound(PeerId),

    #[error("peer store unavailable: {0}")]
    Unavailable(String),
}

/// Peer metadata consulted and updated by the messaging layer.
pub trait PeerStore: Send + Sync + 'static {
    /// The subset of `protocols` that `peer` is known to support.
    fn supports_protocols(
        &self,
        peer: &PeerId,
        protocols: &[String],
    ) -> Result<Vec<String>, PeerStoreError>;

    /// Record a round-trip time observed for `peer`.
    fn record_latency(&self, peer: &PeerId, rtt: Duration);

    /// Record protocols `peer` advertised when a stream to it opened.
    fn add_protocols(&self, _peer: &PeerId, _protocols: &[String]) {}
}

/// Routing table hook.
pub trait RoutingTable: Send + Sync + 'static {
    /// Mark `peer` as a live DHT server.
    fn update(&self, peer: &PeerId);
}

#[derive(Debug, Default)]
struct PeerRecord {
    protocols: BTreeSet<String>,
    latency: Option<Duration>,
}

/// In-memory [`PeerStore`] with an exponentially weighted latency average.
#[derive(Debug, Default)]
pub struct MemoryPeerStore {
    peers: DashMap<PeerId, PeerRecord>,
}

impl MemoryPeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smoothed round-trip time, if any was recorded.
    pub fn latency(&self, peer: &PeerId) -> Option<Duration> {
        self.peers.get(peer).and_then(|record| record.latency)
    }

    /// Known protocols of `peer`, sorted.
    pub fn protocols(&self, peer: &PeerId) -> Vec<String> {
        self.peers
            .get(peer)
            .map(|record| record.protocols.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl PeerStore for MemoryPeerStore {
    fn supports_protocols(
        &self,
        peer: &PeerId,
        protocols: &[String],
    ) -> Result<Vec<String>, PeerStoreError> {
        let Some(record) = self.peers.get(peer) else {
            return Ok(Vec::new());
        };
        Ok(protocols
            .iter()
            .filter(|p| record.protocols.contains(p.as_str()))
            .cloned()
            .collect())
    }

    fn record_latency(&self, peer: &PeerId, rtt: Duration) {
        let mut record = self.peers.entry(peer.clone()).or_default();
        record.latency = Some(match record.latency {
            Some(prev) => prev.mul_f64(1.0 - LATENCY_SMOOTHING) + rtt.mul_f64(LATENCY_SMOOTHING),
            None => rtt,
        });
    }

    fn add_protocols(&self, peer: &PeerId, protocols: &[String]) {
        let mut record = self.peers.entry(peer.clone()).or_default();
        record.protocols.extend(protocols.iter().cloned());
    }
}

/// [`RoutingTable`] that only remembers which peers were seen, and how often.
#[derive(Debug, Default)]
pub struct SeenPeers {
    seen: DashMap<PeerId, u64>,
}

impl SeenPeers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.seen.contains_key(peer)
    }

    /// How many times `peer` was reported live.
    pub fn update_count(&self, peer: &PeerId) -> u64 {
        self.seen.get(peer).map_or(0, |count| *count)
    }

    /// Every peer seen, sorted.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.seen.iter().map(|e| e.key().clone()).collect();
        peers.sort();
        peers
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl RoutingTable for SeenPeers {
    fn update(&self, peer: &PeerId) {
        *self.seen.entry(peer.clone()).or_insert(0) += 1;
    }
}

/// Peer bookkeeping performed around every exchange.
#[derive(Clone)]
pub struct PeerBook {
    peer_store: Arc<dyn PeerStore>,
    routing: Arc<dyn RoutingTable>,
    protocols: Arc<[String]>,
}

impl PeerBook {
    pub fn new(
        peer_store: Arc<dyn PeerStore>,
        routing: Arc<dyn RoutingTable>,
        protocols: Vec<String>,
    ) -> Self {
        Self {
            peer_store,
            routing,
            protocols: protocols.into(),
        }
    }

    /// Refresh `peer` in the routing table after a message from it, provided
    /// it is known to speak one of our DHT protocols. Clients that merely
    /// query us never enter the routing table.
    pub fn update_from_message(&self, peer: &PeerId) {
        match self.peer_store.supports_protocols(peer, &self.protocols) {
            Ok(supported) if !supported.is_empty() => self.routing.update(peer),
            Ok(_) => trace!(%peer, "peer is not a DHT server; routing table untouched"),
            Err(err) => debug!(%peer, error = %err, "protocol lookup failed"),
        }
    }

    pub fn record_latency(&self, peer: &PeerId, rtt: Duration) {
        self.peer_store.record_latency(peer, rtt);
    }

    /// Record protocols a stream's remote end advertised.
    pub fn observe_protocols(&self, peer: &PeerId, protocols: &[String]) {
        if !protocols.is_empty() {
            self.peer_store.add_protocols(peer, protocols);
        }
    }

    pub fn peer_store(&self) -> &Arc<dyn PeerStore> {
        &self.peer_store
    }

    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }
}
