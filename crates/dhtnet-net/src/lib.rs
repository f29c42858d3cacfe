//! Request/reply messaging between DHT peers.
//!
//! This is the layer the DHT logic talks to. Outbound, a
//! [`RequestCoordinator`] reuses pooled [`MessageSession`]s to send a
//! message and wait for its reply, with caller cancellation that does not
//! waste the stream. Inbound, an [`InboundDispatcher`] reads requests off
//! each accepted stream and routes them to registered [`Handler`]s by
//! message type. [`Node`] wires both halves together.

pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod node;
pub mod peerstore;
pub mod pool;
pub mod session;

pub use config::{
    NodeConfig, PoolConfig, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_IDLE_PER_PEER, DEFAULT_PROTOCOL,
    DEFAULT_READ_TIMEOUT,
};
pub use coordinator::RequestCoordinator;
pub use dispatcher::{InboundDispatcher, StreamOutcome};
pub use error::{ErrorKind, NetError, Result};
pub use handler::{handler_fn, Handler, HandlerError, HandlerFn, HandlerRegistry};
pub use metrics::{MessageMetrics, MessageStats, NoopMetrics, TypeStats};
pub use node::{Node, NodeBuilder};
pub use peerstore::{
    MemoryPeerStore, PeerBook, PeerStore, PeerStoreError, RoutingTable, SeenPeers,
    LATENCY_SMOOTHING,
};
pub use pool::StreamPool;
pub use session::{MessageSession, PendingReply, SessionState};
