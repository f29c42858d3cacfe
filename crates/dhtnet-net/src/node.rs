use std::sync::Arc;

use dhtnet_frame::{FrameConfig, Message, MessageType};
use dhtnet_transport::{Dialer, Listener, PeerId, TransportError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::coordinator::RequestCoordinator;
use crate::dispatcher::InboundDispatcher;
use crate::error::Result;
use crate::handler::{Handler, HandlerRegistry};
use crate::metrics::{MessageMetrics, NoopMetrics};
use crate::peerstore::{MemoryPeerStore, PeerBook, PeerStore, RoutingTable, SeenPeers};
use crate::pool::StreamPool;

/// Builder for [`Node`].
pub struct NodeBuilder {
    local: PeerId,
    dialer: Arc<dyn Dialer>,
    config: NodeConfig,
    peer_store: Option<Arc<dyn PeerStore>>,
    routing: Option<Arc<dyn RoutingTable>>,
    metrics: Option<Arc<dyn MessageMetrics>>,
    handlers: HandlerRegistry,
}

impl NodeBuilder {
    pub fn new(local: PeerId, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            local,
            dialer,
            config: NodeConfig::default(),
            peer_store: None,
            routing: None,
            metrics: None,
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to a [`MemoryPeerStore`].
    pub fn with_peer_store(mut self, peer_store: Arc<dyn PeerStore>) -> Self {
        self.peer_store = Some(peer_store);
        self
    }

    /// Defaults to a [`SeenPeers`] table.
    pub fn with_routing_table(mut self, routing: Arc<dyn RoutingTable>) -> Self {
        self.routing = Some(routing);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MessageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Serve inbound `msg_type` requests with `handler`. A later
    /// registration for the same type wins.
    pub fn with_handler(mut self, msg_type: MessageType, handler: impl Handler) -> Self {
        if self.handlers.register(msg_type, handler).is_some() {
            debug!(%msg_type, "replacing handler");
        }
        self
    }

    pub fn build(self) -> Node {
        let peer_store = self
            .peer_store
            .unwrap_or_else(|| Arc::new(MemoryPeerStore::new()));
        let routing = self.routing.unwrap_or_else(|| Arc::new(SeenPeers::new()));
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics));
        let book = PeerBook::new(peer_store, routing, self.config.protocols.clone());

        let frame_config = self.config.session_frame_config();
        let pool = Arc::new(StreamPool::new(self.config.pool.clone()));
        let shutdown = CancellationToken::new();

        let coordinator = RequestCoordinator::new(
            pool.clone(),
            self.dialer,
            book.clone(),
            metrics.clone(),
            frame_config.clone(),
        );
        let dispatcher = InboundDispatcher::new(
            Arc::new(self.handlers),
            book.clone(),
            metrics,
            frame_config,
            shutdown.clone(),
        );

        Node {
            local: self.local,
            config: self.config,
            pool,
            coordinator,
            dispatcher,
            book,
            shutdown,
        }
    }
}

/// A DHT messaging endpoint: sends requests to peers and serves theirs.
pub struct Node {
    local: PeerId,
    config: NodeConfig,
    pool: Arc<StreamPool>,
    coordinator: RequestCoordinator,
    dispatcher: InboundDispatcher,
    book: PeerBook,
    shutdown: CancellationToken,
}

impl Node {
    pub fn builder(local: PeerId, dialer: Arc<dyn Dialer>) -> NodeBuilder {
        NodeBuilder::new(local, dialer)
    }

    /// Accept inbound streams from `listener` until the node closes or the
    /// listener shuts down. Each stream is served on its own task.
    pub fn serve<L: Listener>(&self, mut listener: L) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let book = self.book.clone();
        let shutdown = self.shutdown.clone();
        let local = self.local.clone();

        tokio::spawn(async move {
            info!(peer = %local, "serving inbound streams");
            loop {
                let stream = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(stream) => stream,
                        Err(TransportError::Shutdown) => break,
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            continue;
                        }
                    },
                };
                book.observe_protocols(stream.remote_peer(), stream.remote_protocols());

                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher.handle_stream(stream).await;
                });
            }
            info!(peer = %local, "stopped serving inbound streams");
        })
    }

    /// See [`RequestCoordinator::send_request`].
    pub async fn send_request(
        &self,
        ctx: &CancellationToken,
        peer: &PeerId,
        request: &Message,
    ) -> Result<Message> {
        self.coordinator.send_request(ctx, peer, request).await
    }

    /// See [`RequestCoordinator::send_message`].
    pub async fn send_message(
        &self,
        ctx: &CancellationToken,
        peer: &PeerId,
        msg: &Message,
    ) -> Result<()> {
        self.coordinator.send_message(ctx, peer, msg).await
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn frame_config(&self) -> FrameConfig {
        self.config.session_frame_config()
    }

    pub fn pool(&self) -> &Arc<StreamPool> {
        &self.pool
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    pub fn dispatcher(&self) -> &InboundDispatcher {
        &self.dispatcher
    }

    pub fn peer_book(&self) -> &PeerBook {
        &self.book
    }

    /// Stop serving, abort in-flight inbound handling, and reset pooled
    /// sessions. Outbound requests already in flight run to completion but
    /// their sessions are not pooled again.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            debug!(peer = %self.local, "closing node");
        }
        self.shutdown.cancel();
        self.pool.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.close();
    }
}
