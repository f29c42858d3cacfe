use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dhtnet_frame::{Message, MessageType};
use dhtnet_transport::PeerId;
use tokio_util::sync::CancellationToken;

/// Errors a [`Handler`] reports for an inbound request.
///
/// Either one ends the inbound stream; no response is sent.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Failed(String),
}

/// Processes one inbound request.
///
/// `Ok(None)` means the request takes no response.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(
        &self,
        ctx: &CancellationToken,
        peer: &PeerId,
        request: &Message,
    ) -> Result<Option<Message>, HandlerError>;
}

/// [`Handler`] backed by an async closure; see [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

/// Adapt an async closure taking the sender and the request into a
/// [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(PeerId, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Message>, HandlerError>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(PeerId, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Message>, HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        _ctx: &CancellationToken,
        peer: &PeerId,
        request: &Message,
    ) -> Result<Option<Message>, HandlerError> {
        (self.f)(peer.clone(), request.clone()).await
    }
}

/// Handlers keyed by message type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageType, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `msg_type`, returning any handler it replaces.
    pub fn register(
        &mut self,
        msg_type: MessageType,
        handler: impl Handler,
    ) -> Option<Arc<dyn Handler>> {
        self.register_arc(msg_type, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        msg_type: MessageType,
        handler: Arc<dyn Handler>,
    ) -> Option<Arc<dyn Handler>> {
        self.handlers.insert(msg_type, handler)
    }

    pub fn handler_for(&self, msg_type: MessageType) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&msg_type).cloned()
    }

    pub fn has_handler(&self, msg_type: MessageType) -> bool {
        self.handlers.contains_key(&msg_type)
    }

    /// Registered message types, ordered by tag.
    pub fn message_types(&self) -> Vec<MessageType> {
        let mut types: Vec<MessageType> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
