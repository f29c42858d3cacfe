use std::sync::Arc;
use std::time::Instant;

use dhtnet_frame::{FrameConfig, FrameReader, FrameWriter};
use dhtnet_transport::{BoxStream, PeerId};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{NetError, Result};
use crate::handler::HandlerRegistry;
use crate::metrics::MessageMetrics;
use crate::peerstore::PeerBook;

/// How an inbound stream ended.
#[derive(Debug)]
pub enum StreamOutcome {
    /// The remote closed the stream between requests; it was half-closed in
    /// return.
    Completed,
    /// The loop ended on an error; the stream was reset.
    Aborted(NetError),
}

impl StreamOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Server side of the messaging layer: serves requests arriving on inbound
/// streams.
#[derive(Clone)]
pub struct InboundDispatcher {
    handlers: Arc<HandlerRegistry>,
    book: PeerBook,
    metrics: Arc<dyn MessageMetrics>,
    frame_config: FrameConfig,
    shutdown: CancellationToken,
}

impl InboundDispatcher {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        book: PeerBook,
        metrics: Arc<dyn MessageMetrics>,
        frame_config: FrameConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            handlers,
            book,
            metrics,
            frame_config,
            shutdown,
        }
    }

    /// Serve one inbound stream until it ends, then close or reset it.
    pub async fn handle_stream(&self, stream: BoxStream) -> StreamOutcome {
        let peer = stream.remote_peer().clone();
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::with_config(read_half, self.frame_config.clone());
        let mut writer = FrameWriter::with_config(write_half, self.frame_config.clone());

        let result = self.dispatch(&peer, &mut reader, &mut writer).await;
        let mut stream = reader.into_inner().unsplit(writer.into_inner());

        match result {
            Ok(()) => {
                if let Err(err) = stream.shutdown().await {
                    debug!(%peer, error = %err, "failed to close inbound stream");
                }
                trace!(%peer, "inbound stream completed");
                StreamOutcome::Completed
            }
            Err(err) => {
                if err.is_stream_reset() {
                    debug!(%peer, "inbound stream reset by remote");
                } else {
                    debug!(%peer, error = %err, "inbound stream aborted");
                }
                stream.reset();
                StreamOutcome::Aborted(err)
            }
        }
    }

    /// Read, handle and answer requests until the remote closes the stream
    /// (`Ok`) or something fails (`Err`).
    pub async fn dispatch<R, W>(
        &self,
        peer: &PeerId,
        reader: &mut FrameReader<R>,
        writer: &mut FrameWriter<W>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let request = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(NetError::Cancelled),
                read = reader.read_message() => match read? {
                    Some(request) => request,
                    None => return Ok(()),
                },
            };
            let started = Instant::now();
            let msg_type = request.msg_type();
            self.metrics.message_received(msg_type, request.size());

            let Some(handler) = self.handlers.handler_for(msg_type) else {
                warn!(%peer, %msg_type, "no handler for message type");
                return Err(NetError::UnknownMessageType(msg_type));
            };

            let response = handler.handle(&self.shutdown, peer, &request).await?;
            self.book.update_from_message(peer);

            let Some(response) = response else {
                continue;
            };
            writer.send(&response).await?;
            self.metrics.inbound_handling_time(msg_type, started.elapsed());
        }
    }
}
