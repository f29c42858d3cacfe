use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::codec::{decode_message, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::Message;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete messages from any `AsyncRead` stream.
///
/// Handles partial reads internally; callers always get complete messages.
/// Cancelling a pending [`read_message`](Self::read_message) loses no data:
/// bytes already received stay buffered for the next call.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete message.
    ///
    /// Returns `Ok(None)` when the stream ends on a message boundary and
    /// `Err(FrameError::ConnectionClosed)` when it ends mid-message. With a
    /// read timeout configured, waiting longer than that for one message is
    /// `Err(FrameError::Timeout)`.
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        match self.config.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.read_next())
                .await
                .map_err(|_| FrameError::Timeout(limit))?,
            None => self.read_next().await,
        }
    }

    async fn read_next(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(msg) = decode_message(&mut self.buf, self.config.max_message_size)? {
                trace!(msg_type = %msg.msg_type(), size = msg.size(), "read message");
                return Ok(Some(msg));
            }

            self.buf.reserve(READ_CHUNK_SIZE);
            let read = self.inner.read_buf(&mut self.buf).await?;
            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::ConnectionClosed);
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    ///
    /// Bytes buffered but not yet decoded are discarded.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Bytes received but not yet returned as a message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Update the per-message read timeout for subsequent reads.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.config.read_timeout = timeout;
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
