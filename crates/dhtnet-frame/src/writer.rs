use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::codec::{check_size, encode_message, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::Message;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete messages to any `AsyncWrite` stream.
///
/// [`write_message`](Self::write_message) only buffers; nothing reaches the
/// stream until [`flush`](Self::flush). Several small messages written
/// back to back go out in one flush.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode a message into the write buffer.
    pub fn write_message(&mut self, msg: &Message) -> Result<()> {
        check_size(msg, self.config.max_message_size)?;
        encode_message(msg, &mut self.buf);
        Ok(())
    }

    /// Write every buffered byte to the stream and flush it.
    pub async fn flush(&mut self) -> Result<()> {
        match self.config.write_timeout {
            Some(limit) => tokio::time::timeout(limit, self.flush_buffer())
                .await
                .map_err(|_| FrameError::Timeout(limit))?,
            None => self.flush_buffer().await,
        }
    }

    async fn flush_buffer(&mut self) -> Result<()> {
        trace!(bytes = self.buf.len(), "flushing frames");
        while !self.buf.is_empty() {
            let written = self.inner.write_buf(&mut self.buf).await?;
            if written == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Encode a message and flush it to the stream.
    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        self.write_message(msg)?;
        self.flush().await
    }

    /// Bytes encoded but not yet written to the stream.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    ///
    /// Unflushed bytes are discarded.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::message::MessageType;
    use crate::reader::FrameReader;

    #[tokio::test]
    async fn nothing_reaches_the_wire_before_flush() {
        let (tx, mut rx) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(tx);

        writer
            .write_message(&Message::new(MessageType::PING, "a"))
            .unwrap();
        writer
            .write_message(&Message::new(MessageType::PING, "b"))
            .unwrap();
        assert_eq!(writer.buffered(), 6);

        let mut peek = [0u8; 1];
        let early = tokio::time::timeout(Duration::from_millis(20), rx.read(&mut peek)).await;
        assert!(early.is_err(), "bytes arrived before flush");

        writer.flush().await.unwrap();
        assert_eq!(writer.buffered(), 0);

        let mut wire = [0u8; 6];
        rx.read_exact(&mut wire).await.unwrap();
        assert_eq!(wire, [2, 5, b'a', 2, 5, b'b']);
    }

    #[tokio::test]
    async fn batched_messages_arrive_in_order() {
        let (tx, rx) = tokio::io::duplex(64 * 1024);
        let mut writer = FrameWriter::new(tx);
        let mut reader = FrameReader::new(rx);

        for i in 0..32u16 {
            let payload = format!("msg-{i}");
            writer
                .write_message(&Message::new(MessageType(i % 6), payload))
                .unwrap();
        }
        writer.flush().await.unwrap();

        for i in 0..32u16 {
            let msg = reader.read_message().await.unwrap().unwrap();
            assert_eq!(msg.msg_type(), MessageType(i % 6));
            assert_eq!(msg.payload().as_ref(), format!("msg-{i}").as_bytes());
        }
    }

    #[tokio::test]
    async fn send_roundtrip_over_pipe() {
        let (client, server) = tokio::io::duplex(1024);
        let (client_rx, client_tx) = tokio::io::split(client);
        let (server_rx, server_tx) = tokio::io::split(server);

        let mut client_writer = FrameWriter::new(client_tx);
        let mut client_reader = FrameReader::new(client_rx);
        let mut server_writer = FrameWriter::new(server_tx);
        let mut server_reader = FrameReader::new(server_rx);

        client_writer
            .send(&Message::new(MessageType::FIND_NODE, "target"))
            .await
            .unwrap();
        let request = server_reader.read_message().await.unwrap().unwrap();
        assert_eq!(request.msg_type(), MessageType::FIND_NODE);

        server_writer
            .send(&Message::new(MessageType::FIND_NODE, "closer-peers"))
            .await
            .unwrap();
        let reply = client_reader.read_message().await.unwrap().unwrap();
        assert_eq!(reply.payload().as_ref(), b"closer-peers");
    }

    #[tokio::test]
    async fn oversized_message_is_rejected_before_buffering() {
        let (tx, _rx) = tokio::io::duplex(64);
        let cfg = FrameConfig {
            max_message_size: 8,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(tx, cfg);

        let err = writer
            .write_message(&Message::new(MessageType::PUT_VALUE, vec![0u8; 16]))
            .unwrap_err();
        assert!(matches!(err, FrameError::MessageTooLarge { size: 17, max: 8 }));
        assert_eq!(writer.buffered(), 0);
    }

    #[tokio::test]
    async fn write_timeout_expires_when_peer_stops_reading() {
        let (tx, _rx) = tokio::io::duplex(16);
        let cfg = FrameConfig {
            write_timeout: Some(Duration::from_millis(50)),
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(tx, cfg);

        let err = writer
            .send(&Message::new(MessageType::PUT_VALUE, vec![1u8; 1024]))
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Timeout(_)));
    }

    #[tokio::test]
    async fn write_after_peer_dropped_fails() {
        let (tx, rx) = tokio::io::duplex(64);
        drop(rx);
        let mut writer = FrameWriter::new(tx);

        let err = writer
            .send(&Message::new(MessageType::PING, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[tokio::test]
    async fn accessors_and_into_inner() {
        let (tx, _rx) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(tx);

        assert_eq!(writer.config().max_message_size, crate::DEFAULT_MAX_MESSAGE_SIZE);
        let _ = writer.get_ref();
        let _ = writer.get_mut();
        let _inner = writer.into_inner();
    }
}
