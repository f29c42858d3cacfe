use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};
use crate::message::{Message, MessageType};

/// Default maximum message size: 4 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Longest valid encoding of a `u64` as an unsigned varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Number of bytes `value` occupies as an unsigned varint.
pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Append `value` as an unsigned LEB128 varint.
pub fn put_uvarint(dst: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        dst.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Parse an unsigned varint from the start of `src`.
///
/// Returns the value and the number of bytes it occupied, or `Ok(None)` if
/// `src` ends before the varint does.
pub fn read_uvarint(src: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value = 0u64;
    for (i, &byte) in src.iter().enumerate().take(MAX_VARINT_LEN) {
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(FrameError::Malformed("varint overflows u64".to_string()));
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}

/// Encode a message into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬──────────────────┬───────────────────┐
/// │ uvarint body_len │ uvarint type tag │ payload           │
/// │ (1-10 bytes)     │ (1-3 bytes)      │                   │
/// └──────────────────┴──────────────────┴───────────────────┘
///                    └──────────── body_len ────────────────┘
/// ```
pub fn encode_message(msg: &Message, dst: &mut BytesMut) {
    let size = msg.size();
    dst.reserve(varint_len(size as u64) + size);
    put_uvarint(dst, size as u64);
    put_uvarint(dst, u64::from(msg.msg_type().as_u16()));
    dst.put_slice(msg.payload());
}

/// Decode a message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete message yet.
/// The size limit is enforced as soon as the length prefix is readable.
/// On success, consumes the message bytes from the buffer.
pub fn decode_message(src: &mut BytesMut, max_message_size: usize) -> Result<Option<Message>> {
    let Some((body_len, prefix_len)) = read_uvarint(&src[..])? else {
        return Ok(None); // Need more data
    };

    if body_len > max_message_size as u64 {
        return Err(FrameError::MessageTooLarge {
            size: usize::try_from(body_len).unwrap_or(usize::MAX),
            max: max_message_size,
        });
    }
    let body_len = body_len as usize;
    if body_len == 0 {
        return Err(FrameError::Malformed("empty message body".to_string()));
    }

    let total = prefix_len + body_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None); // Need more data
    }

    src.advance(prefix_len);
    let mut body = src.split_to(body_len);

    let Some((tag, tag_len)) = read_uvarint(&body)? else {
        return Err(FrameError::Malformed("truncated type tag".to_string()));
    };
    let tag = u16::try_from(tag)
        .map_err(|_| FrameError::Malformed(format!("type tag {tag} out of range")))?;
    body.advance(tag_len);

    Ok(Some(Message::new(MessageType(tag), body.freeze())))
}

pub(crate) fn check_size(msg: &Message, max_message_size: usize) -> Result<()> {
    let size = msg.size();
    if size > max_message_size {
        return Err(FrameError::MessageTooLarge {
            size,
            max: max_message_size,
        });
    }
    Ok(())
}

/// Configuration for message framing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum message body size in bytes. Default: 4 MiB.
    pub max_message_size: usize,
    /// Limit on waiting for one complete message.
    pub read_timeout: Option<Duration>,
    /// Limit on one flush.
    pub write_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// `tokio_util` codec for use with `Framed`, `FramedRead` and `FramedWrite`.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_message_size: usize,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        decode_message(src, self.max_message_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        match self.decode(src)? {
            Some(msg) => Ok(Some(msg)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<()> {
        check_size(&msg, self.max_message_size)?;
        encode_message(&msg, dst);
        Ok(())
    }
}
