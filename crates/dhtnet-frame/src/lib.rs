//! Length-delimited message framing for dhtnet.
//!
//! Every message on a stream is framed as:
//! - an unsigned varint body length
//! - an unsigned varint message type tag
//! - the opaque payload
//!
//! [`FrameWriter`] batches encoded messages until an explicit flush;
//! [`FrameReader`] yields whole messages and enforces the size limit from the
//! length prefix alone. [`MessageCodec`] exposes the same format to
//! `tokio_util::codec::Framed`.

pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_message, encode_message, varint_len, FrameConfig, MessageCodec,
    DEFAULT_MAX_MESSAGE_SIZE, MAX_VARINT_LEN,
};
pub use error::{FrameError, Result};
pub use message::{Message, MessageType, ParseMessageTypeError};
pub use reader::FrameReader;
pub use writer::FrameWriter;
