use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::codec::varint_len;

/// Type tag of a DHT message.
///
/// Tags 0-5 are the Kademlia message types. Any other value is carried
/// through unchanged; whether it is understood is up to the handler registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(pub u16);

impl MessageType {
    pub const PUT_VALUE: Self = Self(0);
    pub const GET_VALUE: Self = Self(1);
    pub const ADD_PROVIDER: Self = Self(2);
    pub const GET_PROVIDERS: Self = Self(3);
    pub const FIND_NODE: Self = Self(4);
    pub const PING: Self = Self(5);

    const KNOWN: [(Self, &'static str); 6] = [
        (Self::PUT_VALUE, "put-value"),
        (Self::GET_VALUE, "get-value"),
        (Self::ADD_PROVIDER, "add-provider"),
        (Self::GET_PROVIDERS, "get-providers"),
        (Self::FIND_NODE, "find-node"),
        (Self::PING, "ping"),
    ];

    /// Returns a human-readable name for a known type, `"unknown"` otherwise.
    pub fn label(self) -> &'static str {
        Self::KNOWN
            .iter()
            .find(|(ty, _)| *ty == self)
            .map_or("unknown", |(_, name)| name)
    }

    /// The raw tag value.
    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            "unknown" => write!(f, "type-{}", self.0),
            name => f.write_str(name),
        }
    }
}

impl From<u16> for MessageType {
    fn from(tag: u16) -> Self {
        Self(tag)
    }
}

/// Error returned when a message type name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown message type {0:?}")]
pub struct ParseMessageTypeError(String);

impl FromStr for MessageType {
    type Err = ParseMessageTypeError;

    /// Accepts a label (`find-node`), its upper-case form (`FIND_NODE`), or a
    /// numeric tag.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(tag) = s.parse::<u16>() {
            return Ok(Self(tag));
        }
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::KNOWN
            .iter()
            .find(|(_, name)| *name == normalized)
            .map(|(ty, _)| *ty)
            .ok_or_else(|| ParseMessageTypeError(s.to_string()))
    }
}

/// An opaque typed message envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    msg_type: MessageType,
    payload: Bytes,
}

impl Message {
    pub fn new(msg_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            payload: payload.into(),
        }
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Encoded body length (type tag + payload), as used for accounting and
    /// for the size limit.
    pub fn size(&self) -> usize {
        varint_len(u64::from(self.msg_type.0)) + self.payload.len()
    }

    /// Total bytes on the wire, including the length prefix.
    pub fn wire_size(&self) -> usize {
        let size = self.size();
        varint_len(size as u64) + size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_and_display() {
        assert_eq!(MessageType::PING.label(), "ping");
        assert_eq!(MessageType::FIND_NODE.to_string(), "find-node");
        assert_eq!(MessageType(42).label(), "unknown");
        assert_eq!(MessageType(42).to_string(), "type-42");
    }

    #[test]
    fn parse_names_and_numbers() {
        assert_eq!("ping".parse::<MessageType>().unwrap(), MessageType::PING);
        assert_eq!("PUT_VALUE".parse::<MessageType>().unwrap(), MessageType::PUT_VALUE);
        assert_eq!("get-providers".parse::<MessageType>().unwrap(), MessageType::GET_PROVIDERS);
        assert_eq!("300".parse::<MessageType>().unwrap(), MessageType(300));
        assert!("bogus".parse::<MessageType>().is_err());
    }

    #[test]
    fn size_counts_tag_and_payload() {
        let ping = Message::new(MessageType::PING, Bytes::from_static(b"abcd"));
        assert_eq!(ping.size(), 5);
        assert_eq!(ping.wire_size(), 6);

        // Tags above 127 need a second varint byte.
        let custom = Message::new(MessageType(300), vec![0u8; 200]);
        assert_eq!(custom.size(), 202);
        assert_eq!(custom.wire_size(), 204);
    }

    #[test]
    fn accessors() {
        let msg = Message::new(MessageType::GET_VALUE, "key");
        assert_eq!(msg.msg_type(), MessageType::GET_VALUE);
        assert_eq!(msg.payload().as_ref(), b"key");
        assert_eq!(msg.into_payload(), Bytes::from_static(b"key"));
    }
}
