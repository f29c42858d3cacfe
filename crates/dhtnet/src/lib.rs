//! Request/reply messaging transport for DHT nodes.
//!
//! Peers exchange typed, length-delimited messages over pooled duplex
//! streams: a request goes out on an idle stream to the peer, its reply
//! comes back on the same stream, and the stream is kept for the next
//! request.
//!
//! # Crate Structure
//!
//! - [`transport`]: duplex stream abstraction with in-memory and TCP transports
//! - [`frame`]: varint length-delimited message framing
//! - [`net`]: stream pool, sessions, request coordination, inbound dispatch

/// Re-export transport types.
pub mod transport {
    pub use dhtnet_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use dhtnet_frame::*;
}

/// Re-export messaging types.
pub mod net {
    pub use dhtnet_net::*;
}
