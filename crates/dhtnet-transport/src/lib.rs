//! Duplex stream transport abstraction for dhtnet.
//!
//! Everything above this layer talks to peers through a [`DuplexStream`]:
//! an ordered, bidirectional byte channel to one remote [`PeerId`]. Streams
//! come from a [`Dialer`] (outbound) or a [`Listener`] (inbound).
//!
//! Two transports are provided:
//! - [`mem`]: in-process streams over `tokio::io::duplex`, for tests and
//!   single-process simulations
//! - [`tcp`]: one TCP connection per stream, preceded by an identify
//!   exchange that binds the connection to a peer identity

pub mod error;
pub mod mem;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use mem::{MemStream, MemoryDialer, MemoryListener, MemoryNetwork};
pub use tcp::{Identify, TcpDialer, TcpDuplexStream, TcpTransport};
pub use traits::{BoxStream, Dialer, DuplexStream, Listener, PeerId};
