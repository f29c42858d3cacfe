use std::fmt;
use std::io;

use dhtnet_frame::FrameError;
use dhtnet_net::{ErrorKind, NetError};
use dhtnet_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;
pub const INTERRUPTED: i32 = 130;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: &io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrNotAvailable => TRANSPORT_ERROR,
        io::ErrorKind::AddrInUse => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match &err {
        TransportError::Bind { source, .. }
        | TransportError::Dial { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => {
            CliError::new(io_error(context, source).code, format!("{context}: {err}"))
        }
        _ => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match &err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        FrameError::Malformed(_) | FrameError::MessageTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::StreamReset | FrameError::ConnectionClosed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

pub fn net_error(context: &str, err: NetError) -> CliError {
    match err {
        NetError::Transport(err) => transport_error(context, err),
        NetError::Frame(err) => frame_error(context, err),
        NetError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        other => {
            let code = match other.kind() {
                ErrorKind::Framing | ErrorKind::Protocol => DATA_INVALID,
                ErrorKind::Cancelled => INTERRUPTED,
                ErrorKind::Unavailable => TRANSPORT_ERROR,
                ErrorKind::Stream => FAILURE,
            };
            CliError::new(code, format!("{context}: {other}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use dhtnet_frame::MessageType;
    use dhtnet_transport::PeerId;

    use super::*;

    #[test]
    fn dial_refused_is_transport_error() {
        let err = NetError::Transport(TransportError::Dial {
            peer: PeerId::new("srv"),
            source: Arc::new(io::Error::from(io::ErrorKind::ConnectionRefused)),
        });
        let cli = net_error("ping failed", err);
        assert_eq!(cli.code, TRANSPORT_ERROR);
        assert!(cli.message.starts_with("ping failed: failed to dial srv"));
    }

    #[test]
    fn net_errors_map_by_kind() {
        assert_eq!(net_error("x", NetError::Timeout(Duration::from_secs(1))).code, TIMEOUT);
        assert_eq!(net_error("x", NetError::Cancelled).code, INTERRUPTED);
        assert_eq!(net_error("x", NetError::StreamReset).code, FAILURE);
        assert_eq!(
            net_error("x", NetError::UnknownMessageType(MessageType::FIND_NODE)).code,
            DATA_INVALID
        );
        assert_eq!(
            net_error("x", NetError::Frame(FrameError::Malformed("bad".into()))).code,
            DATA_INVALID
        );
    }

    #[test]
    fn peer_mismatch_is_transport_error() {
        let err = TransportError::PeerMismatch {
            expected: PeerId::new("a"),
            actual: PeerId::new("b"),
        };
        assert_eq!(transport_error("dial", err).code, TRANSPORT_ERROR);
    }
}
