use std::time::Duration;

use dhtnet_frame::FrameConfig;

/// Kademlia DHT protocol identifier advertised and expected by default.
pub const DEFAULT_PROTOCOL: &str = "/ipfs/kad/1.0.0";

/// How long a session or inbound stream waits for the next message.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Idle sessions kept per peer.
pub const DEFAULT_MAX_IDLE_PER_PEER: usize = 8;

/// How long a session may sit idle in the pool before it is discarded.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Stream pool limits.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle sessions kept per peer; older ones are evicted past this.
    pub max_idle_per_peer: usize,
    /// Idle sessions older than this are reset instead of reused. `None`
    /// keeps them indefinitely.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_peer: DEFAULT_MAX_IDLE_PER_PEER,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

/// Node-wide messaging configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub frame: FrameConfig,
    pub pool: PoolConfig,
    /// Applied to every session reply and every inbound request read.
    pub read_timeout: Duration,
    /// Protocols a peer must support for replies and requests from it to
    /// refresh the routing table.
    pub protocols: Vec<String>,
}

impl NodeConfig {
    /// The frame configuration used for sessions and inbound streams.
    pub fn session_frame_config(&self) -> FrameConfig {
        FrameConfig {
            read_timeout: Some(self.read_timeout),
            ..self.frame.clone()
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            pool: PoolConfig::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            protocols: vec![DEFAULT_PROTOCOL.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use dhtnet_frame::DEFAULT_MAX_MESSAGE_SIZE;

    use super::*;

    #[test]
    fn defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.read_timeout, Duration::from_secs(60));
        assert_eq!(config.protocols, [DEFAULT_PROTOCOL]);
        assert_eq!(config.pool.max_idle_per_peer, 8);
        assert_eq!(config.pool.idle_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.frame.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn session_frame_config_carries_read_timeout() {
        let config = NodeConfig {
            read_timeout: Duration::from_secs(5),
            frame: FrameConfig {
                max_message_size: 1024,
                ..FrameConfig::default()
            },
            ..NodeConfig::default()
        };

        let frame = config.session_frame_config();
        assert_eq!(frame.read_timeout, Some(Duration::from_secs(5)));
        assert_eq!(frame.max_message_size, 1024);
    }
}
