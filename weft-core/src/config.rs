//! Engine configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the engine and its websocket transport.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bind address for the websocket server.
    pub bind_addr: SocketAddr,

    /// Upper bound on recompute passes within one update cycle.
    /// Exceeding it is treated as a dependency cycle and aborts the cycle.
    pub max_cycle_passes: usize,

    /// How long a session survives without a transport before teardown.
    /// Queued updates are retained for the whole window and replayed on
    /// reconnect.
    pub reconnect_grace: Duration,

    /// Maximum inbound websocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let port = std::env::var("WEFT_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(4750);

        let bind_addr = SocketAddr::from(([127, 0, 0, 1], port));

        Self {
            bind_addr,
            max_cycle_passes: 64,
            reconnect_grace: Duration::from_secs(30),
            max_message_size: 256 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = EngineConfig::default();
        assert!(config.max_cycle_passes > 0);
        assert!(config.reconnect_grace > Duration::ZERO);
        assert!(config.max_message_size > 0);
    }
}
