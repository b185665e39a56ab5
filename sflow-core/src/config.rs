//! Server configuration. Defaults match the values named in the protocol
//! spec; everything else is an operational knob a deployer may override.

use serde::{Deserialize, Serialize};

/// Default bind address: all interfaces, port 9000.
pub const DEFAULT_BIND: &str = "0.0.0.0:9000";
pub const DEFAULT_BACKLOG: u32 = 16;
pub const DEFAULT_BUFFER_CAPACITY: usize = 8192;
pub const DEFAULT_ROUTING_TABLE_CAPACITY: usize = 256;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;

/// Top-level configuration for one `sflow-core` server instance. Loaded by
/// `sflow-server` from a TOML file via `serdeconv`, or left at `Default` for
/// an embedder that only needs the library.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` the listener binds to.
    pub bind: String,
    /// Listen backlog passed to the OS. Spec requires at least 16.
    pub backlog: u32,
    /// Per-connection receive/transmit buffer capacity, in bytes.
    pub buffer_capacity: usize,
    /// Maximum number of routes the routing table holds at once.
    pub routing_table_capacity: usize,
    /// Upper bound, in milliseconds, the event loop blocks in one poll call.
    pub poll_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            bind: DEFAULT_BIND.to_string(),
            backlog: DEFAULT_BACKLOG,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            routing_table_capacity: DEFAULT_ROUTING_TABLE_CAPACITY,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }
}

impl ServerConfig {
    /// Validates the cross-field invariants a deserialized config can't
    /// express on its own (e.g. a TOML file providing `backlog = 0`).
    pub fn validate(&self) -> Result<(), String> {
        if self.backlog < DEFAULT_BACKLOG {
            return Err(format!("backlog must be >= {}", DEFAULT_BACKLOG));
        }
        if self.buffer_capacity <= crate::net::frame::HEADER_SIZE {
            return Err("buffer_capacity must exceed the frame header size".to_string());
        }
        if self.routing_table_capacity == 0 {
            return Err("routing_table_capacity must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_values() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.backlog, 16);
        assert_eq!(config.buffer_capacity, 8192);
        assert_eq!(config.routing_table_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_small_backlog() {
        let mut config = ServerConfig::default();
        config.backlog = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_buffer_smaller_than_header() {
        let mut config = ServerConfig::default();
        config.buffer_capacity = 4;
        assert!(config.validate().is_err());
    }
}
