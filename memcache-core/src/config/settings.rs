use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::duration::ConfigDuration;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolKind {
    #[default]
    Binary,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PoolConfig {
    pub max_connections: usize,
    pub acquire_timeout: ConfigDuration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            acquire_timeout: ConfigDuration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SocketConfig {
    pub connect_timeout: ConfigDuration,
    pub read_timeout: ConfigDuration,
    pub write_timeout: ConfigDuration,
    pub ping_timeout: ConfigDuration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: ConfigDuration::from_secs(1),
            read_timeout: ConfigDuration::from_secs(1),
            write_timeout: ConfigDuration::from_secs(1),
            ping_timeout: ConfigDuration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HealthCheckConfig {
    pub interval: ConfigDuration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: ConfigDuration::from_secs(10),
        }
    }
}

/// Resolved timeouts and bounds handed to every node.
#[derive(Debug, Copy, Clone)]
pub struct SocketSettings {
    pub max_connections: usize,
    pub acquire_timeout: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub ping_timeout: Duration,
}

impl SocketSettings {
    pub fn new(pool: &PoolConfig, socket: &SocketConfig) -> Self {
        Self {
            max_connections: pool.max_connections.max(1),
            acquire_timeout: pool.acquire_timeout.to_std_duration(),
            connect_timeout: socket.connect_timeout.to_std_duration(),
            read_timeout: socket.read_timeout.to_std_duration(),
            write_timeout: socket.write_timeout.to_std_duration(),
            ping_timeout: socket.ping_timeout.to_std_duration(),
        }
    }
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self::new(&PoolConfig::default(), &SocketConfig::default())
    }
}
