//! Client configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (ORTC_URL, ORTC_CLUSTER_URL)
//! - TOML configuration file
//! - Code, via the builder-style `with_*` methods

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Direct server URL.
    #[serde(default = "default_url")]
    pub url: Option<String>,

    /// Cluster URL, resolved to a server URL on every connect.
    #[serde(default = "default_cluster_url")]
    pub cluster_url: Option<String>,

    /// Announcement subchannel sent in the handshake.
    #[serde(default)]
    pub announcement_subchannel: String,

    /// Connection metadata sent in the handshake.
    #[serde(default)]
    pub connection_metadata: String,

    /// Multipart messages buffered at once; the oldest is dropped beyond this.
    #[serde(default = "default_max_pending_messages")]
    pub max_pending_messages: usize,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Reconnection configuration.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// REST configuration.
    #[serde(default)]
    pub rest: RestConfig,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Tick period of the monitor in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Ticks without traffic tolerated before the connection is declared dead.
    #[serde(default = "default_max_missed")]
    pub max_missed: u32,
}

/// Reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Tick period of the reconnection loop in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Minimum time between two connect attempts in milliseconds.
    #[serde(default = "default_reconnect_interval")]
    pub interval_ms: u64,
}

/// REST configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    /// Request timeout in milliseconds.
    #[serde(default = "default_rest_timeout")]
    pub timeout_ms: u64,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// WebSocket connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

// Default value functions
fn default_url() -> Option<String> {
    std::env::var("ORTC_URL").ok().filter(|s| !s.is_empty())
}

fn default_cluster_url() -> Option<String> {
    std::env::var("ORTC_CLUSTER_URL").ok().filter(|s| !s.is_empty())
}

fn default_max_pending_messages() -> usize {
    crate::reassembly::DEFAULT_MAX_PENDING
}

fn default_tick_ms() -> u64 {
    1_000
}

fn default_max_missed() -> u32 {
    30
}

fn default_reconnect_interval() -> u64 {
    5_000 // 5 seconds
}

fn default_rest_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_connect_timeout() -> u64 {
    10_000 // 10 seconds
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            cluster_url: default_cluster_url(),
            announcement_subchannel: String::new(),
            connection_metadata: String::new(),
            max_pending_messages: default_max_pending_messages(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            rest: RestConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            max_missed: default_max_missed(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            interval_ms: default_reconnect_interval(),
        }
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_rest_timeout(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl HeartbeatConfig {
    /// Monitor tick period.
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl ReconnectConfig {
    /// Loop tick period.
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    /// Number of ticks between two connect attempts.
    #[must_use]
    pub fn ticks_per_attempt(&self) -> u64 {
        (self.interval_ms / self.tick_ms.max(1)).max(1)
    }
}

impl RestConfig {
    /// Request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl TransportConfig {
    /// Connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl ClientConfig {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = ["ortc.toml", "~/.config/ortc/ortc.toml"];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ClientConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Set the direct server URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the cluster URL.
    #[must_use]
    pub fn with_cluster_url(mut self, cluster_url: impl Into<String>) -> Self {
        self.cluster_url = Some(cluster_url.into());
        self
    }

    /// Set the announcement subchannel.
    #[must_use]
    pub fn with_announcement_subchannel(mut self, subchannel: impl Into<String>) -> Self {
        self.announcement_subchannel = subchannel.into();
        self
    }

    /// Set the connection metadata.
    #[must_use]
    pub fn with_connection_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.connection_metadata = metadata.into();
        self
    }
}
