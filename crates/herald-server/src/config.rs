//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (HERALD_HOST, HERALD_PORT)
//! - TOML configuration file

use anyhow::{Context, Result};
use herald_core::{ChannelPatterns, CoordinatorConfig, DirectoryConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Verbose logging.
    #[serde(default)]
    pub dev_mode: bool,

    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Channel classification and connection limits.
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Authorization backend.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Cluster bus.
    #[serde(default)]
    pub bus: BusConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Private channel and client event patterns.
    #[serde(flatten)]
    pub patterns: ChannelPatterns,

    /// Connection limit when the authorizer does not give one.
    /// Negative means unlimited.
    #[serde(default = "default_max_clients")]
    pub default_max_clients: i64,
}

/// Authorization backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the auth server. Without it only public channels can be
    /// joined.
    #[serde(default)]
    pub host: Option<String>,

    /// Path of the auth endpoint.
    #[serde(default = "default_auth_endpoint")]
    pub endpoint: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_auth_timeout")]
    pub timeout_ms: u64,
}

/// Cluster bus configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusConfig {
    /// Redis URL. Without it the node runs on an in-process bus.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Namespace prefix; only channels under it are bridged.
    #[serde(default)]
    pub world: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum number of occupied channels.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,

    /// Maximum channels per connection.
    #[serde(default = "default_max_channels_per_connection")]
    pub max_channels_per_connection: usize,

    /// Outbound queue length per connection.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("HERALD_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("HERALD_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(6001)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_clients() -> i64 {
    1
}

fn default_auth_endpoint() -> String {
    "/broadcasting/auth".to_string()
}

fn default_auth_timeout() -> u64 {
    10_000
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_channels() -> usize {
    10_000
}

fn default_max_channels_per_connection() -> usize {
    100
}

fn default_outbound_capacity() -> usize {
    1024
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
            websocket_path: default_ws_path(),
            channels: ChannelsConfig::default(),
            auth: AuthConfig::default(),
            bus: BusConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            patterns: ChannelPatterns::default(),
            default_max_clients: default_max_clients(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            host: None,
            endpoint: default_auth_endpoint(),
            timeout_ms: default_auth_timeout(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_channels: default_max_channels(),
            max_channels_per_connection: default_max_channels_per_connection(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl AuthConfig {
    /// Full URL of the auth endpoint, if a host is configured.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.host.as_ref().map(|host| {
            format!(
                "{}/{}",
                host.trim_end_matches('/'),
                self.endpoint.trim_start_matches('/')
            )
        })
    }

    /// Request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "herald.toml",
            "/etc/herald/herald.toml",
            "~/.config/herald/herald.toml",
        ];

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

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Coordinator settings.
    #[must_use]
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            patterns: self.channels.patterns.clone(),
            default_max_clients: self.channels.default_max_clients,
        }
    }

    /// Directory settings.
    #[must_use]
    pub fn directory(&self) -> DirectoryConfig {
        DirectoryConfig {
            max_connections: self.limits.max_connections,
            max_channels: self.limits.max_channels,
            max_channels_per_connection: self.limits.max_channels_per_connection,
            outbound_capacity: self.limits.outbound_capacity,
        }
    }
}
