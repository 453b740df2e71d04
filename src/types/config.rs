//! Configuration for calcache.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::CalcacheResult;

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "calcache.toml";

/// Main configuration for calcache.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Computation server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Proxy listener settings.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Proxy -> server connection settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    9999
}

fn default_proxy_port() -> u16 {
    9998
}

/// Computation server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port.
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Max-age attached to every result (seconds). Unset = no cap.
    #[serde(default)]
    pub max_age_secs: Option<u64>,

    /// Ask downstream caches not to store results.
    #[serde(default)]
    pub no_store: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_server_port(),
            max_age_secs: None,
            no_store: false,
        }
    }
}

impl ServerConfig {
    /// `host:port` listen address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Proxy listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Listen host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port.
    #[serde(default = "default_proxy_port")]
    pub port: u16,

    /// Close client connections idle for this long (seconds). Unset = never.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_proxy_port(),
            idle_timeout_secs: None,
        }
    }
}

impl ProxyConfig {
    /// `host:port` listen address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Idle timeout as a duration.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

/// Where the proxy forwards cache misses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Computation server host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Computation server port.
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bound on connect + round trip for one request (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_server_port(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    5
}

impl UpstreamConfig {
    /// `host:port` of the computation server.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Freshness window in seconds.
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,

    /// LRU capacity. Unset = unbounded.
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            max_entries: None,
        }
    }
}

fn default_ttl() -> u64 {
    300 // 5 minutes
}

impl CacheConfig {
    /// Freshness window as a duration.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> CalcacheResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> CalcacheResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Tries to load configuration from the current directory or uses default.
    pub fn load_or_default() -> Self {
        Self::load(DEFAULT_CONFIG_FILE).unwrap_or_default()
    }
}
