//! Daemon configuration
//!
//! Loaded from an optional TOML file and overridden by CLI flags.
//! Every section has serde defaults so a partial file is fine.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::conversation::TrackerConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub dns: DnsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// The host's local IP set, used to classify flow direction.
    /// Explicitly configured addresses win; otherwise the capture
    /// interface's own addresses are used.
    pub fn local_ip_set(&self) -> HashSet<IpAddr> {
        if !self.capture.local_ips.is_empty() {
            return self.capture.local_ips.iter().copied().collect();
        }
        crate::capture::interface_addresses(&self.capture.interface)
            .into_iter()
            .collect()
    }
}

/// Capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Interface to capture on
    #[serde(default)]
    pub interface: String,

    /// Optional BPF filter expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Addresses considered local; defaults to the interface's own
    #[serde(default)]
    pub local_ips: Vec<IpAddr>,

    /// Capacity of the decoder -> hub event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_event_buffer() -> usize {
    1024
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            filter: None,
            local_ips: Vec::new(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// WebSocket/HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP port for the subscriber endpoint
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

/// Reverse-DNS cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Cache TTL (seconds)
    #[serde(default = "default_dns_ttl")]
    pub ttl_secs: u64,

    /// Expired-entry sweep cadence (seconds)
    #[serde(default = "default_dns_cleanup")]
    pub cleanup_interval_secs: u64,
}

fn default_dns_ttl() -> u64 {
    300
}

fn default_dns_cleanup() -> u64 {
    60
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_dns_ttl(),
            cleanup_interval_secs: default_dns_cleanup(),
        }
    }
}
