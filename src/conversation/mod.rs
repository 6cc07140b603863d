//! Conversation tracking
//!
//! Aggregates decoded events into bidirectional flows with a TCP
//! state machine and timeout-driven eviction.
//!
//! # Example
//!
//! ```ignore
//! use netwatch::conversation::{ConversationTracker, TrackerConfig};
//!
//! let tracker = ConversationTracker::new(local_ips, TrackerConfig::default());
//! tracker.process_event(&mut event);
//! let summaries = tracker.summaries();
//! ```

pub mod tracker;

pub use tracker::ConversationTracker;

use serde::{Deserialize, Serialize};

/// Timeouts driving the eviction sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// TCP inactivity timeout (seconds)
    pub tcp_timeout_secs: u64,
    /// UDP inactivity timeout (seconds)
    pub udp_timeout_secs: u64,
    /// Remove entries idle for longer than this (seconds)
    pub evict_after_secs: u64,
    /// Sweep cadence (seconds)
    pub sweep_interval_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tcp_timeout_secs: 300,
            udp_timeout_secs: 30,
            evict_after_secs: 3600,
            sweep_interval_secs: 30,
        }
    }
}

/// Service labels for ports beyond the app-protocol table
pub(crate) fn service_for_port(port: u16) -> Option<&'static str> {
    match port {
        20 => Some("FTP-DATA"),
        21 => Some("FTP"),
        22 => Some("SSH"),
        23 => Some("TELNET"),
        25 => Some("SMTP"),
        53 => Some("DNS"),
        80 => Some("HTTP"),
        110 => Some("POP3"),
        143 => Some("IMAP"),
        443 => Some("HTTPS"),
        445 => Some("SMB"),
        587 => Some("SMTP-TLS"),
        993 => Some("IMAPS"),
        995 => Some("POP3S"),
        1433 => Some("MSSQL"),
        3306 => Some("MySQL"),
        3389 => Some("RDP"),
        5432 => Some("PostgreSQL"),
        5900 => Some("VNC"),
        6379 => Some("Redis"),
        8080 => Some("HTTP-ALT"),
        8443 => Some("HTTPS-ALT"),
        9200 => Some("Elasticsearch"),
        27017 => Some("MongoDB"),
        _ => None,
    }
}
