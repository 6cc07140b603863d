//! Conversation (flow) model
//!
//! A conversation is the bidirectional aggregate of all packets that
//! share a canonical 5-tuple. Both directions of a flow map to the
//! same key, so the endpoint with the lexicographically smaller IP
//! (ties broken by the smaller port) is always placed first.

use std::collections::HashSet;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::event::{NetworkEvent, TransportProtocol};

/// 5-tuple identifying a conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub protocol: TransportProtocol,
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

impl ConversationKey {
    /// Key as seen on the wire, source first
    pub fn from_event(event: &NetworkEvent) -> Self {
        Self {
            protocol: event.transport_protocol,
            src_ip: event.source_ip,
            src_port: event.source_port,
            dst_ip: event.dest_ip,
            dst_port: event.dest_port,
        }
    }

    /// Same key with the endpoints swapped
    pub fn reversed(&self) -> Self {
        Self {
            protocol: self.protocol,
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
        }
    }

    /// Order the endpoints so both directions produce the same key.
    /// The endpoint whose textual IP sorts lexicographically smaller
    /// comes first, ties broken by the smaller port; canonicalizing
    /// an already-canonical key is the identity.
    pub fn canonicalize(&self) -> Self {
        let src = self.src_ip.to_string();
        let dst = self.dst_ip.to_string();
        if src > dst || (src == dst && self.src_port > self.dst_port) {
            self.reversed()
        } else {
            self.clone()
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}->{}:{}",
            self.protocol, self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}

/// Lifecycle state of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationState {
    #[serde(rename = "NEW")]
    New,
    #[serde(rename = "ESTABLISHED")]
    Established,
    #[serde(rename = "CLOSING")]
    Closing,
    #[serde(rename = "CLOSED")]
    Closed,
}

impl ConversationState {
    /// Position in the forward-only lifecycle
    fn rank(self) -> u8 {
        match self {
            ConversationState::New => 0,
            ConversationState::Established => 1,
            ConversationState::Closing => 2,
            ConversationState::Closed => 3,
        }
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationState::New => write!(f, "NEW"),
            ConversationState::Established => write!(f, "ESTABLISHED"),
            ConversationState::Closing => write!(f, "CLOSING"),
            ConversationState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Per-direction traffic counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationStats {
    pub packets_in: u64,
    pub packets_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub first_packet: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// TCP handshake and teardown tracking
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TcpConversationState {
    pub syn_seen: bool,
    pub syn_ack_seen: bool,
    pub ack_seen: bool,

    pub initial_seq_client: u32,
    pub initial_seq_server: u32,
    pub last_seq_client: u32,
    pub last_seq_server: u32,

    pub fin_seen_client: bool,
    pub fin_seen_server: bool,
    pub rst_seen: bool,
}

/// Bidirectional aggregate of all packets sharing a canonical 5-tuple
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub key: ConversationKey,
    pub state: ConversationState,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time: Option<DateTime<Utc>>,
    pub stats: ConversationStats,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tcp_state: Option<TcpConversationState>,

    /// Port-derived service label, overridable once by app protocol
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hostname: Option<String>,

    /// Set once the service label came from an observed app protocol
    #[serde(skip)]
    pub service_locked: bool,
}

impl Conversation {
    /// Create a conversation for the first event bearing its key
    pub fn new(id: String, key: ConversationKey, event: &NetworkEvent) -> Self {
        let tcp_state = if event.is_tcp() && event.tcp_flags.is_some() {
            Some(TcpConversationState::default())
        } else {
            None
        };

        Self {
            id,
            key,
            state: ConversationState::New,
            start_time: event.timestamp,
            end_time: None,
            stats: ConversationStats {
                first_packet: Some(event.timestamp),
                ..Default::default()
            },
            tcp_state,
            service: None,
            hostname: None,
            service_locked: false,
        }
    }

    /// Advance the lifecycle state, never moving backwards
    pub fn advance_state(&mut self, to: ConversationState) {
        if to.rank() > self.state.rank() {
            self.state = to;
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ConversationState::New | ConversationState::Established
        )
    }

    pub fn total_packets(&self) -> u64 {
        self.stats.packets_in + self.stats.packets_out
    }

    pub fn total_bytes(&self) -> u64 {
        self.stats.bytes_in + self.stats.bytes_out
    }

    /// Duration of the conversation, up to now while it is open
    pub fn duration(&self) -> Duration {
        let end = self.end_time.unwrap_or_else(Utc::now);
        end.signed_duration_since(self.start_time)
    }

    /// Compact per-flow record for display, with the local endpoint
    /// chosen against the host's IP set
    pub fn to_summary(&self, local_ips: &HashSet<IpAddr>) -> ConversationSummary {
        let src = format!("{}:{}", self.key.src_ip, self.key.src_port);
        let dst = format!("{}:{}", self.key.dst_ip, self.key.dst_port);
        let (local_addr, remote_addr) = if local_ips.contains(&self.key.src_ip) {
            (src, dst)
        } else {
            (dst, src)
        };

        ConversationSummary {
            id: self.id.clone(),
            protocol: self.key.protocol,
            local_addr,
            remote_addr,
            state: self.state,
            duration: format_duration(self.duration()),
            packets_in: self.stats.packets_in,
            packets_out: self.stats.packets_out,
            bytes_in: self.stats.bytes_in,
            bytes_out: self.stats.bytes_out,
            service: self.service.clone(),
            last_activity: self.stats.last_activity,
        }
    }
}

/// Simplified view of a conversation for UI display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub protocol: TransportProtocol,
    pub local_addr: String,
    pub remote_addr: String,
    pub state: ConversationState,
    pub duration: String,
    pub packets_in: u64,
    pub packets_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Render a duration as a compact "1h2m3s" string, seconds resolution
pub fn format_duration(d: Duration) -> String {
    let total = d.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::NetProtocol;
    use std::net::Ipv4Addr;

    fn event(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16) -> NetworkEvent {
        let mut e = NetworkEvent::new(
            "eth0",
            NetProtocol::Ipv4,
            TransportProtocol::Tcp,
            IpAddr::V4(Ipv4Addr::from(src)),
            IpAddr::V4(Ipv4Addr::from(dst)),
        );
        e.source_port = sport;
        e.dest_port = dport;
        e
    }

    #[test]
    fn test_canonicalize_orders_endpoints() {
        let forward = ConversationKey::from_event(&event([10, 0, 0, 1], 40000, [93, 184, 216, 34], 443));
        let reverse = ConversationKey::from_event(&event([93, 184, 216, 34], 443, [10, 0, 0, 1], 40000));

        assert_eq!(forward.canonicalize(), reverse.canonicalize());
        assert_eq!(forward.canonicalize().src_ip, "10.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let key = ConversationKey::from_event(&event([10, 0, 0, 1], 40000, [93, 184, 216, 34], 443));
        let canonical = key.canonicalize();
        assert_eq!(canonical.canonicalize(), canonical);
    }

    #[test]
    fn test_canonicalize_is_lexicographic_on_textual_ips() {
        // Numerically 2.0.0.1 < 10.0.0.1, but as strings "10.0.0.1"
        // sorts first
        let key = ConversationKey::from_event(&event([2, 0, 0, 1], 1000, [10, 0, 0, 1], 2000));
        let canonical = key.canonicalize();
        assert_eq!(canonical.src_ip, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(canonical.src_port, 2000);
        assert_eq!(canonical.canonicalize(), canonical);
    }

    #[test]
    fn test_canonicalize_breaks_ip_tie_by_port() {
        let key = ConversationKey::from_event(&event([10, 0, 0, 1], 5000, [10, 0, 0, 1], 80));
        let canonical = key.canonicalize();
        assert_eq!(canonical.src_port, 80);
        assert_eq!(canonical.dst_port, 5000);
    }

    #[test]
    fn test_state_never_moves_backwards() {
        let e = event([10, 0, 0, 1], 40000, [93, 184, 216, 34], 443);
        let key = ConversationKey::from_event(&e).canonicalize();
        let mut conv = Conversation::new("test".to_string(), key, &e);

        conv.advance_state(ConversationState::Established);
        conv.advance_state(ConversationState::New);
        assert_eq!(conv.state, ConversationState::Established);

        conv.advance_state(ConversationState::Closed);
        conv.advance_state(ConversationState::Closing);
        assert_eq!(conv.state, ConversationState::Closed);
    }

    #[test]
    fn test_summary_picks_local_side() {
        let e = event([93, 184, 216, 34], 443, [10, 0, 0, 1], 40000);
        let key = ConversationKey::from_event(&e).canonicalize();
        let conv = Conversation::new("test".to_string(), key, &e);

        let mut local_ips = HashSet::new();
        local_ips.insert("10.0.0.1".parse::<IpAddr>().unwrap());

        let summary = conv.to_summary(&local_ips);
        assert_eq!(summary.local_addr, "10.0.0.1:40000");
        assert_eq!(summary.remote_addr, "93.184.216.34:443");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(0)), "0s");
        assert_eq!(format_duration(Duration::seconds(45)), "45s");
        assert_eq!(format_duration(Duration::seconds(120)), "2m0s");
        assert_eq!(format_duration(Duration::seconds(3661)), "1h1m1s");
    }
}
