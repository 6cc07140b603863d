//! Per-packet event model
//!
//! A `NetworkEvent` is the normalized form of one captured frame,
//! produced by the decoder and enriched by the conversation tracker
//! before it reaches subscribers.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Network-layer protocol of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetProtocol {
    #[serde(rename = "IPv4")]
    Ipv4,
    #[serde(rename = "IPv6")]
    Ipv6,
}

impl std::fmt::Display for NetProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetProtocol::Ipv4 => write!(f, "IPv4"),
            NetProtocol::Ipv6 => write!(f, "IPv6"),
        }
    }
}

/// Transport-layer protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProtocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
}

impl std::fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportProtocol::Tcp => write!(f, "TCP"),
            TransportProtocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Application protocol guessed from well-known ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppProtocol {
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "HTTPS")]
    Https,
    #[serde(rename = "SSH")]
    Ssh,
    #[serde(rename = "FTP")]
    Ftp,
    #[serde(rename = "SMTP")]
    Smtp,
    #[serde(rename = "DNS")]
    Dns,
    #[serde(rename = "MySQL")]
    Mysql,
    #[serde(rename = "PostgreSQL")]
    Postgres,
    #[serde(rename = "Redis")]
    Redis,
    #[serde(rename = "MongoDB")]
    Mongodb,
}

impl AppProtocol {
    /// Map a well-known port to its application protocol
    pub fn from_port(port: u16) -> Option<Self> {
        match port {
            80 => Some(AppProtocol::Http),
            443 => Some(AppProtocol::Https),
            22 => Some(AppProtocol::Ssh),
            21 => Some(AppProtocol::Ftp),
            25 => Some(AppProtocol::Smtp),
            53 => Some(AppProtocol::Dns),
            3306 => Some(AppProtocol::Mysql),
            5432 => Some(AppProtocol::Postgres),
            6379 => Some(AppProtocol::Redis),
            27017 => Some(AppProtocol::Mongodb),
            _ => None,
        }
    }
}

impl std::fmt::Display for AppProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AppProtocol::Http => "HTTP",
            AppProtocol::Https => "HTTPS",
            AppProtocol::Ssh => "SSH",
            AppProtocol::Ftp => "FTP",
            AppProtocol::Smtp => "SMTP",
            AppProtocol::Dns => "DNS",
            AppProtocol::Mysql => "MySQL",
            AppProtocol::Postgres => "PostgreSQL",
            AppProtocol::Redis => "Redis",
            AppProtocol::Mongodb => "MongoDB",
        };
        write!(f, "{}", name)
    }
}

/// Direction of a packet relative to the monitored host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
    Unknown,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Unknown
    }
}

/// TCP flags carried by a single segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TcpPacketFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
    pub urg: bool,
}

impl TcpPacketFlags {
    pub fn is_syn(&self) -> bool {
        self.syn && !self.ack
    }

    pub fn is_syn_ack(&self) -> bool {
        self.syn && self.ack
    }
}

impl std::fmt::Display for TcpPacketFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = String::new();
        if self.syn {
            s.push('S');
        }
        if self.ack {
            s.push('A');
        }
        if self.fin {
            s.push('F');
        }
        if self.rst {
            s.push('R');
        }
        if self.psh {
            s.push('P');
        }
        if self.urg {
            s.push('U');
        }
        if s.is_empty() {
            s.push('.');
        }
        write!(f, "{}", s)
    }
}

/// Decoded, normalized representation of one captured frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub timestamp: DateTime<Utc>,
    pub interface: String,
    pub direction: Direction,
    /// Network-layer protocol (IPv4/IPv6)
    pub protocol: NetProtocol,
    pub transport_protocol: TransportProtocol,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub app_protocol: Option<AppProtocol>,
    pub source_ip: IpAddr,
    pub dest_ip: IpAddr,
    pub source_port: u16,
    pub dest_port: u16,
    /// Total frame length in octets, link header included
    pub size: u32,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dest_hostname: Option<String>,

    /// SNI hostname from a TLS ClientHello, when present
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tls_server_name: Option<String>,

    /// Assigned by the conversation tracker, stable per flow
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub conversation_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tcp_flags: Option<TcpPacketFlags>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub seq_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ack_number: Option<u32>,
}

impl NetworkEvent {
    /// Minimal event constructor used by the decoder
    pub fn new(
        interface: &str,
        protocol: NetProtocol,
        transport_protocol: TransportProtocol,
        source_ip: IpAddr,
        dest_ip: IpAddr,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            interface: interface.to_string(),
            direction: Direction::Unknown,
            protocol,
            transport_protocol,
            app_protocol: None,
            source_ip,
            dest_ip,
            source_port: 0,
            dest_port: 0,
            size: 0,
            source_hostname: None,
            dest_hostname: None,
            tls_server_name: None,
            conversation_id: None,
            tcp_flags: None,
            seq_number: None,
            ack_number: None,
        }
    }

    pub fn is_tcp(&self) -> bool {
        self.transport_protocol == TransportProtocol::Tcp
    }

    pub fn is_udp(&self) -> bool {
        self.transport_protocol == TransportProtocol::Udp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample_event() -> NetworkEvent {
        NetworkEvent::new(
            "eth0",
            NetProtocol::Ipv4,
            TransportProtocol::Tcp,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
        )
    }

    #[test]
    fn test_flag_helpers() {
        let syn = TcpPacketFlags { syn: true, ..Default::default() };
        assert!(syn.is_syn());
        assert!(!syn.is_syn_ack());

        let syn_ack = TcpPacketFlags { syn: true, ack: true, ..Default::default() };
        assert!(!syn_ack.is_syn());
        assert!(syn_ack.is_syn_ack());
        assert_eq!(syn_ack.to_string(), "SA");
    }

    #[test]
    fn test_app_protocol_from_port() {
        assert_eq!(AppProtocol::from_port(443), Some(AppProtocol::Https));
        assert_eq!(AppProtocol::from_port(53), Some(AppProtocol::Dns));
        assert_eq!(AppProtocol::from_port(12345), None);
    }

    #[test]
    fn test_event_serialization_skips_empty_fields() {
        let event = sample_event();
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["protocol"], "IPv4");
        assert_eq!(json["transport_protocol"], "TCP");
        assert_eq!(json["direction"], "unknown");
        assert_eq!(json["source_ip"], "10.0.0.1");
        assert!(json.get("conversation_id").is_none());
        assert!(json.get("tls_server_name").is_none());
        assert!(json.get("tcp_flags").is_none());
    }

    #[test]
    fn test_event_round_trip() {
        let mut event = sample_event();
        event.source_port = 40000;
        event.dest_port = 443;
        event.tcp_flags = Some(TcpPacketFlags { syn: true, ..Default::default() });
        event.seq_number = Some(100);
        event.conversation_id = Some("abc".to_string());

        let json = serde_json::to_string(&event).unwrap();
        let back: NetworkEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(back.source_port, 40000);
        assert_eq!(back.seq_number, Some(100));
        assert_eq!(back.conversation_id.as_deref(), Some("abc"));
        assert!(back.tcp_flags.unwrap().is_syn());
    }
}
