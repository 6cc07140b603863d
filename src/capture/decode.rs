//! Frame decoding
//!
//! Turns a raw ethernet frame into a normalized `NetworkEvent`.
//! Frames without a network or transport layer produce nothing; the
//! caller counts those as decode drops.

use std::net::IpAddr;
use std::sync::Arc;

use etherparse::SlicedPacket;

use crate::core::{
    AppProtocol, Direction, NetProtocol, NetworkEvent, TcpPacketFlags, TransportProtocol,
};
use crate::resolver::DnsCache;
use crate::tls::extract_sni;

/// Ports that identify a well-known service for the direction
/// heuristic.
const WELL_KNOWN_PORTS: [u16; 10] = [80, 443, 22, 21, 25, 53, 3306, 5432, 6379, 27017];

fn is_well_known(port: u16) -> bool {
    WELL_KNOWN_PORTS.contains(&port)
}

/// Decoder for one capture interface
pub struct PacketDecoder {
    interface: String,
    resolver: Arc<DnsCache>,
}

impl PacketDecoder {
    pub fn new(interface: &str, resolver: Arc<DnsCache>) -> Self {
        Self {
            interface: interface.to_string(),
            resolver,
        }
    }

    /// Decode a frame into an event. Returns `None` when the network
    /// or transport layer cannot be decoded.
    pub fn decode(&self, data: &[u8]) -> Option<NetworkEvent> {
        let sliced = SlicedPacket::from_ethernet(data).ok()?;

        let (protocol, source_ip, dest_ip) = match &sliced.net {
            Some(etherparse::NetSlice::Ipv4(ipv4)) => {
                let header = ipv4.header();
                (
                    NetProtocol::Ipv4,
                    IpAddr::from(header.source_addr()),
                    IpAddr::from(header.destination_addr()),
                )
            }
            Some(etherparse::NetSlice::Ipv6(ipv6)) => {
                let header = ipv6.header();
                (
                    NetProtocol::Ipv6,
                    IpAddr::from(header.source_addr()),
                    IpAddr::from(header.destination_addr()),
                )
            }
            _ => return None, // ARP and friends
        };

        let mut event = match &sliced.transport {
            Some(etherparse::TransportSlice::Tcp(tcp)) => {
                let mut event = NetworkEvent::new(
                    &self.interface,
                    protocol,
                    TransportProtocol::Tcp,
                    source_ip,
                    dest_ip,
                );
                event.source_port = tcp.source_port();
                event.dest_port = tcp.destination_port();

                let flags = TcpPacketFlags {
                    syn: tcp.syn(),
                    ack: tcp.ack(),
                    fin: tcp.fin(),
                    rst: tcp.rst(),
                    psh: tcp.psh(),
                    urg: tcp.urg(),
                };
                event.tcp_flags = Some(flags);
                event.seq_number = Some(tcp.sequence_number());
                event.ack_number = Some(tcp.acknowledgment_number());

                event.direction = if flags.is_syn() {
                    Direction::Outbound
                } else if flags.is_syn_ack() {
                    Direction::Inbound
                } else {
                    port_direction(event.source_port, event.dest_port)
                };

                let payload = tcp.payload();
                if (event.source_port == 443 || event.dest_port == 443) && !payload.is_empty() {
                    event.tls_server_name = extract_sni(payload);
                }
                if !payload.is_empty() {
                    event.app_protocol = guess_app_protocol(event.source_port, event.dest_port);
                }
                event
            }
            Some(etherparse::TransportSlice::Udp(udp)) => {
                let mut event = NetworkEvent::new(
                    &self.interface,
                    protocol,
                    TransportProtocol::Udp,
                    source_ip,
                    dest_ip,
                );
                event.source_port = udp.source_port();
                event.dest_port = udp.destination_port();
                event.direction = port_direction(event.source_port, event.dest_port);
                if !udp.payload().is_empty() {
                    event.app_protocol = guess_app_protocol(event.source_port, event.dest_port);
                }
                event
            }
            _ => return None,
        };

        event.size = data.len() as u32;

        // Cached-or-provisional only; the capture path never waits on DNS
        event.source_hostname = Some(self.resolver.resolve_cached(source_ip));
        event.dest_hostname = Some(self.resolver.resolve_cached(dest_ip));

        Some(event)
    }
}

/// Direction heuristic for packets without handshake flags: the side
/// talking to a privileged or well-known port is the initiator.
fn port_direction(source_port: u16, dest_port: u16) -> Direction {
    if dest_port < 1024 || is_well_known(dest_port) {
        Direction::Outbound
    } else if source_port < 1024 || is_well_known(source_port) {
        Direction::Inbound
    } else {
        Direction::Unknown
    }
}

/// Application protocol from the destination port, falling back to
/// the source port.
fn guess_app_protocol(source_port: u16, dest_port: u16) -> Option<AppProtocol> {
    AppProtocol::from_port(dest_port).or_else(|| AppProtocol::from_port(source_port))
}
