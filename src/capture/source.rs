//! Packet sources
//!
//! The pipeline reads raw frames through the `PacketSource` trait so
//! the live pcap capture can be swapped for an in-memory source in
//! tests. `close()` makes any pending or future read return
//! end-of-stream; `SourceCloser` carries that signal across threads
//! while the capture loop owns the source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// One captured frame, link header included
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
}

/// Blocking source of raw frames. `Ok(None)` is end-of-stream.
pub trait PacketSource: Send {
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;

    /// Unblock any pending `next_frame`; subsequent reads return
    /// end-of-stream.
    fn close(&mut self);
}

/// Closes a `PcapSource` from another thread while a read blocks
#[derive(Clone)]
pub struct SourceCloser {
    stop: Arc<AtomicBool>,
}

impl SourceCloser {
    pub fn close(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Live capture on a network interface via libpcap
pub struct PcapSource {
    capture: pcap::Capture<pcap::Active>,
    stop: Arc<AtomicBool>,
}

/// Poll granularity for the stop flag
const READ_TIMEOUT_MS: i32 = 100;
const SNAPLEN: i32 = 65535;

impl PcapSource {
    /// Open the interface in promiscuous mode and apply the optional
    /// BPF filter. Fails fast on a bad interface or filter.
    pub fn open(interface: &str, filter: Option<&str>) -> Result<Self> {
        debug!(interface, "opening packet capture");
        let mut capture = pcap::Capture::from_device(interface)
            .with_context(|| format!("unknown capture device {}", interface))?
            .promisc(true)
            .snaplen(SNAPLEN)
            .timeout(READ_TIMEOUT_MS)
            .open()
            .with_context(|| format!("failed to open interface {}", interface))?;

        if let Some(filter) = filter {
            debug!(filter, "applying BPF filter");
            capture
                .filter(filter, true)
                .with_context(|| format!("invalid BPF filter '{}'", filter))?;
        }

        Ok(Self {
            capture,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Handle for closing the source after it moves into the capture
    /// task
    pub fn closer(&self) -> SourceCloser {
        SourceCloser {
            stop: Arc::clone(&self.stop),
        }
    }
}

impl PacketSource for PcapSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(None);
            }
            match self.capture.next_packet() {
                Ok(packet) => {
                    return Ok(Some(RawFrame {
                        data: packet.data.to_vec(),
                    }))
                }
                // Read timeout: re-check the stop flag
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(pcap::Error::NoMorePackets) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Print the capture devices visible to libpcap, with a pnet fallback
/// when device enumeration needs privileges pcap does not have.
pub fn list_interfaces() {
    match pcap::Device::list() {
        Ok(devices) if !devices.is_empty() => {
            for device in devices {
                let mut line = format!("  {}", device.name);
                if let Some(desc) = &device.desc {
                    line.push_str(&format!(" - {}", desc));
                }
                let ips: Vec<String> = device
                    .addresses
                    .iter()
                    .map(|a| a.addr.to_string())
                    .collect();
                if !ips.is_empty() {
                    line.push_str(&format!(" [{}]", ips.join(", ")));
                }
                println!("{}", line);
            }
        }
        _ => {
            for iface in pnet::datalink::interfaces() {
                let state = if iface.is_up() { "UP" } else { "DOWN" };
                let ips: Vec<String> = iface.ips.iter().map(|n| n.ip().to_string()).collect();
                if ips.is_empty() {
                    println!("  {} ({})", iface.name, state);
                } else {
                    println!("  {} ({}) [{}]", iface.name, state, ips.join(", "));
                }
            }
        }
    }
}

/// Addresses assigned to an interface, used to classify flow
/// direction. An unknown interface yields an empty set.
pub fn interface_addresses(interface: &str) -> Vec<std::net::IpAddr> {
    let addrs: Vec<std::net::IpAddr> = pnet::datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.name == interface)
        .flat_map(|iface| iface.ips.into_iter().map(|network| network.ip()))
        .collect();

    if addrs.is_empty() {
        warn!(interface, "no addresses found for interface");
    }
    addrs
}


#[cfg(test)]
mod tests {
    use super::testing::MemorySource;
    use super::*;

    #[test]
    fn test_memory_source_drains_then_eof() {
        let mut source = MemorySource::new(vec![vec![1], vec![2]]);
        assert_eq!(source.next_frame().unwrap().unwrap().data, vec![1]);
        assert_eq!(source.next_frame().unwrap().unwrap().data, vec![2]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_close_forces_eof_with_frames_remaining() {
        let mut source = MemorySource::new(vec![vec![1], vec![2]]);
        assert!(source.next_frame().unwrap().is_some());

        source.close();
        assert!(source.next_frame().unwrap().is_none());
    }
}
