//! Capture throughput counters
//!
//! Lock-free counters updated from the capture path and exposed as an
//! immutable snapshot through the health endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Atomic counters for capture diagnostics
#[derive(Debug)]
pub struct CaptureStats {
    start_time: DateTime<Utc>,
    total_packets: AtomicU64,
    total_bytes: AtomicU64,
    tcp_packets: AtomicU64,
    udp_packets: AtomicU64,
    decode_drops: AtomicU64,
    dropped_events: AtomicU64,
    processed_events: AtomicU64,
    /// Epoch milliseconds of the last captured packet, 0 = never
    last_packet_ms: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            total_packets: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            tcp_packets: AtomicU64::new(0),
            udp_packets: AtomicU64::new(0),
            decode_drops: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
            processed_events: AtomicU64::new(0),
            last_packet_ms: AtomicU64::new(0),
        }
    }

    pub fn record_packet(&self, bytes: u64) {
        self.total_packets.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.last_packet_ms
            .store(Utc::now().timestamp_millis().max(0) as u64, Ordering::Relaxed);
    }

    pub fn record_tcp(&self) {
        self.tcp_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_udp(&self) {
        self.udp_packets.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame the decoder could not turn into an event
    pub fn record_decode_drop(&self) {
        self.decode_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// An event refused by a full channel
    pub fn record_dropped(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn processed_events(&self) -> u64 {
        self.processed_events.load(Ordering::Relaxed)
    }

    /// Immutable snapshot for the health endpoint
    pub fn snapshot(&self) -> StatsSnapshot {
        let now = Utc::now();
        let uptime = (now - self.start_time).num_milliseconds().max(1) as f64 / 1000.0;
        let total_packets = self.total_packets.load(Ordering::Relaxed);
        let last_ms = self.last_packet_ms.load(Ordering::Relaxed);

        let (last_packet_time, last_packet_ago_seconds) = if last_ms == 0 {
            ("never".to_string(), -1.0)
        } else {
            let last = Utc
                .timestamp_millis_opt(last_ms as i64)
                .single()
                .unwrap_or(now);
            (
                last.to_rfc3339(),
                (now - last).num_milliseconds().max(0) as f64 / 1000.0,
            )
        };

        StatsSnapshot {
            uptime_seconds: uptime,
            total_packets,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            tcp_packets: self.tcp_packets.load(Ordering::Relaxed),
            udp_packets: self.udp_packets.load(Ordering::Relaxed),
            decode_drops: self.decode_drops.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            processed_events: self.processed_events.load(Ordering::Relaxed),
            packets_per_second: total_packets as f64 / uptime,
            last_packet_ago_seconds,
            last_packet_time,
        }
    }
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the capture counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub uptime_seconds: f64,
    pub total_packets: u64,
    pub total_bytes: u64,
    pub tcp_packets: u64,
    pub udp_packets: u64,
    pub decode_drops: u64,
    pub dropped_events: u64,
    pub processed_events: u64,
    pub packets_per_second: f64,
    pub last_packet_ago_seconds: f64,
    pub last_packet_time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = CaptureStats::new();
        stats.record_packet(64);
        stats.record_packet(1500);
        stats.record_tcp();
        stats.record_udp();
        stats.record_dropped();
        stats.record_processed();

        let snap = stats.snapshot();
        assert_eq!(snap.total_packets, 2);
        assert_eq!(snap.total_bytes, 1564);
        assert_eq!(snap.tcp_packets, 1);
        assert_eq!(snap.udp_packets, 1);
        assert_eq!(snap.dropped_events, 1);
        assert_eq!(snap.processed_events, 1);
    }

    #[test]
    fn test_bytes_at_least_packets() {
        let stats = CaptureStats::new();
        for _ in 0..100 {
            stats.record_packet(60);
        }
        let snap = stats.snapshot();
        assert!(snap.total_bytes >= snap.total_packets);
    }

    #[test]
    fn test_last_packet_never() {
        let snap = CaptureStats::new().snapshot();
        assert_eq!(snap.last_packet_time, "never");
        assert_eq!(snap.last_packet_ago_seconds, -1.0);
    }

    #[test]
    fn test_last_packet_recorded() {
        let stats = CaptureStats::new();
        stats.record_packet(64);
        let snap = stats.snapshot();
        assert_ne!(snap.last_packet_time, "never");
        assert!(snap.last_packet_ago_seconds >= 0.0);
    }
}
