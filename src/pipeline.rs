//! Pipeline supervisor
//!
//! Wires capture -> decode -> tracker -> hub and owns the task
//! topology. Shutdown closes the capture source, which drains the
//! decode loop, which closes the event channel, which drains the
//! relay; the hub then closes every subscriber queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::capture::{CaptureStats, PacketDecoder, PacketSource, PcapSource};
use crate::config::Config;
use crate::conversation::ConversationTracker;
use crate::core::{NetworkEvent, TransportProtocol};
use crate::resolver::DnsCache;
use crate::ws::{self, Hub, ServerState};

/// Run the daemon until a shutdown signal arrives
pub async fn run(config: Config) -> Result<()> {
    let stats = Arc::new(CaptureStats::new());
    let resolver = Arc::new(DnsCache::new(Duration::from_secs(config.dns.ttl_secs)));
    let tracker = Arc::new(ConversationTracker::new(
        config.local_ip_set(),
        config.tracker.clone(),
    ));
    let hub = Arc::new(Hub::new(Arc::clone(&tracker), Arc::clone(&stats)));

    // Startup failures (bad interface, bad filter, busy port) are fatal
    let source = PcapSource::open(&config.capture.interface, config.capture.filter.as_deref())?;
    let closer = source.closer();

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.server.port))?;
    info!(port = config.server.port, "subscriber endpoint listening");

    let cleanup_task = Arc::clone(&resolver)
        .spawn_cleanup(Duration::from_secs(config.dns.cleanup_interval_secs));
    let sweep_task = Arc::clone(&tracker).spawn_sweeper();

    let server_state = Arc::new(ServerState {
        hub: Arc::clone(&hub),
        tracker: Arc::clone(&tracker),
        stats: Arc::clone(&stats),
    });
    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, ws::router(server_state)).await {
            warn!(error = %e, "server stopped");
        }
    });

    let (event_tx, event_rx) = mpsc::channel(config.capture.event_buffer);
    let decoder = PacketDecoder::new(&config.capture.interface, Arc::clone(&resolver));

    let capture_task = {
        let tracker = Arc::clone(&tracker);
        let stats = Arc::clone(&stats);
        tokio::task::spawn_blocking(move || capture_loop(source, decoder, tracker, stats, event_tx))
    };
    let relay_task = tokio::spawn(relay_loop(event_rx, Arc::clone(&hub)));
    info!(interface = %config.capture.interface, "capture started");

    shutdown_signal().await;
    info!("shutting down");

    // Closing the source unblocks the capture loop; it drops the
    // event sender, which lets the relay drain and return.
    closer.close();
    capture_task.await.context("capture task panicked")?;
    relay_task.await.context("relay task panicked")?;

    hub.close_all();
    server_task.abort();
    sweep_task.abort();
    cleanup_task.abort();

    let snapshot = stats.snapshot();
    info!(
        packets = snapshot.total_packets,
        events = snapshot.processed_events,
        dropped = snapshot.dropped_events,
        "capture finished"
    );
    Ok(())
}

/// Blocking loop on the capture handle: decode, track, enqueue.
/// Sends never block; a full event channel drops the event and
/// counts it.
fn capture_loop(
    mut source: impl PacketSource,
    decoder: PacketDecoder,
    tracker: Arc<ConversationTracker>,
    stats: Arc<CaptureStats>,
    event_tx: mpsc::Sender<NetworkEvent>,
) {
    loop {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                // Treated as end-of-stream; the supervisor decides
                // whether that ends the daemon
                warn!(error = %e, "capture read failed");
                break;
            }
        };

        stats.record_packet(frame.data.len() as u64);

        let Some(mut event) = decoder.decode(&frame.data) else {
            stats.record_decode_drop();
            continue;
        };
        match event.transport_protocol {
            TransportProtocol::Tcp => stats.record_tcp(),
            TransportProtocol::Udp => stats.record_udp(),
        }

        tracker.process_event(&mut event);

        match event_tx.try_send(event) {
            Ok(()) => stats.record_processed(),
            Err(TrySendError::Full(_)) => stats.record_dropped(),
            Err(TrySendError::Closed(_)) => break,
        }
    }
    source.close();
    debug!("capture loop finished");
}

/// Forward events to the hub, trailed by the flow update for the
/// conversation each event touched.
async fn relay_loop(mut event_rx: mpsc::Receiver<NetworkEvent>, hub: Arc<Hub>) {
    while let Some(event) = event_rx.recv().await {
        let conversation_id = event.conversation_id.clone();
        hub.broadcast_event(event);
        if let Some(id) = conversation_id {
            hub.broadcast_conversation_update(&id);
        }
    }
    debug!("relay loop finished");
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::decode::frames::{tcp_frame, udp_frame};
    use crate::capture::source::testing::MemorySource;
    use crate::conversation::TrackerConfig;
    use std::collections::HashSet;

    const SYN: u8 = 0x02;
    const SYN_ACK: u8 = 0x12;
    const ACK: u8 = 0x10;

    struct Fixture {
        tracker: Arc<ConversationTracker>,
        hub: Arc<Hub>,
        stats: Arc<CaptureStats>,
    }

    fn fixture() -> Fixture {
        let mut local_ips = HashSet::new();
        local_ips.insert("10.0.0.1".parse().unwrap());
        let tracker = Arc::new(ConversationTracker::new(local_ips, TrackerConfig::default()));
        let stats = Arc::new(CaptureStats::new());
        let hub = Arc::new(Hub::new(Arc::clone(&tracker), Arc::clone(&stats)));
        Fixture { tracker, hub, stats }
    }

    /// Drive frames through the full capture -> relay path and
    /// return the messages one subscriber saw.
    async fn run_pipeline(fx: &Fixture, frames: Vec<Vec<u8>>) -> Vec<serde_json::Value> {
        let resolver = Arc::new(DnsCache::new(Duration::from_secs(300)));
        let decoder = PacketDecoder::new("test0", resolver);
        let (event_tx, event_rx) = mpsc::channel(1024);

        let mut subscriber = fx.hub.subscribe();

        let source = MemorySource::new(frames);
        let tracker = Arc::clone(&fx.tracker);
        let stats = Arc::clone(&fx.stats);
        let capture = tokio::task::spawn_blocking(move || {
            capture_loop(source, decoder, tracker, stats, event_tx)
        });
        let relay = tokio::spawn(relay_loop(event_rx, Arc::clone(&fx.hub)));

        capture.await.unwrap();
        relay.await.unwrap();
        fx.hub.close_all();

        let mut messages = Vec::new();
        while let Some(json) = subscriber.rx.recv().await {
            messages.push(serde_json::from_str(&json).unwrap());
        }
        messages
    }

    #[tokio::test]
    async fn test_handshake_end_to_end() {
        let fx = fixture();
        let frames = vec![
            tcp_frame([10, 0, 0, 1], 40000, [93, 184, 216, 34], 443, SYN, 100, 0, &[]),
            tcp_frame([93, 184, 216, 34], 443, [10, 0, 0, 1], 40000, SYN_ACK, 200, 101, &[]),
            tcp_frame([10, 0, 0, 1], 40000, [93, 184, 216, 34], 443, ACK, 101, 201, &[]),
        ];

        let messages = run_pipeline(&fx, frames).await;

        // Each packet yields an event plus a conversation update
        assert_eq!(messages.len(), 6);

        let events: Vec<_> = messages
            .iter()
            .filter(|m| m["type"] == "network_event")
            .collect();
        assert_eq!(events.len(), 3);

        // Every event downstream of the tracker carries the same id
        let id = events[0]["data"]["conversation_id"].as_str().unwrap();
        assert!(!id.is_empty());
        for event in &events {
            assert_eq!(event["data"]["conversation_id"], id);
        }

        let updates: Vec<_> = messages
            .iter()
            .filter(|m| m["type"] == "conversation_update")
            .collect();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[2]["data"]["state"], "ESTABLISHED");
        assert_eq!(updates[2]["data"]["stats"]["packets_out"], 2);
        assert_eq!(updates[2]["data"]["stats"]["packets_in"], 1);

        let conv = fx.tracker.get(id).unwrap();
        assert_eq!(conv.stats.packets_out, 2);
        assert_eq!(conv.stats.packets_in, 1);
    }

    #[tokio::test]
    async fn test_undecodable_frames_are_counted_and_skipped() {
        let fx = fixture();
        let frames = vec![
            vec![0u8; 4], // junk
            udp_frame([10, 0, 0, 1], 53123, [8, 8, 8, 8], 53, &[0u8; 16]),
        ];

        let messages = run_pipeline(&fx, frames).await;
        let snapshot = fx.stats.snapshot();

        assert_eq!(snapshot.total_packets, 2);
        assert_eq!(snapshot.decode_drops, 1);
        assert_eq!(snapshot.udp_packets, 1);
        assert_eq!(snapshot.processed_events, 1);

        let events: Vec<_> = messages
            .iter()
            .filter(|m| m["type"] == "network_event")
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["data"]["app_protocol"], "DNS");
    }

    #[tokio::test]
    async fn test_events_arrive_in_capture_order() {
        let fx = fixture();
        let frames: Vec<_> = (0..50)
            .map(|n| {
                tcp_frame([10, 0, 0, 1], 40000, [93, 184, 216, 34], 443, ACK, n, 0, &[])
            })
            .collect();

        let messages = run_pipeline(&fx, frames).await;
        let seqs: Vec<_> = messages
            .iter()
            .filter(|m| m["type"] == "network_event")
            .map(|m| m["data"]["seq_number"].as_u64().unwrap())
            .collect();

        assert_eq!(seqs, (0..50).collect::<Vec<u64>>());
    }
}
