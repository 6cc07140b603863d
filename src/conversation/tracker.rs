//! Flow table with TCP state machine and eviction
//!
//! Single writer: `process_event` and the sweep serialize on the
//! table lock. Snapshot accessors take the shared side and return
//! owned copies, never references into the table.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::core::{
    Conversation, ConversationKey, ConversationState, ConversationSummary, NetworkEvent,
    TransportProtocol,
};

use super::{service_for_port, TrackerConfig};

#[derive(Default)]
struct Table {
    conversations: HashMap<String, Conversation>,
    key_to_id: HashMap<ConversationKey, String>,
}

/// Tracks bidirectional conversations keyed by canonical 5-tuple
pub struct ConversationTracker {
    table: RwLock<Table>,
    local_ips: HashSet<IpAddr>,
    config: TrackerConfig,
}

impl ConversationTracker {
    pub fn new(local_ips: HashSet<IpAddr>, config: TrackerConfig) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            local_ips,
            config,
        }
    }

    /// Fold an event into its conversation, creating one on first
    /// sight of the canonical key, and stamp the event with the
    /// conversation id.
    pub fn process_event(&self, event: &mut NetworkEvent) {
        let key = ConversationKey::from_event(event).canonicalize();
        let mut table = self.table.write();

        // A closed flow never revives: the next packet on the same
        // 5-tuple starts a fresh conversation.
        let existing = table
            .key_to_id
            .get(&key)
            .filter(|id| {
                table
                    .conversations
                    .get(*id)
                    .map(|c| c.state != ConversationState::Closed)
                    .unwrap_or(false)
            })
            .cloned();

        let id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                let conv = Conversation::new(id.clone(), key.clone(), event);
                table.conversations.insert(id.clone(), conv);
                table.key_to_id.insert(key.clone(), id.clone());
                id
            }
        };

        event.conversation_id = Some(id.clone());

        let local_ips = &self.local_ips;
        let Some(conv) = table.conversations.get_mut(&id) else {
            return;
        };

        update_stats(conv, event, local_ips);
        if event.is_tcp() && event.tcp_flags.is_some() {
            update_tcp_state(conv, event, &key);
        }
        detect_service(conv, event);

        if conv.hostname.is_none() {
            if let Some(sni) = &event.tls_server_name {
                conv.hostname = Some(sni.clone());
            }
        }
    }

    /// Close idle flows and drop long-dead entries. Runs on the sweep
    /// cadence; `now` is injectable for tests.
    pub fn sweep_at(&self, now: DateTime<Utc>) {
        let mut table = self.table.write();
        let mut evict = Vec::new();

        for (id, conv) in table.conversations.iter_mut() {
            let timeout = match conv.key.protocol {
                TransportProtocol::Tcp => Duration::seconds(self.config.tcp_timeout_secs as i64),
                TransportProtocol::Udp => Duration::seconds(self.config.udp_timeout_secs as i64),
            };
            let last = conv.stats.last_activity.unwrap_or(conv.start_time);
            let idle = now.signed_duration_since(last);

            if idle > timeout {
                if conv.state != ConversationState::Closed {
                    conv.state = ConversationState::Closed;
                    conv.end_time = Some(now);
                }
                if idle > Duration::seconds(self.config.evict_after_secs as i64) {
                    evict.push(id.clone());
                }
            }
        }

        for id in evict {
            if let Some(conv) = table.conversations.remove(&id) {
                // The key may already point at a successor flow
                if table.key_to_id.get(&conv.key) == Some(&id) {
                    table.key_to_id.remove(&conv.key);
                }
                debug!(id = %id, key = %conv.key, "evicted stale conversation");
            }
        }
    }

    pub fn sweep(&self) {
        self.sweep_at(Utc::now());
    }

    /// Periodic sweep task; runs until the handle is dropped
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = StdDuration::from_secs(self.config.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }

    /// Conversation by id, as an owned copy
    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.table.read().conversations.get(id).cloned()
    }

    /// Flows still in NEW or ESTABLISHED state
    pub fn active(&self) -> Vec<Conversation> {
        self.table
            .read()
            .conversations
            .values()
            .filter(|c| c.is_active())
            .cloned()
            .collect()
    }

    /// Every current entry, closed ones included
    pub fn all(&self) -> Vec<Conversation> {
        self.table.read().conversations.values().cloned().collect()
    }

    /// Compact per-flow records with the local side resolved against
    /// the host's IP set
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.table
            .read()
            .conversations
            .values()
            .map(|c| c.to_summary(&self.local_ips))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().conversations.is_empty()
    }
}

fn update_stats(conv: &mut Conversation, event: &NetworkEvent, local_ips: &HashSet<IpAddr>) {
    conv.stats.last_activity = Some(event.timestamp);

    // Direction relative to the host, judged by the raw packet source
    let outgoing = local_ips.contains(&event.source_ip);
    if outgoing {
        conv.stats.packets_out += 1;
        conv.stats.bytes_out += event.size as u64;
    } else {
        conv.stats.packets_in += 1;
        conv.stats.bytes_in += event.size as u64;
    }
}

fn update_tcp_state(conv: &mut Conversation, event: &NetworkEvent, key: &ConversationKey) {
    let Some(flags) = event.tcp_flags else { return };

    // The canonical key's first endpoint is the "client" side
    let is_client = event.source_ip == key.src_ip && event.source_port == key.src_port;
    let seq = event.seq_number.unwrap_or(0);

    let mut established = false;
    let mut closing = false;
    let mut reset = false;

    {
        let tcp = conv.tcp_state.get_or_insert_with(Default::default);

        if flags.syn && !flags.ack {
            tcp.syn_seen = true;
            if is_client {
                tcp.initial_seq_client = seq;
            } else {
                tcp.initial_seq_server = seq;
            }
        }

        if flags.syn && flags.ack {
            tcp.syn_ack_seen = true;
            if !is_client {
                tcp.initial_seq_server = seq;
            }
        }

        // First pure ACK after both SYNs completes the handshake
        if flags.ack && !flags.syn && tcp.syn_seen && tcp.syn_ack_seen && !tcp.ack_seen {
            tcp.ack_seen = true;
            established = true;
        }

        if is_client {
            tcp.last_seq_client = seq;
        } else {
            tcp.last_seq_server = seq;
        }

        if flags.fin {
            if is_client {
                tcp.fin_seen_client = true;
            } else {
                tcp.fin_seen_server = true;
            }
            closing = true;
        }

        if flags.rst {
            tcp.rst_seen = true;
            reset = true;
        }
    }

    if established {
        conv.advance_state(ConversationState::Established);
    }
    if closing {
        conv.advance_state(ConversationState::Closing);
    }
    if reset {
        conv.advance_state(ConversationState::Closed);
        if conv.end_time.is_none() {
            conv.end_time = Some(event.timestamp);
        }
    }
}

/// Label the flow on first sight from the destination (preferred) or
/// source port. An observed app protocol overrides the port-derived
/// label exactly once; later events never rewrite it.
fn detect_service(conv: &mut Conversation, event: &NetworkEvent) {
    if conv.service.is_none() {
        conv.service = service_for_port(event.dest_port)
            .or_else(|| service_for_port(event.source_port))
            .map(str::to_string);
    }

    if let Some(app) = event.app_protocol {
        if !conv.service_locked {
            conv.service = Some(app.to_string());
            conv.service_locked = true;
        }
    }
}
