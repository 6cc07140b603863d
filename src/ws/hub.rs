//! Subscriber fan-out
//!
//! Each subscriber owns a bounded queue; broadcasts use try-send so a
//! stalled consumer is detached instead of stalling the pipeline.
//! Command replies go only to the requesting subscriber's queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::capture::CaptureStats;
use crate::conversation::ConversationTracker;
use crate::core::NetworkEvent;

use super::messages::{Command, OutboundMessage};

/// Outbound queue capacity per subscriber
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// A subscriber's receiving half. The queue closes when the hub
/// detaches the subscriber.
pub struct Subscriber {
    pub id: u64,
    pub rx: mpsc::Receiver<String>,
}

/// Broadcasts events and flow updates to every attached subscriber
pub struct Hub {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    tracker: Arc<ConversationTracker>,
    stats: Arc<CaptureStats>,
}

impl Hub {
    pub fn new(tracker: Arc<ConversationTracker>, stats: Arc<CaptureStats>) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            tracker,
            stats,
        }
    }

    /// Attach a subscriber with a fresh bounded queue
    pub fn subscribe(&self) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        self.subscribers.write().insert(id, tx);
        debug!(id, total = self.client_count(), "subscriber attached");
        Subscriber { id, rx }
    }

    /// Detach a subscriber, closing its queue. Safe to call twice.
    pub fn unsubscribe(&self, id: u64) {
        if self.subscribers.write().remove(&id).is_some() {
            debug!(id, total = self.client_count(), "subscriber detached");
        }
    }

    pub fn client_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Broadcast one decoded event to every subscriber
    pub fn broadcast_event(&self, event: NetworkEvent) {
        self.broadcast(&OutboundMessage::NetworkEvent(event));
    }

    /// Broadcast the current state of a conversation after a
    /// mutation. Unknown ids are ignored.
    pub fn broadcast_conversation_update(&self, conversation_id: &str) {
        if let Some(conv) = self.tracker.get(conversation_id) {
            self.broadcast(&OutboundMessage::ConversationUpdate(conv));
        }
    }

    fn broadcast(&self, message: &OutboundMessage) {
        let Ok(json) = serde_json::to_string(message) else {
            warn!("failed to serialize outbound message");
            return;
        };

        let mut stale = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, tx) in subscribers.iter() {
                match tx.try_send(json.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.stats.record_dropped();
                        stale.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => stale.push(*id),
                }
            }
        }

        // A full queue means the consumer is not keeping up; drop it
        // rather than block everyone else.
        for id in stale {
            warn!(id, "subscriber queue full, detaching");
            self.unsubscribe(id);
        }
    }

    /// Handle one inbound command frame from a subscriber. Malformed
    /// input is ignored; replies go only to the caller's queue.
    pub fn handle_command(&self, subscriber_id: u64, raw: &str) {
        let Ok(command) = serde_json::from_str::<Command>(raw) else {
            return;
        };

        let reply = match command {
            Command::GetConversations => OutboundMessage::Conversations(self.tracker.active()),
            Command::GetConversationSummaries => {
                OutboundMessage::ConversationSummaries(self.tracker.summaries())
            }
            Command::GetConversation { id } => match self.tracker.get(&id) {
                Some(conv) => OutboundMessage::Conversation(conv),
                // No reply for an unknown conversation
                None => return,
            },
        };

        self.send_to(subscriber_id, &reply);
    }

    fn send_to(&self, subscriber_id: u64, message: &OutboundMessage) {
        let Ok(json) = serde_json::to_string(message) else {
            return;
        };

        let full = {
            let subscribers = self.subscribers.read();
            match subscribers.get(&subscriber_id) {
                Some(tx) => tx.try_send(json).is_err(),
                None => false,
            }
        };
        if full {
            warn!(id = subscriber_id, "subscriber queue full, detaching");
            self.unsubscribe(subscriber_id);
        }
    }

    /// Detach every subscriber, closing all queues
    pub fn close_all(&self) {
        let count = {
            let mut subscribers = self.subscribers.write();
            let count = subscribers.len();
            subscribers.clear();
            count
        };
        if count > 0 {
            debug!(count, "closed all subscriber queues");
        }
    }
}
