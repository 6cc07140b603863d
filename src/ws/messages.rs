//! Wire messages
//!
//! Everything crossing the subscriber socket is a JSON object with a
//! `type` discriminator and an optional `data` payload.

use serde::{Deserialize, Serialize};

use crate::core::{Conversation, ConversationSummary, NetworkEvent};

/// Daemon -> subscriber messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Every decoded packet
    NetworkEvent(NetworkEvent),
    /// Pushed after any flow mutation
    ConversationUpdate(Conversation),
    /// Reply to `get_conversations`
    Conversations(Vec<Conversation>),
    /// Reply to `get_conversation_summaries`
    ConversationSummaries(Vec<ConversationSummary>),
    /// Reply to `get_conversation`
    Conversation(Conversation),
}

/// Subscriber -> daemon commands. Unknown or malformed input is
/// silently ignored by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Command {
    GetConversations,
    GetConversationSummaries,
    GetConversation { id: String },
}
