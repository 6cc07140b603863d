//! netwatch — real-time network traffic monitoring daemon
//!
//! Captures packets on a host interface, aggregates them into
//! bidirectional conversations, and streams per-packet events plus
//! flow updates to WebSocket subscribers such as the terminal viewer.

pub mod capture;
pub mod config;
pub mod conversation;
pub mod core;
pub mod pipeline;
pub mod resolver;
pub mod tls;
pub mod ws;

pub use crate::config::Config;
pub use crate::conversation::{ConversationTracker, TrackerConfig};
pub use crate::core::{Conversation, ConversationKey, ConversationState, NetworkEvent};
pub use crate::resolver::DnsCache;
pub use crate::ws::{Hub, OutboundMessage};
