//! Core data model shared by every pipeline stage

pub mod conversation;
pub mod event;

pub use conversation::{
    format_duration, Conversation, ConversationKey, ConversationState, ConversationStats,
    ConversationSummary, TcpConversationState,
};
pub use event::{
    AppProtocol, Direction, NetProtocol, NetworkEvent, TcpPacketFlags, TransportProtocol,
};
