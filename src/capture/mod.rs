//! Packet ingest and decode
//!
//! Raw frames come in through a `PacketSource`, are decoded into
//! `NetworkEvent`s, and counted in `CaptureStats` along the way.

pub mod decode;
pub mod source;
pub mod stats;

pub use decode::PacketDecoder;
pub use source::{
    interface_addresses, list_interfaces, PacketSource, PcapSource, RawFrame, SourceCloser,
};
pub use stats::{CaptureStats, StatsSnapshot};
