//! BLE audio transport engine for wearable capture pendants.
//! Host-driven: no I/O; host passes notifications and timer ticks, receives frames and command
//! writes.

pub mod config;
pub mod metrics;
pub mod observer;
pub mod packet;
pub mod protocol;
pub mod reassembler;
pub mod sync;
pub mod wire;

pub mod core;
pub mod ffi;

pub use config::{ConfigError, ReassemblerConfig};
pub use crate::core::{Event, PendantCore, TransportMode};
pub use metrics::ReassemblyMetrics;
pub use observer::{Observers, SubscriberError, Subscription};
pub use packet::{split_into_packets, BlePacket, PacketError};
pub use protocol::{CommandCodec, SessionCounters};
pub use reassembler::{CompletedFrame, FrameReassembler, LossReport, ReassemblyEvent};
pub use sync::{extract_frames, Extraction, NotificationBuffer};
