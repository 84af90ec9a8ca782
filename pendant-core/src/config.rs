//! Reassembler configuration. Fixed at construction; durations are milliseconds in config files.

use std::time::Duration;

use serde::Deserialize;

use crate::packet::{DEFAULT_PACKET_SIZE, PACKET_HEADER_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReassemblerConfig {
    /// Packets with an index at or above this are dropped and their frame reported lost
    /// (default 20).
    #[serde(default = "default_max_packets_per_frame")]
    pub max_packets_per_frame: usize,
    /// Outbound packet size including the 3-byte header (default 320). Receiving does not depend
    /// on it: the end of a frame is detected from the sizes of the packets actually received.
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,
    /// Age after which an open frame is evicted (default 100 ms).
    #[serde(
        default = "default_frame_timeout",
        rename = "frame_timeout_ms",
        deserialize_with = "millis"
    )]
    pub frame_timeout: Duration,
    /// Report gaps at eviction as loss (default true). When off, gapped frames are dropped
    /// silently.
    #[serde(default = "default_enable_loss_detection")]
    pub enable_loss_detection: bool,
    /// Period of the host's eviction sweep (default 50 ms).
    #[serde(
        default = "default_sweep_interval",
        rename = "sweep_interval_ms",
        deserialize_with = "millis"
    )]
    pub sweep_interval: Duration,
}

fn default_max_packets_per_frame() -> usize {
    20
}
fn default_packet_size() -> usize {
    DEFAULT_PACKET_SIZE
}
fn default_frame_timeout() -> Duration {
    Duration::from_millis(100)
}
fn default_enable_loss_detection() -> bool {
    true
}
fn default_sweep_interval() -> Duration {
    Duration::from_millis(50)
}

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            max_packets_per_frame: default_max_packets_per_frame(),
            packet_size: default_packet_size(),
            frame_timeout: default_frame_timeout(),
            enable_loss_detection: default_enable_loss_detection(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("packet_size {0} leaves no room for audio after the 3-byte header")]
    PacketSizeTooSmall(usize),
    #[error("max_packets_per_frame must be greater than 0")]
    ZeroMaxPackets,
    #[error("frame timeout must be non-zero")]
    ZeroFrameTimeout,
    #[error("sweep interval must be non-zero")]
    ZeroSweepInterval,
}

impl ReassemblerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packet_size <= PACKET_HEADER_SIZE {
            return Err(ConfigError::PacketSizeTooSmall(self.packet_size));
        }
        if self.max_packets_per_frame == 0 {
            return Err(ConfigError::ZeroMaxPackets);
        }
        if self.frame_timeout.is_zero() {
            return Err(ConfigError::ZeroFrameTimeout);
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        Ok(())
    }

    /// Audio bytes in a full packet.
    pub fn packet_payload_size(&self) -> usize {
        self.packet_size.saturating_sub(PACKET_HEADER_SIZE)
    }

    /// Largest frame that fits in `max_packets_per_frame` full packets.
    pub fn max_frame_len(&self) -> usize {
        self.max_packets_per_frame.saturating_mul(self.packet_payload_size())
    }
}
