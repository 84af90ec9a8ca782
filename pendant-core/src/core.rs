//! Host-driven API: PendantCore receives BLE notifications and timer ticks, returns events and
//! writes.

use std::time::Instant;

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{ConfigError, ReassemblerConfig};
use crate::metrics::ReassemblyMetrics;
use crate::protocol::{CommandCodec, SessionCounters};
use crate::reassembler::{CompletedFrame, FrameReassembler, LossReport, ReassemblyEvent};
use crate::sync::NotificationBuffer;

/// How the connected device delivers audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Opus frames embedded in a continuous notification stream.
    #[default]
    Stream,
    /// Pre-segmented indexed packets.
    Packets,
}

/// Output for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A complete audio frame. `frame_id` is set for reassembled frames only.
    Frame {
        frame_id: Option<u8>,
        data: Vec<u8>,
        recovered: bool,
    },
    Loss(LossReport),
}

impl From<CompletedFrame> for Event {
    fn from(f: CompletedFrame) -> Self {
        Event::Frame {
            frame_id: Some(f.frame_id),
            data: f.data,
            recovered: f.recovered,
        }
    }
}

impl From<ReassemblyEvent> for Event {
    fn from(e: ReassemblyEvent) -> Self {
        match e {
            ReassemblyEvent::Complete(f) => f.into(),
            ReassemblyEvent::Loss(l) => Event::Loss(l),
        }
    }
}

/// One connected pendant. Host passes notifications and ticks; core returns events and command
/// bytes.
pub struct PendantCore {
    mode: TransportMode,
    codec: CommandCodec,
    stream: NotificationBuffer,
    reassembler: FrameReassembler,
}

impl PendantCore {
    pub fn new(mode: TransportMode, config: ReassemblerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            mode,
            codec: CommandCodec::new(),
            stream: NotificationBuffer::new(),
            reassembler: FrameReassembler::new(config)?,
        })
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn counters(&self) -> &SessionCounters {
        self.codec.counters()
    }

    pub fn codec_mut(&mut self) -> &mut CommandCodec {
        &mut self.codec
    }

    /// Reassembler, e.g. to subscribe to frame and loss events.
    pub fn reassembler_mut(&mut self) -> &mut FrameReassembler {
        &mut self.reassembler
    }

    pub fn reassembler(&self) -> &FrameReassembler {
        &self.reassembler
    }

    pub fn metrics(&self) -> &ReassemblyMetrics {
        self.reassembler.metrics()
    }

    pub fn is_healthy(&self) -> bool {
        self.reassembler.is_healthy()
    }

    /// Bytes waiting in the stream buffer for the rest of a frame.
    pub fn buffered_bytes(&self) -> usize {
        self.stream.len()
    }

    /// Writes to send after connecting: set the clock, then enable the audio stream.
    pub fn start_stream(&mut self, unix_ms: u64) -> Vec<Vec<u8>> {
        info!(mode = ?self.mode, "starting audio stream");
        vec![
            self.codec.encode_set_current_time(unix_ms),
            self.codec.encode_enable_data_stream(true),
        ]
    }

    pub fn stop_stream(&mut self) -> Vec<u8> {
        info!("stopping audio stream");
        self.codec.encode_enable_data_stream(false)
    }

    pub fn acknowledge_data(&mut self, up_to_index: u64) -> Vec<u8> {
        self.codec.encode_acknowledge_data(up_to_index)
    }

    pub fn get_device_status(&mut self) -> Vec<u8> {
        self.codec.encode_get_device_status()
    }

    pub fn download_flash_pages(&mut self, batch_mode: bool, real_time: bool) -> Vec<u8> {
        self.codec.encode_download_flash_pages(batch_mode, real_time)
    }

    pub fn on_notification(&mut self, data: &[u8]) -> Vec<Event> {
        self.on_notification_at(data, Instant::now())
    }

    /// Feed one BLE notification. Malformed input yields no events, never an error.
    pub fn on_notification_at(&mut self, data: &[u8], now: Instant) -> Vec<Event> {
        match self.mode {
            TransportMode::Stream => self
                .stream
                .push(data)
                .into_iter()
                .map(|data| Event::Frame {
                    frame_id: None,
                    data,
                    recovered: false,
                })
                .collect(),
            TransportMode::Packets => self
                .reassembler
                .receive_packet_at(data, now)
                .into_iter()
                .map(Event::from)
                .collect(),
        }
    }

    pub fn tick(&mut self) -> Vec<Event> {
        self.tick_at(Instant::now())
    }

    /// Periodic sweep: evict timed-out frames.
    pub fn tick_at(&mut self, now: Instant) -> Vec<Event> {
        self.reassembler
            .sweep_at(now)
            .into_iter()
            .map(Event::from)
            .collect()
    }

    /// Disconnect/reconnect: drop buffered bytes and in-flight frames, zero the codec counters.
    /// Metrics and subscribers survive.
    pub fn reset(&mut self) {
        debug!(
            buffered = self.stream.len(),
            in_flight = self.reassembler.active_frames(),
            "resetting session"
        );
        self.stream.clear();
        self.reassembler.clear();
        self.codec.reset();
    }
}
