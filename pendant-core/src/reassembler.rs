//! Frame reassembly: collect indexed BLE packets per frame id, deliver complete frames, evict
//! stale ones.
//!
//! Per frame id: the first packet opens a frame, later packets are stored by index (duplicates
//! overwrite), and the frame completes as soon as it holds a gap-free run `0..=last` where `last`
//! is shorter than a full packet. The full-packet size is read off the frame's own earlier
//! packets, or, for a frame holding only its first packet, off the last multi-packet frame seen on
//! this link. It never comes from the configured packet size, since the sender's MTU may differ.
//! A frame that lost packets past the per-frame cap never completes.
//!
//! [`FrameReassembler::sweep_at`] evicts frames older than the frame timeout: frames with gaps are
//! reported lost, gap-free frames are delivered as they are (recovery).
//!
//! Frame ids are recycled by the device, so no entry outlives the timeout window.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::config::{ConfigError, ReassemblerConfig};
use crate::metrics::ReassemblyMetrics;
use crate::observer::{Observers, SubscriberError, Subscription};
use crate::packet::{self, BlePacket, PacketError};

const FRAME_ID_SLOTS: usize = u8::MAX as usize + 1;

/// A frame handed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFrame {
    pub frame_id: u8,
    /// Packet payloads concatenated in index order.
    pub data: Vec<u8>,
    pub packet_count: usize,
    /// True when delivered by timeout recovery rather than on completion.
    pub recovered: bool,
}

/// Gaps found when a frame was evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LossReport {
    pub frame_id: u8,
    /// Missing indices below the highest index seen, ascending. Indices dropped past the
    /// per-frame cap are included.
    pub lost_indices: Vec<u16>,
    pub received_packets: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyEvent {
    Complete(CompletedFrame),
    Loss(LossReport),
}

struct PartialFrame {
    packets: BTreeMap<u16, Vec<u8>>,
    /// Highest index dropped past the per-frame cap.
    overflow: Option<u16>,
    opened_at: Instant,
}

impl PartialFrame {
    fn new(now: Instant) -> Self {
        Self {
            packets: BTreeMap::new(),
            overflow: None,
            opened_at: now,
        }
    }

    fn max_index(&self) -> Option<u16> {
        self.packets.keys().next_back().copied()
    }

    /// Indices `0..max` have all arrived.
    fn is_contiguous(&self) -> bool {
        match self.max_index() {
            Some(max) => usize::from(max) + 1 == self.packets.len(),
            None => false,
        }
    }

    /// Largest payload among packets below the highest index: those are full packets.
    fn full_payload(&self) -> Option<usize> {
        let max = self.max_index()?;
        self.packets.range(..max).map(|(_, p)| p.len()).max()
    }

    /// `link_full` is the full-packet size last seen on the link, used until the frame has its own.
    fn is_complete(&self, link_full: Option<usize>) -> bool {
        if self.overflow.is_some() || !self.is_contiguous() {
            return false;
        }
        let Some(full) = self.full_payload().or(link_full) else {
            return false;
        };
        self.packets
            .values()
            .next_back()
            .is_some_and(|last| last.len() < full)
    }

    fn missing_indices(&self) -> Vec<u16> {
        let held = |i: &u16| !self.packets.contains_key(i);
        match (self.overflow, self.max_index()) {
            (Some(top), _) => (0..=top).filter(held).collect(),
            (None, Some(max)) => (0..max).filter(held).collect(),
            (None, None) => Vec::new(),
        }
    }

    fn assemble(self) -> (Vec<u8>, usize) {
        let count = self.packets.len();
        let len = self.packets.values().map(Vec::len).sum();
        let mut out = Vec::with_capacity(len);
        for payload in self.packets.into_values() {
            out.extend_from_slice(&payload);
        }
        (out, count)
    }
}

/// Reassembler for one connected device. Not shared across devices.
///
/// Callbacks run synchronously inside [`receive_packet_at`](Self::receive_packet_at) and
/// [`sweep_at`](Self::sweep_at) after the frame map has been updated; they must not call back into
/// the same reassembler.
pub struct FrameReassembler {
    config: ReassemblerConfig,
    /// Indexed by frame id.
    frames: Vec<Option<PartialFrame>>,
    active: usize,
    /// Full-packet payload size learned from the most recent multi-packet frame.
    link_full_payload: Option<usize>,
    metrics: ReassemblyMetrics,
    frame_observers: Observers<CompletedFrame>,
    loss_observers: Observers<LossReport>,
}

impl FrameReassembler {
    pub fn new(config: ReassemblerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            frames: (0..FRAME_ID_SLOTS).map(|_| None).collect(),
            active: 0,
            link_full_payload: None,
            metrics: ReassemblyMetrics::new(),
            frame_observers: Observers::new("frame_complete"),
            loss_observers: Observers::new("packet_loss"),
        })
    }

    pub fn config(&self) -> &ReassemblerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ReassemblyMetrics {
        &self.metrics
    }

    pub fn reset_metrics(&mut self) {
        self.metrics.reset();
    }

    pub fn is_healthy(&self) -> bool {
        self.metrics.is_healthy()
    }

    /// Frames currently accumulating.
    pub fn active_frames(&self) -> usize {
        self.active
    }

    pub fn on_frame_complete<F>(&mut self, callback: F) -> Subscription
    where
        F: FnMut(&CompletedFrame) -> Result<(), SubscriberError> + Send + 'static,
    {
        self.frame_observers.subscribe(callback)
    }

    pub fn on_packet_loss<F>(&mut self, callback: F) -> Subscription
    where
        F: FnMut(&LossReport) -> Result<(), SubscriberError> + Send + 'static,
    {
        self.loss_observers.subscribe(callback)
    }

    pub fn unsubscribe_frame_complete(&mut self, subscription: Subscription) -> bool {
        self.frame_observers.unsubscribe(subscription)
    }

    pub fn unsubscribe_packet_loss(&mut self, subscription: Subscription) -> bool {
        self.loss_observers.unsubscribe(subscription)
    }

    /// Split `data` for sending with this reassembler's packet size. Frames that would need more
    /// than `max_packets_per_frame` packets are refused, since the receiving side drops the excess.
    pub fn split_into_packets(
        &self,
        data: &[u8],
        frame_id: u8,
    ) -> Result<Vec<BlePacket>, PacketError> {
        let max = self.config.max_frame_len();
        if data.len() > max {
            return Err(PacketError::FrameTooLarge {
                len: data.len(),
                max,
            });
        }
        Ok(packet::split_into_packets(data, frame_id, self.config.packet_size))
    }

    pub fn receive_packet(&mut self, bytes: &[u8]) -> Option<CompletedFrame> {
        self.receive_packet_at(bytes, Instant::now())
    }

    /// Parse and insert one notification. Malformed packets are logged and dropped.
    pub fn receive_packet_at(&mut self, bytes: &[u8], now: Instant) -> Option<CompletedFrame> {
        match BlePacket::parse(bytes) {
            Ok(p) => self.insert_packet_at(p, now),
            Err(e) => {
                self.metrics.record_dropped();
                warn!(error = %e, "dropping malformed packet");
                None
            }
        }
    }

    /// Store a parsed packet; returns the frame if this packet completed it.
    pub fn insert_packet_at(&mut self, packet: BlePacket, now: Instant) -> Option<CompletedFrame> {
        let BlePacket {
            packet_index,
            frame_id,
            audio_data,
        } = packet;
        let cap = self.config.max_packets_per_frame;
        let slot = &mut self.frames[usize::from(frame_id)];
        if slot.is_none() {
            self.active += 1;
            self.metrics.record_frame_opened();
            trace!(frame_id, "frame opened");
        }
        let frame = slot.get_or_insert_with(|| PartialFrame::new(now));
        if usize::from(packet_index) >= cap {
            frame.overflow = frame.overflow.max(Some(packet_index));
            self.metrics.record_dropped();
            warn!(
                frame_id,
                packet_index,
                max = cap,
                "dropping packet beyond per-frame cap, frame will be reported lost"
            );
            return None;
        }
        frame.packets.insert(packet_index, audio_data);
        self.metrics.record_packet();
        trace!(frame_id, packet_index, held = frame.packets.len(), "packet stored");

        if !frame.is_complete(self.link_full_payload) {
            return None;
        }
        if let Some(full) = frame.full_payload() {
            self.link_full_payload = Some(full);
        }
        let frame = slot.take()?;
        self.active -= 1;
        let (data, packet_count) = frame.assemble();
        self.metrics.record_complete(packet_count);
        debug!(frame_id, packet_count, bytes = data.len(), "frame complete");
        let completed = CompletedFrame {
            frame_id,
            data,
            packet_count,
            recovered: false,
        };
        self.frame_observers.notify(&completed);
        Some(completed)
    }

    pub fn sweep(&mut self) -> Vec<ReassemblyEvent> {
        self.sweep_at(Instant::now())
    }

    /// Evict every frame older than the frame timeout.
    pub fn sweep_at(&mut self, now: Instant) -> Vec<ReassemblyEvent> {
        let timeout = self.config.frame_timeout;
        let mut events = Vec::new();
        for frame_id in 0..FRAME_ID_SLOTS {
            let slot = &mut self.frames[frame_id];
            let expired = slot
                .as_ref()
                .map(|f| now.saturating_duration_since(f.opened_at) > timeout)
                .unwrap_or(false);
            if !expired {
                continue;
            }
            let Some(frame) = slot.take() else {
                continue;
            };
            self.active -= 1;
            let frame_id = frame_id as u8;
            if let Some(full) = frame.full_payload() {
                self.link_full_payload = Some(full);
            }
            let lost_indices = frame.missing_indices();
            if lost_indices.is_empty() {
                let (data, packet_count) = frame.assemble();
                self.metrics.record_recovered(packet_count);
                debug!(frame_id, packet_count, "frame recovered at timeout");
                events.push(ReassemblyEvent::Complete(CompletedFrame {
                    frame_id,
                    data,
                    packet_count,
                    recovered: true,
                }));
            } else if self.config.enable_loss_detection {
                let received_packets = frame.packets.len();
                self.metrics.record_lost(received_packets, lost_indices.len());
                warn!(frame_id, lost = ?lost_indices, "frame lost");
                events.push(ReassemblyEvent::Loss(LossReport {
                    frame_id,
                    lost_indices,
                    received_packets,
                }));
            } else {
                self.metrics.record_lost(frame.packets.len(), 0);
                debug!(frame_id, "gapped frame discarded");
            }
        }
        for event in &events {
            match event {
                ReassemblyEvent::Complete(f) => {
                    self.frame_observers.notify(f);
                }
                ReassemblyEvent::Loss(l) => {
                    self.loss_observers.notify(l);
                }
            }
        }
        events
    }

    /// Drop all in-flight frames without reporting them and forget the learned packet size (the
    /// next connection may negotiate another MTU). Metrics and subscribers are kept.
    pub fn clear(&mut self) {
        if self.active > 0 {
            debug!(frames = self.active, "clearing in-flight frames");
        }
        self.frames.iter_mut().for_each(|slot| *slot = None);
        self.active = 0;
        self.link_full_payload = None;
    }
}

impl std::fmt::Debug for FrameReassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReassembler")
            .field("config", &self.config)
            .field("active", &self.active)
            .field("link_full_payload", &self.link_full_payload)
            .field("metrics", &self.metrics)
            .finish()
    }
}
