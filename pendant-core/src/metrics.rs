//! Reassembly counters and stream health.

/// Completion rate above which a stream counts as healthy.
pub const HEALTHY_COMPLETION_RATE: f64 = 0.95;
/// Loss rate below which a stream counts as healthy.
pub const HEALTHY_LOSS_RATE: f64 = 0.05;

/// Cumulative counters. Only ever grow, except through [`ReassemblyMetrics::reset`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReassemblyMetrics {
    /// Frames opened (first packet of a frame id not currently in flight).
    pub frames_received: u64,
    /// Frames delivered, synchronously or by timeout recovery.
    pub frames_complete: u64,
    /// Frames evicted with gaps.
    pub frames_incomplete: u64,
    /// Subset of `frames_complete` delivered by timeout recovery.
    pub frames_recovered: u64,
    /// Packets stored into a frame.
    pub packets_received: u64,
    /// Missing indices reported at eviction.
    pub packets_lost: u64,
    /// Packets delivered through timeout recovery.
    pub packets_recovered: u64,
    /// Packets discarded on receipt (short header or index over the per-frame cap).
    pub packets_dropped: u64,
    /// Running mean of packets held per finished frame.
    pub average_packets_per_frame: f64,
    finished_frames: u64,
}

impl ReassemblyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_frame_opened(&mut self) {
        self.frames_received += 1;
    }

    pub(crate) fn record_packet(&mut self) {
        self.packets_received += 1;
    }

    pub(crate) fn record_dropped(&mut self) {
        self.packets_dropped += 1;
    }

    pub(crate) fn record_complete(&mut self, packets: usize) {
        self.frames_complete += 1;
        self.record_finished(packets);
    }

    pub(crate) fn record_recovered(&mut self, packets: usize) {
        self.frames_complete += 1;
        self.frames_recovered += 1;
        self.packets_recovered += packets as u64;
        self.record_finished(packets);
    }

    pub(crate) fn record_lost(&mut self, held: usize, lost: usize) {
        self.frames_incomplete += 1;
        self.packets_lost += lost as u64;
        self.record_finished(held);
    }

    fn record_finished(&mut self, packets: usize) {
        self.finished_frames += 1;
        let n = self.finished_frames as f64;
        self.average_packets_per_frame += (packets as f64 - self.average_packets_per_frame) / n;
    }

    /// `complete / (complete + incomplete)`; 1.0 before any frame finished.
    pub fn completion_rate(&self) -> f64 {
        let total = self.frames_complete + self.frames_incomplete;
        if total == 0 {
            return 1.0;
        }
        self.frames_complete as f64 / total as f64
    }

    /// Lost packets over the estimated total sent (received + lost); 0.0 before any packet.
    pub fn loss_rate(&self) -> f64 {
        let total = self.packets_received + self.packets_lost;
        if total == 0 {
            return 0.0;
        }
        self.packets_lost as f64 / total as f64
    }

    /// Healthy iff completion rate > 0.95 and loss rate < 0.05.
    pub fn is_healthy(&self) -> bool {
        self.completion_rate() > HEALTHY_COMPLETION_RATE && self.loss_rate() < HEALTHY_LOSS_RATE
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
