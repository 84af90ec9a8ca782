//! Frame sync: find Opus frames embedded in the continuous notification stream.
//!
//! Each audio record on the wire is envelope field 4 (`0x22`), a varint length, then the Opus
//! packet. Marker bytes also occur inside audio payloads, so a candidate is accepted only if its
//! length is plausible and the byte at the frame start is a known Opus TOC byte. Anything else is
//! skipped one byte at a time; malformed input never produces an error, only fewer frames.

use bytes::BytesMut;
use tracing::trace;

use crate::protocol::ENVELOPE_PAYLOAD_FIELD;
use crate::wire::{decode_varint, tag, varint_complete, WireType};

/// Marker preceding every embedded audio record.
pub const FRAME_MARKER: u8 = tag(ENVELOPE_PAYLOAD_FIELD, WireType::LengthDelimited) as u8;

/// Accepted frame length range, inclusive.
pub const MIN_FRAME_LEN: usize = 10;
pub const MAX_FRAME_LEN: usize = 200;

/// TOC bytes the pendant's encoder emits (SILK/CELT/hybrid configs at 16 kHz, mono and stereo).
pub const VALID_TOC_BYTES: [u8; 6] = [0xB8, 0x78, 0xF8, 0xB0, 0x70, 0xF0];

pub fn is_valid_toc(byte: u8) -> bool {
    VALID_TOC_BYTES.contains(&byte)
}

/// Result of one scan over a buffer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Accepted frames in stream order.
    pub frames: Vec<Vec<u8>>,
    /// End of the last accepted frame; 0 if none.
    pub consumed_up_to: usize,
    /// First plausible candidate at or after `consumed_up_to` that ran past the end of the buffer.
    pub pending_from: Option<usize>,
}

enum Candidate {
    Accept { start: usize, end: usize },
    NeedMore,
    Reject,
}

fn candidate_at(buffer: &[u8], marker: usize) -> Candidate {
    let len_pos = marker + 1;
    if !varint_complete(buffer, len_pos) {
        // Lengths above MAX_FRAME_LEN need at most two bytes; a longer unterminated run is noise.
        return if buffer.len() - len_pos < 2 {
            Candidate::NeedMore
        } else {
            Candidate::Reject
        };
    }
    let (length, start) = decode_varint(buffer, len_pos);
    let Ok(length) = usize::try_from(length) else {
        return Candidate::Reject;
    };
    if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&length) {
        return Candidate::Reject;
    }
    match buffer.get(start) {
        None => Candidate::NeedMore,
        Some(&toc) if !is_valid_toc(toc) => Candidate::Reject,
        Some(_) if start + length > buffer.len() => Candidate::NeedMore,
        Some(_) => Candidate::Accept {
            start,
            end: start + length,
        },
    }
}

/// Scan `buffer` for embedded frames. Pure; bounded by `buffer.len()`.
pub fn extract_frames(buffer: &[u8]) -> Extraction {
    let mut out = Extraction::default();
    let mut i = 0;
    while i < buffer.len() {
        if buffer[i] != FRAME_MARKER {
            i += 1;
            continue;
        }
        match candidate_at(buffer, i) {
            Candidate::Accept { start, end } => {
                out.frames.push(buffer[start..end].to_vec());
                out.consumed_up_to = end;
                out.pending_from = None;
                i = end;
            }
            Candidate::NeedMore => {
                if out.pending_from.is_none() {
                    out.pending_from = Some(i);
                }
                i += 1;
            }
            Candidate::Reject => {
                trace!(offset = i, "frame sync: rejected marker candidate");
                i += 1;
            }
        }
    }
    out
}

/// Accumulates notifications and yields frames as they complete.
///
/// After each scan the buffer keeps only the unconsumed tail: everything after the last accepted
/// frame, or, when nothing was accepted, the incomplete candidate still waiting for bytes.
/// With neither, the whole buffer is garbage and is dropped, so memory stays bounded on noise.
pub struct NotificationBuffer {
    buffer: BytesMut,
}

impl NotificationBuffer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Append one notification and return the frames now complete.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);
        let extraction = extract_frames(&self.buffer);
        if !extraction.frames.is_empty() {
            let _ = self.buffer.split_to(extraction.consumed_up_to);
        } else if let Some(pending) = extraction.pending_from {
            let _ = self.buffer.split_to(pending);
        } else {
            if !self.buffer.is_empty() {
                trace!(dropped = self.buffer.len(), "frame sync: no candidate, clearing buffer");
            }
            self.buffer.clear();
        }
        extraction.frames
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for NotificationBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn opus_frame(toc: u8, len: usize) -> Vec<u8> {
        let mut f = vec![toc];
        f.extend((1..len).map(|i| (i as u8).wrapping_mul(7) | 0x01));
        f
    }

    fn record(frame: &[u8]) -> Vec<u8> {
        crate::wire::encode_bytes_field(ENVELOPE_PAYLOAD_FIELD, frame)
    }

    #[test]
    fn marker_is_envelope_payload_tag() {
        assert_eq!(FRAME_MARKER, 0x22);
    }

    #[test]
    fn noisy_stream_scenario() {
        let a = opus_frame(0xB8, 10);
        let b = opus_frame(0x78, 12);
        let mut buf = vec![0x22, 0x0A];
        buf.extend(&a);
        buf.extend([0xFF, 0xFF, 0x22, 0x0C]);
        buf.extend(&b);

        let ex = extract_frames(&buf);
        assert_eq!(ex.frames, vec![a, b]);
        assert_eq!(ex.consumed_up_to, buf.len());
    }

    #[test]
    fn rejects_out_of_range_lengths() {
        let mut buf = vec![0x22, 9];
        buf.extend(opus_frame(0xB8, 9));
        let mut long = vec![0x22];
        long.extend(crate::wire::encode_varint(201));
        long.extend(opus_frame(0xB8, 201));
        buf.extend(long);
        let ex = extract_frames(&buf);
        assert!(ex.frames.is_empty());
        assert_eq!(ex.consumed_up_to, 0);
    }

    #[test]
    fn accepts_boundary_lengths() {
        let a = opus_frame(0xF0, MIN_FRAME_LEN);
        let b = opus_frame(0x70, MAX_FRAME_LEN);
        let mut buf = record(&a);
        buf.extend(record(&b));
        let ex = extract_frames(&buf);
        assert_eq!(ex.frames, vec![a, b]);
    }

    #[test]
    fn rejects_invalid_toc_then_resyncs() {
        let good = opus_frame(0xB0, 16);
        let mut buf = vec![0x22, 0x0A, 0x00];
        buf.extend(record(&good));
        let ex = extract_frames(&buf);
        assert_eq!(ex.frames, vec![good]);
    }

    #[test]
    fn garbage_between_frames_is_skipped() {
        let mut rng = rand::thread_rng();
        let a = opus_frame(0xB8, 40);
        let b = opus_frame(0xF8, 80);
        let (mut checked, mut with_markers) = (0, 0);
        for _ in 0..300 {
            let garbage_len = rng.gen_range(0..64);
            let garbage: Vec<u8> = (0..garbage_len)
                .map(|_| match rng.gen_range(0..16) {
                    0 | 1 => FRAME_MARKER,
                    2 => VALID_TOC_BYTES[rng.gen_range(0..VALID_TOC_BYTES.len())],
                    _ => rng.gen(),
                })
                .collect();
            let mut buf = record(&a);
            let start = buf.len();
            buf.extend(&garbage);
            buf.extend(record(&b));
            // Garbage that itself forms an acceptable record is a real frame, not noise.
            let forms_record = (start..start + garbage.len()).any(|i| {
                buf[i] == FRAME_MARKER && matches!(candidate_at(&buf, i), Candidate::Accept { .. })
            });
            if forms_record {
                continue;
            }
            checked += 1;
            if garbage.contains(&FRAME_MARKER) {
                with_markers += 1;
            }
            let ex = extract_frames(&buf);
            assert_eq!(ex.frames, vec![a.clone(), b.clone()], "garbage {garbage:02X?}");
        }
        assert!(checked >= 50, "only {checked} usable samples");
        assert!(with_markers > 0);
    }

    #[test]
    fn partial_frame_is_retained_until_complete() {
        let frame = opus_frame(0x78, 30);
        let rec = record(&frame);
        let mut nb = NotificationBuffer::new();
        assert!(nb.push(&rec[..12]).is_empty());
        assert_eq!(nb.len(), 12);
        let out = nb.push(&rec[12..]);
        assert_eq!(out, vec![frame]);
        assert!(nb.is_empty());
    }

    #[test]
    fn split_inside_length_varint() {
        let frame = opus_frame(0xB8, 150);
        let rec = record(&frame);
        assert_eq!(rec.len(), 153);
        let mut nb = NotificationBuffer::new();
        assert!(nb.push(&rec[..2]).is_empty());
        assert_eq!(nb.push(&rec[2..]), vec![frame]);
    }

    #[test]
    fn tail_after_last_frame_is_kept() {
        let a = opus_frame(0xB8, 20);
        let b = opus_frame(0x70, 20);
        let rec_b = record(&b);
        let mut first = record(&a);
        first.extend(&rec_b[..5]);
        let mut nb = NotificationBuffer::new();
        assert_eq!(nb.push(&first), vec![a]);
        assert_eq!(nb.len(), 5);
        assert_eq!(nb.push(&rec_b[5..]), vec![b]);
    }

    #[test]
    fn pure_garbage_is_dropped() {
        let mut nb = NotificationBuffer::new();
        assert!(nb.push(&[0x01, 0x02, 0x22, 0x05, 0xB8, 0xFF]).is_empty());
        assert!(nb.is_empty());
    }

    #[test]
    fn leading_garbage_before_partial_is_dropped() {
        let frame = opus_frame(0xF8, 50);
        let rec = record(&frame);
        let mut chunk = vec![0x00, 0x13, 0x37];
        chunk.extend(&rec[..20]);
        let mut nb = NotificationBuffer::new();
        assert!(nb.push(&chunk).is_empty());
        assert_eq!(nb.len(), 20);
        assert_eq!(nb.push(&rec[20..]), vec![frame]);
    }

    #[test]
    fn many_small_notifications() {
        let frames: Vec<Vec<u8>> = (0..10)
            .map(|i| opus_frame(VALID_TOC_BYTES[i % VALID_TOC_BYTES.len()], 20 + i * 7))
            .collect();
        let stream: Vec<u8> = frames.iter().flat_map(|f| record(f)).collect();
        let mut nb = NotificationBuffer::new();
        let mut got = Vec::new();
        for chunk in stream.chunks(9) {
            got.extend(nb.push(chunk));
        }
        assert_eq!(got, frames);
        assert!(nb.is_empty());
    }
}
