//! BLE packets: `[packet_index: u16 LE][frame_id: u8][audio bytes]`. Split a frame for sending,
//! parse on receipt.

/// Header bytes reserved at the front of every packet.
pub const PACKET_HEADER_SIZE: usize = 3;

/// Default packet size in bytes, header included (BLE MTU-bounded).
pub const DEFAULT_PACKET_SIZE: usize = 320;

/// One indexed slice of an audio frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlePacket {
    /// Position within the frame, starting at 0.
    pub packet_index: u16,
    /// Sender-assigned frame id. Recycled by the device, so only unique within a timeout window.
    pub frame_id: u8,
    pub audio_data: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet too short: {0} bytes, need at least 3")]
    TooShort(usize),
    #[error("frame of {len} bytes exceeds the {max}-byte per-frame limit")]
    FrameTooLarge { len: usize, max: usize },
}

impl BlePacket {
    /// Parse a notification payload. Anything after the 3-byte header is audio data.
    pub fn parse(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(PacketError::TooShort(bytes.len()));
        }
        Ok(Self {
            packet_index: u16::from_le_bytes([bytes[0], bytes[1]]),
            frame_id: bytes[2],
            audio_data: bytes[PACKET_HEADER_SIZE..].to_vec(),
        })
    }

    /// Wire form: header followed by audio data.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PACKET_HEADER_SIZE + self.audio_data.len());
        out.extend_from_slice(&self.packet_index.to_le_bytes());
        out.push(self.frame_id);
        out.extend_from_slice(&self.audio_data);
        out
    }
}

/// Bytes of audio each packet carries for a given packet size. At least 1.
pub fn payload_capacity(packet_size: usize) -> usize {
    packet_size.saturating_sub(PACKET_HEADER_SIZE).max(1)
}

/// Split `data` into packets of at most `packet_size` bytes (header included), numbered from 0.
/// Empty data yields no packets. Packet indices wrap past `u16::MAX`; callers keep frames far
/// smaller.
pub fn split_into_packets(data: &[u8], frame_id: u8, packet_size: usize) -> Vec<BlePacket> {
    data.chunks(payload_capacity(packet_size))
        .enumerate()
        .map(|(i, chunk)| BlePacket {
            packet_index: i as u16,
            frame_id,
            audio_data: chunk.to_vec(),
        })
        .collect()
}
