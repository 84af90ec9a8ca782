//! Capture files: a sequence of `[u16 LE length][bytes]` records, one per BLE notification.
//! Delivered frames are written back out in the same record format.

use anyhow::{bail, Result};

const LEN_SIZE: usize = 2;

/// Split a capture into notification payloads. A truncated trailing record is an error.
pub fn read_records(bytes: &[u8]) -> Result<Vec<&[u8]>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes.len() - pos < LEN_SIZE {
            bail!("truncated record header at offset {pos}");
        }
        let len = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]) as usize;
        let start = pos + LEN_SIZE;
        if bytes.len() - start < len {
            bail!("record at offset {pos} needs {len} bytes, {} left", bytes.len() - start);
        }
        out.push(&bytes[start..start + len]);
        pos = start + len;
    }
    Ok(out)
}

/// Append one record. Payloads over `u16::MAX` bytes are rejected.
pub fn write_record(out: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    let Ok(len) = u16::try_from(data.len()) else {
        bail!("record of {} bytes exceeds {}", data.len(), u16::MAX);
    };
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
    Ok(())
}
