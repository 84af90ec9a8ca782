//! Wire encoding: base-128 varints and tag/wire-type fields (protobuf subset: varint and
//! length-delimited only).

/// Maximum encoded length of a u64 varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Field encodings understood by the device. Other protobuf wire types are never produced or
/// consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    LengthDelimited = 2,
}

impl WireType {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(WireType::Varint),
            2 => Some(WireType::LengthDelimited),
            _ => None,
        }
    }
}

/// Field tag: `(field_number << 3) | wire_type`.
pub const fn tag(field_number: u32, wire_type: WireType) -> u64 {
    ((field_number as u64) << 3) | wire_type as u64
}

/// Encode `value` as LSB-first 7-bit groups, continuation bit on all but the last byte.
pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAX_VARINT_LEN);
    put_varint(&mut out, value);
    out
}

/// Append the varint encoding of `value` to `out`.
pub fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Decode a varint starting at `pos`. Returns the value and the position just past it.
///
/// Stops at the first byte without the continuation bit or at the end of `bytes`; truncated
/// input yields the partial value without error, so callers bounds-check the returned position.
/// Groups beyond the 64th bit are consumed but ignored.
pub fn decode_varint(bytes: &[u8], pos: usize) -> (u64, usize) {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut i = pos;
    while i < bytes.len() {
        let b = bytes[i];
        i += 1;
        if shift < 64 {
            value |= u64::from(b & 0x7F) << shift;
        }
        shift += 7;
        if b & 0x80 == 0 {
            break;
        }
    }
    (value, i)
}

/// True if a complete (terminated) varint starts at `pos`.
pub fn varint_complete(bytes: &[u8], pos: usize) -> bool {
    bytes
        .get(pos..)
        .map(|rest| rest.iter().any(|b| b & 0x80 == 0))
        .unwrap_or(false)
}

/// Prepend the varint tag to already-encoded `value`.
pub fn encode_field(field_number: u32, wire_type: WireType, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAX_VARINT_LEN + value.len());
    put_varint(&mut out, tag(field_number, wire_type));
    out.extend_from_slice(value);
    out
}

/// Varint field shorthand.
pub fn encode_varint_field(field_number: u32, value: u64) -> Vec<u8> {
    encode_field(field_number, WireType::Varint, &encode_varint(value))
}

/// Length-prefix `data` and wrap it as a length-delimited field.
pub fn encode_bytes_field(field_number: u32, data: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(MAX_VARINT_LEN + data.len());
    put_varint(&mut value, data.len() as u64);
    value.extend_from_slice(data);
    encode_field(field_number, WireType::LengthDelimited, &value)
}

/// Nest an encoded sub-message under `field_number`. Same encoding as [`encode_bytes_field`].
pub fn encode_message(field_number: u32, inner: &[u8]) -> Vec<u8> {
    encode_bytes_field(field_number, inner)
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
}

impl<'a> FieldValue<'a> {
    pub fn as_varint(&self) -> Option<u64> {
        match self {
            FieldValue::Varint(v) => Some(*v),
            FieldValue::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            FieldValue::Varint(_) => None,
        }
    }
}

/// Iterates `(field_number, value)` over an encoded message body.
/// Iteration ends at the end of input, on an unsupported wire type, or on a truncated field.
pub struct FieldIter<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = (u32, FieldValue<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        if !varint_complete(self.bytes, self.pos) {
            return None;
        }
        let (key, after_tag) = decode_varint(self.bytes, self.pos);
        let field_number = u32::try_from(key >> 3).ok()?;
        let wire_type = WireType::from_bits((key & 0x07) as u8)?;
        if !varint_complete(self.bytes, after_tag) {
            return None;
        }
        let (v, after_value) = decode_varint(self.bytes, after_tag);
        let value = match wire_type {
            WireType::Varint => {
                self.pos = after_value;
                FieldValue::Varint(v)
            }
            WireType::LengthDelimited => {
                let len = usize::try_from(v).ok()?;
                let end = after_value.checked_add(len)?;
                if end > self.bytes.len() {
                    return None;
                }
                self.pos = end;
                FieldValue::Bytes(&self.bytes[after_value..end])
            }
        };
        Some((field_number, value))
    }
}

/// First value of `field_number` in `message`, if any.
pub fn find_field(message: &[u8], field_number: u32) -> Option<FieldValue<'_>> {
    FieldIter::new(message)
        .find(|(n, _)| *n == field_number)
        .map(|(_, v)| v)
}
