//! Pendant control protocol: BLE envelope, request trailer, and command builders.

use crate::wire::{encode_bytes_field, encode_message, encode_varint_field};

/// Envelope field numbers.
pub const ENVELOPE_INDEX_FIELD: u32 = 1;
pub const ENVELOPE_CONTROL_A_FIELD: u32 = 2;
pub const ENVELOPE_CONTROL_B_FIELD: u32 = 3;
pub const ENVELOPE_PAYLOAD_FIELD: u32 = 4;

/// Constant control values carried by every envelope.
pub const ENVELOPE_CONTROL_A: u64 = 0;
pub const ENVELOPE_CONTROL_B: u64 = 1;

/// Command field numbers inside the envelope payload.
pub const CMD_SET_CURRENT_TIME: u32 = 6;
pub const CMD_ACKNOWLEDGE_DATA: u32 = 7;
pub const CMD_ENABLE_DATA_STREAM: u32 = 8;
pub const CMD_DOWNLOAD_FLASH_PAGES: u32 = 9;
pub const CMD_GET_DEVICE_STATUS: u32 = 21;

/// Request trailer attached to commands that expect an acknowledgment.
pub const REQUEST_DATA_FIELD: u32 = 30;
const REQUEST_FLAG: u64 = 0;

/// Per-connection counters. Both start at 0 and only go back to 0 through
/// [`SessionCounters::reset`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    message_index: u64,
    request_id: u64,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_index(&self) -> u64 {
        self.message_index
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Return the current message index and advance it.
    pub fn next_message_index(&mut self) -> u64 {
        let i = self.message_index;
        self.message_index = self.message_index.wrapping_add(1);
        i
    }

    /// Return the current request id and advance it.
    pub fn next_request_id(&mut self) -> u64 {
        let i = self.request_id;
        self.request_id = self.request_id.wrapping_add(1);
        i
    }

    /// Zero both counters. Must be called on reconnect or the device rejects out-of-order indices.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Builds outbound control writes. Stateful per connected session through its [`SessionCounters`].
#[derive(Debug, Default)]
pub struct CommandCodec {
    counters: SessionCounters,
}

impl CommandCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume with counters owned elsewhere (e.g. restored after a host-side handoff).
    pub fn with_counters(counters: SessionCounters) -> Self {
        Self { counters }
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    pub fn reset(&mut self) {
        self.counters.reset();
    }

    /// Wrap `payload` in the BLE envelope; advances the message index.
    pub fn encode_ble_wrapper(&mut self, payload: &[u8]) -> Vec<u8> {
        let index = self.counters.next_message_index();
        let mut out = encode_varint_field(ENVELOPE_INDEX_FIELD, index);
        out.extend(encode_varint_field(ENVELOPE_CONTROL_A_FIELD, ENVELOPE_CONTROL_A));
        out.extend(encode_varint_field(ENVELOPE_CONTROL_B_FIELD, ENVELOPE_CONTROL_B));
        out.extend(encode_bytes_field(ENVELOPE_PAYLOAD_FIELD, payload));
        out
    }

    /// `{1: request_id, 2: flag}` nested under field 30; advances the request id.
    fn encode_request_data(&mut self) -> Vec<u8> {
        let id = self.counters.next_request_id();
        let mut inner = encode_varint_field(1, id);
        inner.extend(encode_varint_field(2, REQUEST_FLAG));
        encode_message(REQUEST_DATA_FIELD, &inner)
    }

    fn encode_command(&mut self, command_field: u32, body: &[u8]) -> Vec<u8> {
        let mut payload = encode_message(command_field, body);
        payload.extend(self.encode_request_data());
        self.encode_ble_wrapper(&payload)
    }

    /// Set the device clock to `unix_ms`.
    pub fn encode_set_current_time(&mut self, unix_ms: u64) -> Vec<u8> {
        let body = encode_varint_field(1, unix_ms);
        self.encode_command(CMD_SET_CURRENT_TIME, &body)
    }

    /// Start or stop real-time audio notifications.
    pub fn encode_enable_data_stream(&mut self, enable: bool) -> Vec<u8> {
        let mut body = encode_varint_field(1, 0);
        body.extend(encode_varint_field(2, u64::from(enable)));
        self.encode_command(CMD_ENABLE_DATA_STREAM, &body)
    }

    /// Acknowledge stored data up to and including `up_to_index`.
    pub fn encode_acknowledge_data(&mut self, up_to_index: u64) -> Vec<u8> {
        let body = encode_varint_field(1, up_to_index);
        self.encode_command(CMD_ACKNOWLEDGE_DATA, &body)
    }

    /// Request battery/storage status. Empty body.
    pub fn encode_get_device_status(&mut self) -> Vec<u8> {
        self.encode_command(CMD_GET_DEVICE_STATUS, &[])
    }

    /// Ask the device to replay stored flash pages.
    pub fn encode_download_flash_pages(&mut self, batch_mode: bool, real_time: bool) -> Vec<u8> {
        let mut body = encode_varint_field(1, u64::from(batch_mode));
        body.extend(encode_varint_field(2, u64::from(real_time)));
        self.encode_command(CMD_DOWNLOAD_FLASH_PAGES, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{find_field, FieldIter, FieldValue};

    fn envelope_payload(write: &[u8]) -> &[u8] {
        find_field(write, ENVELOPE_PAYLOAD_FIELD)
            .and_then(|v| v.as_bytes())
            .expect("envelope payload")
    }

    fn request_id_of(payload: &[u8]) -> u64 {
        let trailer = find_field(payload, REQUEST_DATA_FIELD)
            .and_then(|v| v.as_bytes())
            .expect("request trailer");
        find_field(trailer, 1).and_then(|v| v.as_varint()).expect("request id")
    }

    #[test]
    fn wrapper_layout() {
        let mut codec = CommandCodec::new();
        let out = codec.encode_ble_wrapper(&[0xAA, 0xBB]);
        assert_eq!(
            out,
            vec![0x08, 0x00, 0x10, 0x00, 0x18, 0x01, 0x22, 0x02, 0xAA, 0xBB]
        );
        assert_eq!(codec.counters().message_index(), 1);
        assert_eq!(codec.counters().request_id(), 0);
    }

    #[test]
    fn wrapper_increments_message_index() {
        let mut codec = CommandCodec::new();
        for expected in 0..5u64 {
            let out = codec.encode_ble_wrapper(b"x");
            let index = find_field(&out, ENVELOPE_INDEX_FIELD).and_then(|v| v.as_varint());
            assert_eq!(index, Some(expected));
        }
    }

    #[test]
    fn commands_advance_both_counters() {
        let mut codec = CommandCodec::new();
        let a = codec.encode_set_current_time(1_700_000_000_000);
        let b = codec.encode_enable_data_stream(true);
        let c = codec.encode_get_device_status();
        assert_eq!(codec.counters().message_index(), 3);
        assert_eq!(codec.counters().request_id(), 3);
        assert_eq!(request_id_of(envelope_payload(&a)), 0);
        assert_eq!(request_id_of(envelope_payload(&b)), 1);
        assert_eq!(request_id_of(envelope_payload(&c)), 2);
    }

    #[test]
    fn set_current_time_body() {
        let mut codec = CommandCodec::new();
        let out = codec.encode_set_current_time(1_700_000_000_123);
        let payload = envelope_payload(&out);
        let body = find_field(payload, CMD_SET_CURRENT_TIME)
            .and_then(|v| v.as_bytes())
            .unwrap();
        assert_eq!(
            find_field(body, 1).and_then(|v| v.as_varint()),
            Some(1_700_000_000_123)
        );
    }

    #[test]
    fn enable_data_stream_body() {
        let mut codec = CommandCodec::new();
        for enable in [true, false] {
            let out = codec.encode_enable_data_stream(enable);
            let body = find_field(envelope_payload(&out), CMD_ENABLE_DATA_STREAM)
                .and_then(|v| v.as_bytes())
                .unwrap();
            let fields: Vec<_> = FieldIter::new(body).collect();
            assert_eq!(
                fields,
                vec![
                    (1, FieldValue::Varint(0)),
                    (2, FieldValue::Varint(u64::from(enable)))
                ]
            );
        }
    }

    #[test]
    fn acknowledge_and_download_bodies() {
        let mut codec = CommandCodec::new();
        let ack = codec.encode_acknowledge_data(77);
        let body = find_field(envelope_payload(&ack), CMD_ACKNOWLEDGE_DATA)
            .and_then(|v| v.as_bytes())
            .unwrap();
        assert_eq!(find_field(body, 1).and_then(|v| v.as_varint()), Some(77));

        let dl = codec.encode_download_flash_pages(true, false);
        let body = find_field(envelope_payload(&dl), CMD_DOWNLOAD_FLASH_PAGES)
            .and_then(|v| v.as_bytes())
            .unwrap();
        assert_eq!(find_field(body, 1).and_then(|v| v.as_varint()), Some(1));
        assert_eq!(find_field(body, 2).and_then(|v| v.as_varint()), Some(0));
    }

    #[test]
    fn device_status_has_empty_body() {
        let mut codec = CommandCodec::new();
        let out = codec.encode_get_device_status();
        let body = find_field(envelope_payload(&out), CMD_GET_DEVICE_STATUS)
            .and_then(|v| v.as_bytes())
            .unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn reset_zeroes_counters() {
        let mut codec = CommandCodec::new();
        codec.encode_enable_data_stream(true);
        codec.encode_acknowledge_data(1);
        codec.reset();
        assert_eq!(*codec.counters(), SessionCounters::new());
        let out = codec.encode_enable_data_stream(true);
        assert_eq!(find_field(&out, ENVELOPE_INDEX_FIELD).and_then(|v| v.as_varint()), Some(0));
        assert_eq!(request_id_of(envelope_payload(&out)), 0);
    }

    #[test]
    fn with_counters_resumes() {
        let mut counters = SessionCounters::new();
        counters.next_message_index();
        counters.next_message_index();
        let mut codec = CommandCodec::with_counters(counters);
        let out = codec.encode_ble_wrapper(&[]);
        assert_eq!(find_field(&out, ENVELOPE_INDEX_FIELD).and_then(|v| v.as_varint()), Some(2));
    }
}
