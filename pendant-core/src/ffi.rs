//! C ABI for linking pendant-core as a static library from Android (NDK) or iOS BLE hosts.
//! The host owns the BLE connection; it forwards notifications here and writes returned commands.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::slice;

use crate::config::ReassemblerConfig;
use crate::core::{Event, PendantCore, TransportMode};

/// Called once per delivered frame. `frame_id` is -1 for frames extracted from the stream.
pub type PendantFrameCallback =
    extern "C" fn(user: *mut c_void, frame_id: c_int, data: *const u8, len: usize);

/// Called once per lost frame with the missing packet indices.
pub type PendantLossCallback =
    extern "C" fn(user: *mut c_void, frame_id: c_int, lost: *const u16, count: usize);

/// Create a session with default configuration. `mode`: 0 = stream, 1 = packets.
/// Returns null on bad mode.
#[no_mangle]
pub extern "C" fn pendant_core_create(mode: u8) -> *mut c_void {
    let mode = match mode {
        0 => TransportMode::Stream,
        1 => TransportMode::Packets,
        _ => return std::ptr::null_mut(),
    };
    match PendantCore::new(mode, ReassemblerConfig::default()) {
        Ok(core) => Box::into_raw(Box::new(core)) as *mut c_void,
        Err(_) => std::ptr::null_mut(),
    }
}

/// Destroy a session. No-op if h is null.
#[no_mangle]
pub extern "C" fn pendant_core_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut PendantCore) };
}

fn dispatch(
    events: Vec<Event>,
    on_frame: Option<PendantFrameCallback>,
    on_loss: Option<PendantLossCallback>,
    user: *mut c_void,
) -> c_int {
    let n = events.len();
    for event in events {
        match event {
            Event::Frame { frame_id, data, .. } => {
                if let Some(cb) = on_frame {
                    let id = frame_id.map(c_int::from).unwrap_or(-1);
                    cb(user, id, data.as_ptr(), data.len());
                }
            }
            Event::Loss(report) => {
                if let Some(cb) = on_loss {
                    cb(
                        user,
                        c_int::from(report.frame_id),
                        report.lost_indices.as_ptr(),
                        report.lost_indices.len(),
                    );
                }
            }
        }
    }
    n as c_int
}

/// Feed one notification. Invokes callbacks before returning.
/// Returns the event count, -1 on null args.
#[no_mangle]
pub extern "C" fn pendant_core_on_notification(
    h: *mut c_void,
    bytes: *const u8,
    len: usize,
    on_frame: Option<PendantFrameCallback>,
    on_loss: Option<PendantLossCallback>,
    user: *mut c_void,
) -> c_int {
    if h.is_null() || (bytes.is_null() && len > 0) {
        return -1;
    }
    let core = unsafe { &mut *(h as *mut PendantCore) };
    let data = if len == 0 {
        &[][..]
    } else {
        unsafe { slice::from_raw_parts(bytes, len) }
    };
    let events = core.on_notification(data);
    dispatch(events, on_frame, on_loss, user)
}

/// Eviction sweep; call every sweep interval (50 ms by default).
/// Returns the event count, -1 on null handle.
#[no_mangle]
pub extern "C" fn pendant_core_tick(
    h: *mut c_void,
    on_frame: Option<PendantFrameCallback>,
    on_loss: Option<PendantLossCallback>,
    user: *mut c_void,
) -> c_int {
    if h.is_null() {
        return -1;
    }
    let core = unsafe { &mut *(h as *mut PendantCore) };
    let events = core.tick();
    dispatch(events, on_frame, on_loss, user)
}

/// Reset on disconnect: clears buffers and in-flight frames, zeroes message/request counters.
#[no_mangle]
pub extern "C" fn pendant_core_reset(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let core = unsafe { &mut *(h as *mut PendantCore) };
    core.reset();
}

/// 1 if healthy, 0 if not, -1 on null handle.
#[no_mangle]
pub extern "C" fn pendant_core_is_healthy(h: *const c_void) -> c_int {
    if h.is_null() {
        return -1;
    }
    let core = unsafe { &*(h as *const PendantCore) };
    c_int::from(core.is_healthy())
}

fn write_out(bytes: &[u8], out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if out_buf.is_null() || bytes.len() > out_buf_len {
        return -1;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
    }
    bytes.len() as c_int
}

/// Connect writes (set time, enable stream). Layout: per write, 2 bytes LE length then the write.
/// Returns bytes written, -1 on error. Counters advance even if out_buf is too small.
#[no_mangle]
pub extern "C" fn pendant_core_start_stream(
    h: *mut c_void,
    unix_ms: u64,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() {
        return -1;
    }
    let core = unsafe { &mut *(h as *mut PendantCore) };
    let mut out = Vec::new();
    for write in core.start_stream(unix_ms) {
        out.extend_from_slice(&(write.len() as u16).to_le_bytes());
        out.extend_from_slice(&write);
    }
    write_out(&out, out_buf, out_buf_len)
}

/// Encode a clock sync to `unix_ms`. Returns bytes written, -1 on error.
#[no_mangle]
pub extern "C" fn pendant_core_encode_set_current_time(
    h: *mut c_void,
    unix_ms: u64,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() {
        return -1;
    }
    let core = unsafe { &mut *(h as *mut PendantCore) };
    let bytes = core.codec_mut().encode_set_current_time(unix_ms);
    write_out(&bytes, out_buf, out_buf_len)
}

/// Encode enable/disable stream. Returns bytes written, -1 on error.
#[no_mangle]
pub extern "C" fn pendant_core_encode_enable_data_stream(
    h: *mut c_void,
    enable: bool,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() {
        return -1;
    }
    let core = unsafe { &mut *(h as *mut PendantCore) };
    let bytes = core.codec_mut().encode_enable_data_stream(enable);
    write_out(&bytes, out_buf, out_buf_len)
}

/// Encode an acknowledgment of stored data. Returns bytes written, -1 on error.
#[no_mangle]
pub extern "C" fn pendant_core_encode_acknowledge_data(
    h: *mut c_void,
    up_to_index: u64,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() {
        return -1;
    }
    let core = unsafe { &mut *(h as *mut PendantCore) };
    let bytes = core.acknowledge_data(up_to_index);
    write_out(&bytes, out_buf, out_buf_len)
}

/// Encode a device status request. Returns bytes written, -1 on error.
#[no_mangle]
pub extern "C" fn pendant_core_encode_get_device_status(
    h: *mut c_void,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() {
        return -1;
    }
    let core = unsafe { &mut *(h as *mut PendantCore) };
    let bytes = core.get_device_status();
    write_out(&bytes, out_buf, out_buf_len)
}

/// Encode a request for stored flash pages. Returns bytes written, -1 on error.
#[no_mangle]
pub extern "C" fn pendant_core_encode_download_flash_pages(
    h: *mut c_void,
    batch_mode: bool,
    real_time: bool,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() {
        return -1;
    }
    let core = unsafe { &mut *(h as *mut PendantCore) };
    let bytes = core.download_flash_pages(batch_mode, real_time);
    write_out(&bytes, out_buf, out_buf_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::split_into_packets;
    use crate::protocol::CommandCodec;

    #[derive(Default)]
    struct Sink {
        frames: Vec<(c_int, Vec<u8>)>,
        losses: Vec<(c_int, Vec<u16>)>,
    }

    extern "C" fn on_frame(user: *mut c_void, frame_id: c_int, data: *const u8, len: usize) {
        let sink = unsafe { &mut *(user as *mut Sink) };
        let bytes = unsafe { slice::from_raw_parts(data, len) }.to_vec();
        sink.frames.push((frame_id, bytes));
    }

    extern "C" fn on_loss(user: *mut c_void, frame_id: c_int, lost: *const u16, count: usize) {
        let sink = unsafe { &mut *(user as *mut Sink) };
        let lost = unsafe { slice::from_raw_parts(lost, count) }.to_vec();
        sink.losses.push((frame_id, lost));
    }

    #[test]
    fn create_rejects_unknown_mode() {
        assert!(pendant_core_create(7).is_null());
        pendant_core_destroy(std::ptr::null_mut());
    }

    #[test]
    fn stream_frames_reach_callback() {
        let h = pendant_core_create(0);
        assert!(!h.is_null());
        let mut sink = Sink::default();
        let mut rec = vec![0x22, 0x0A, 0xB8];
        rec.extend([1u8; 9]);
        let n = pendant_core_on_notification(
            h,
            rec.as_ptr(),
            rec.len(),
            Some(on_frame),
            Some(on_loss),
            &mut sink as *mut Sink as *mut c_void,
        );
        assert_eq!(n, 1);
        assert_eq!(sink.frames, vec![(-1, rec[2..].to_vec())]);
        assert_eq!(pendant_core_is_healthy(h), 1);
        pendant_core_destroy(h);
    }

    #[test]
    fn packet_frames_reach_callback() {
        let h = pendant_core_create(1);
        let mut sink = Sink::default();
        let user = &mut sink as *mut Sink as *mut c_void;
        let data = vec![0x5A; 500];
        for p in split_into_packets(&data, 4, 320) {
            let b = p.to_bytes();
            pendant_core_on_notification(h, b.as_ptr(), b.len(), Some(on_frame), None, user);
        }
        assert_eq!(sink.frames, vec![(4, data)]);
        assert_eq!(pendant_core_tick(h, Some(on_frame), Some(on_loss), user), 0);
        pendant_core_destroy(h);
    }

    #[test]
    fn null_arguments_are_rejected() {
        assert_eq!(
            pendant_core_on_notification(
                std::ptr::null_mut(),
                std::ptr::null(),
                0,
                None,
                None,
                std::ptr::null_mut()
            ),
            -1
        );
        assert_eq!(pendant_core_tick(std::ptr::null_mut(), None, None, std::ptr::null_mut()), -1);
        assert_eq!(pendant_core_is_healthy(std::ptr::null()), -1);
        let h = pendant_core_create(0);
        assert_eq!(
            pendant_core_on_notification(h, std::ptr::null(), 4, None, None, std::ptr::null_mut()),
            -1
        );
        pendant_core_destroy(h);
    }

    #[test]
    fn command_encoding_into_buffers() {
        let h = pendant_core_create(0);
        let mut buf = [0u8; 256];
        let n = pendant_core_start_stream(h, 1_700_000_000_000, buf.as_mut_ptr(), buf.len());
        assert!(n > 4);
        let first_len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        assert!(first_len + 2 < n as usize);

        let n = pendant_core_encode_enable_data_stream(h, false, buf.as_mut_ptr(), buf.len());
        assert!(n > 0);
        let mut tiny = [0u8; 2];
        assert_eq!(
            pendant_core_encode_get_device_status(h, tiny.as_mut_ptr(), tiny.len()),
            -1
        );
        assert!(pendant_core_encode_acknowledge_data(h, 3, buf.as_mut_ptr(), buf.len()) > 0);

        pendant_core_reset(h);
        let core = unsafe { &*(h as *const PendantCore) };
        assert_eq!(core.counters().message_index(), 0);
        pendant_core_destroy(h);
    }

    #[test]
    fn clock_and_flash_commands_match_codec() {
        let h = pendant_core_create(0);
        let mut buf = [0u8; 128];
        let n = pendant_core_encode_set_current_time(h, 1_700_000_000_000, buf.as_mut_ptr(), 128);
        let mut codec = CommandCodec::new();
        assert_eq!(&buf[..n as usize], &codec.encode_set_current_time(1_700_000_000_000)[..]);

        let n = pendant_core_encode_download_flash_pages(h, true, false, buf.as_mut_ptr(), 128);
        assert_eq!(&buf[..n as usize], &codec.encode_download_flash_pages(true, false)[..]);

        assert_eq!(
            pendant_core_encode_set_current_time(std::ptr::null_mut(), 0, buf.as_mut_ptr(), 128),
            -1
        );
        let core = unsafe { &*(h as *const PendantCore) };
        assert_eq!(core.counters().request_id(), 2);
        pendant_core_destroy(h);
    }
}
