//! C ABI for linking flare-core as a static library from Android (NDK/JNI) or iOS hosts.
//! All functions take the opaque handle from `flare_engine_create`; a null handle returns -1.

use std::borrow::Cow;
use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int};
use std::slice;

use crate::core::Poll;
use crate::engine::MeshEngine;
use crate::protocol::PROTOCOL_VERSION;

const COUNT_SIZE: usize = 4;
const LEN_SIZE: usize = 4;

/// Returns the wire protocol version. Also keeps the staticlib exporting a C symbol.
#[no_mangle]
pub extern "C" fn flare_core_version() -> u8 {
    PROTOCOL_VERSION
}

/// Read a NUL-terminated string; None when the pointer is null. Invalid UTF-8 is replaced.
unsafe fn c_str<'a>(p: *const c_char) -> Option<Cow<'a, str>> {
    if p.is_null() {
        None
    } else {
        Some(CStr::from_ptr(p).to_string_lossy())
    }
}

/// Create an engine with default limits and loopback on. `self_id` may be null ("unknown").
#[no_mangle]
pub extern "C" fn flare_engine_create(self_id: *const c_char) -> *mut c_void {
    let id = unsafe { c_str(self_id) };
    let engine = MeshEngine::new(id.as_deref());
    Box::into_raw(Box::new(engine)) as *mut c_void
}

/// Destroy an engine. No-op if h is null.
#[no_mangle]
pub extern "C" fn flare_engine_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut MeshEngine) };
}

/// Reset all state and set our sender id (null → "unknown"). Returns 0, or -1 if h is null.
#[no_mangle]
pub extern "C" fn flare_init(h: *mut c_void, self_id: *const c_char) -> c_int {
    if h.is_null() {
        return -1;
    }
    let engine = unsafe { &*(h as *const MeshEngine) };
    let id = unsafe { c_str(self_id) };
    engine.init(id.as_deref());
    0
}

/// Broadcast a NUL-terminated message. If out_buf is non-null the frames are written to it:
/// 4 bytes frame count (LE), then per frame 4 bytes length (LE) + frame bytes.
/// Returns bytes written (0 when out_buf is null), -1 on null arguments, -2 if the message
/// needs more than 32 fragments or out_buf is too small.
#[no_mangle]
pub extern "C" fn flare_send_broadcast(
    h: *mut c_void,
    message: *const c_char,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() || message.is_null() {
        return -1;
    }
    let engine = unsafe { &*(h as *const MeshEngine) };
    let bytes = unsafe { CStr::from_ptr(message) }.to_bytes();
    if out_buf.is_null() {
        return match engine.send_broadcast(bytes) {
            Ok(_) => 0,
            Err(_) => -2,
        };
    }
    // Size is checked before sending so a -2 leaves the engine untouched.
    match engine.send_broadcast_within(bytes, out_buf_len, batch_len) {
        Ok(frames) => write_frames(&frames, out_buf, out_buf_len),
        Err(_) => -2,
    }
}

/// Bytes the batch layout needs for `frames` frames totalling `bytes` bytes.
fn batch_len(frames: usize, bytes: usize) -> usize {
    COUNT_SIZE + frames * LEN_SIZE + bytes
}

/// Serialize frames to out_buf: 4 bytes count (LE), then each (4 len LE, bytes).
fn write_frames(frames: &[Vec<u8>], out_buf: *mut u8, out_buf_len: usize) -> c_int {
    let need = batch_len(frames.len(), frames.iter().map(Vec::len).sum());
    if out_buf_len < need {
        return -2;
    }
    let buf = unsafe { slice::from_raw_parts_mut(out_buf, out_buf_len) };
    buf[0..COUNT_SIZE].copy_from_slice(&(frames.len() as u32).to_le_bytes());
    let mut off = COUNT_SIZE;
    for f in frames {
        buf[off..off + LEN_SIZE].copy_from_slice(&(f.len() as u32).to_le_bytes());
        off += LEN_SIZE;
        buf[off..off + f.len()].copy_from_slice(f);
        off += f.len();
    }
    off as c_int
}

/// Feed raw bytes heard on the medium. remote_addr may be null.
/// Returns 0 (also for frames that are not ours), -1 if h or raw is null or raw_len is 0.
#[no_mangle]
pub extern "C" fn flare_receive_raw(
    h: *mut c_void,
    raw: *const u8,
    raw_len: u32,
    rssi: c_int,
    remote_addr: *const c_char,
) -> c_int {
    if h.is_null() || raw.is_null() || raw_len == 0 {
        return -1;
    }
    let engine = unsafe { &*(h as *const MeshEngine) };
    let bytes = unsafe { slice::from_raw_parts(raw, raw_len as usize) };
    let addr = unsafe { c_str(remote_addr) }.unwrap_or_default();
    match engine.receive_raw(bytes, rssi, &addr) {
        Ok(_) => 0,
        Err(_) => -1,
    }
}

/// Pop the oldest delivered payload into out_buf (up to max_len bytes).
/// Returns bytes copied, 0 if nothing is queued, -1 on null h/out_buf.
/// If out_truncated is non-null it is set to 1 when the payload did not fit, else 0.
#[no_mangle]
pub extern "C" fn flare_poll_incoming(
    h: *mut c_void,
    out_buf: *mut u8,
    max_len: u32,
    out_truncated: *mut u8,
) -> c_int {
    if h.is_null() || out_buf.is_null() {
        return -1;
    }
    let engine = unsafe { &*(h as *const MeshEngine) };
    let buf = unsafe { slice::from_raw_parts_mut(out_buf, max_len as usize) };
    let poll = engine.poll_incoming(buf);
    if !out_truncated.is_null() {
        let flag = u8::from(matches!(poll, Poll::Truncated { .. }));
        unsafe { *out_truncated = flag };
    }
    poll.copied() as c_int
}

/// Write the neighbor listing as NUL-terminated JSON. Returns its length (without NUL),
/// or -1 if h/out_json is null or max_len cannot hold it (nothing is written then).
#[no_mangle]
pub extern "C" fn flare_get_neighbors_json(
    h: *mut c_void,
    out_json: *mut c_char,
    max_len: u32,
) -> c_int {
    if h.is_null() || out_json.is_null() {
        return -1;
    }
    let engine = unsafe { &*(h as *const MeshEngine) };
    let json = match engine.neighbors_json(max_len as usize) {
        Ok(j) => j,
        Err(_) => return -1,
    };
    let out = unsafe { slice::from_raw_parts_mut(out_json as *mut u8, json.len() + 1) };
    out[..json.len()].copy_from_slice(json.as_bytes());
    out[json.len()] = 0;
    json.len() as c_int
}
