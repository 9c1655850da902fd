//! Stable C ABI surface (§4.6/§6). Turns opaque `u64` handles, JSON config,
//! and C callbacks into `Pipeline` calls, and marshals events back onto
//! foreign threads.
//!
//! Handles are integer keys into a process-wide registry
//! (`once_cell::sync::Lazy<Mutex<HashMap<u64, Arc<Pipeline>>>>`) rather than
//! raw pointers, so a foreign caller can never dereference an invalid
//! pointer — only look up a possibly-stale integer, which resolves to a
//! clean `InvalidHandle` (`-1`). Grounded on the retrieval pack's one real
//! C-interop example, `qwen_asr_ffi.rs` (there used to *consume* a C
//! library's `extern "C"` functions; here the same `CStr`/`CString` idiom is
//! inverted to *export* one).

use std::collections::HashMap;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::runtime::Runtime;

use crate::adapters::audio::MicrophoneSource;
use crate::domain::{Config, Event};
use crate::error::CoreError;
use crate::pipeline::Pipeline;

/// Streaming callback signature: `(ctx, event_type, text, stash, error)`.
/// `event_type` is `0` Partial, `1` Final, `2` Error. For Partial, `text`
/// is the confirmed prefix and `stash` the unconfirmed tail (both
/// non-null, possibly empty); for Final only `text` is non-null; for
/// Error only `error` is non-null. Every string pointer is valid only for
/// the duration of this call — the host must copy what it needs.
pub type StreamCallback = extern "C" fn(
    ctx: *mut c_void,
    event_type: i32,
    text: *const c_char,
    stash: *const c_char,
    error: *const c_char,
);

const EVENT_PARTIAL: i32 = 0;
const EVENT_FINAL: i32 = 1;
const EVENT_ERROR: i32 = 2;

const CODE_OK: i32 = 0;
const CODE_INVALID_HANDLE: i32 = -1;
const CODE_REJECTED: i32 = -2;

/// Wraps a raw `ctx` pointer so it can cross into the `Send + Sync`
/// `EventCallback` closure. Safe because the host is the one who handed us
/// this pointer expecting it to be called back from a core-owned thread.
struct SendableContext(*mut c_void);
unsafe impl Send for SendableContext {}
unsafe impl Sync for SendableContext {}

static RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build process-wide Tokio runtime")
});

static REGISTRY: Lazy<Mutex<HashMap<u64, Arc<Pipeline>>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static NEXT_HANDLE: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

static VERSION_CSTRING: Lazy<CString> =
    Lazy::new(|| CString::new(crate::VERSION).expect("version string has no interior nul"));

fn lookup(handle: u64) -> Option<Arc<Pipeline>> {
    REGISTRY.lock().expect("ffi registry poisoned").get(&handle).cloned()
}

/// Parses `config_json`, constructs a `Pipeline` wired to the default
/// microphone `AudioSourcePort`, and returns an opaque handle. Returns `0`
/// (never a valid handle — handle ids start at 1) on parse failure or a
/// null `config_json`.
///
/// # Safety
/// `config_json` must be a valid, nul-terminated UTF-8 C string pointer
/// for the duration of this call.
#[no_mangle]
pub unsafe extern "C" fn create(config_json: *const c_char) -> u64 {
    if config_json.is_null() {
        return 0;
    }
    let json = match CStr::from_ptr(config_json).to_str() {
        Ok(s) => s,
        Err(_) => return 0,
    };
    let config: Config = match Config::from_json(json) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("create: invalid config: {e}");
            return 0;
        }
    };

    let audio = Arc::new(MicrophoneSource::new());
    let pipeline = Arc::new(Pipeline::new(config, audio));
    let handle = NEXT_HANDLE.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    REGISTRY.lock().expect("ffi registry poisoned").insert(handle, pipeline);
    handle
}

/// Implies an internal `cancel_streaming` followed by teardown. Blocks
/// briefly (bounding the ~50 ms worker-completion window from §5) so that
/// in-flight workers have observed cancellation before the handle is
/// dropped from the registry.
#[no_mangle]
pub extern "C" fn destroy(handle: u64) {
    let pipeline = REGISTRY.lock().expect("ffi registry poisoned").remove(&handle);
    if let Some(pipeline) = pipeline {
        pipeline.cancel_streaming();
        RUNTIME.block_on(tokio::time::sleep(Duration::from_millis(60)));
    }
}

/// `0` idle / `1` recording / `2` processing / `-1` invalid handle. A
/// lock-free atomic read — never blocks.
#[no_mangle]
pub extern "C" fn get_state(handle: u64) -> i32 {
    match lookup(handle) {
        Some(pipeline) => pipeline.get_state().as_i32(),
        None => CODE_INVALID_HANDLE,
    }
}

/// `true` iff `get_state` is `Recording` or `Processing`.
#[no_mangle]
pub extern "C" fn is_streaming(handle: u64) -> i32 {
    match lookup(handle) {
        Some(pipeline) => {
            matches!(
                pipeline.get_state(),
                crate::domain::PipelineState::Recording | crate::domain::PipelineState::Processing
            ) as i32
        }
        None => CODE_INVALID_HANDLE,
    }
}

/// # Safety
/// `ctx` is an opaque pointer handed back to `cb` unchanged; the core
/// never dereferences it.
#[no_mangle]
pub unsafe extern "C" fn start_streaming(handle: u64, cb: StreamCallback, ctx: *mut c_void) -> i32 {
    let Some(pipeline) = lookup(handle) else {
        return CODE_INVALID_HANDLE;
    };
    let ctx = SendableContext(ctx);
    let callback: crate::pipeline::EventCallback = Arc::new(move |event: Event| {
        let ctx = ctx.0;
        match event {
            Event::Partial { confirmed, stash } => {
                let text = CString::new(confirmed).unwrap_or_default();
                let stash = CString::new(stash).unwrap_or_default();
                cb(ctx, EVENT_PARTIAL, text.as_ptr(), stash.as_ptr(), std::ptr::null());
            }
            Event::Final { text } => {
                let text = CString::new(text).unwrap_or_default();
                cb(ctx, EVENT_FINAL, text.as_ptr(), std::ptr::null(), std::ptr::null());
            }
            Event::Error { message } => {
                let message = CString::new(message).unwrap_or_default();
                cb(ctx, EVENT_ERROR, std::ptr::null(), std::ptr::null(), message.as_ptr());
            }
            Event::Warning { message } => {
                // Not part of the C ABI's 3-variant event_type; the host
                // shell doesn't act on it, only the in-process Rust API
                // (dropped-frame telemetry) does.
                log::warn!("{message}");
            }
        }
    });

    match RUNTIME.block_on(pipeline.start_streaming(callback)) {
        Ok(()) => CODE_OK,
        Err(CoreError::Busy) => CODE_REJECTED,
        Err(err) => {
            log::error!("start_streaming failed: {err}");
            CODE_REJECTED
        }
    }
}

#[no_mangle]
pub extern "C" fn stop_streaming(handle: u64) -> i32 {
    let Some(pipeline) = lookup(handle) else {
        return CODE_INVALID_HANDLE;
    };
    RUNTIME.block_on(pipeline.stop_streaming());
    CODE_OK
}

#[no_mangle]
pub extern "C" fn cancel_streaming(handle: u64) -> i32 {
    let Some(pipeline) = lookup(handle) else {
        return CODE_INVALID_HANDLE;
    };
    pipeline.cancel_streaming();
    CODE_OK
}

/// # Safety
/// `config_json` must be a valid, nul-terminated UTF-8 C string pointer
/// for the duration of this call.
#[no_mangle]
pub unsafe extern "C" fn update_config(handle: u64, config_json: *const c_char) -> i32 {
    let Some(pipeline) = lookup(handle) else {
        return CODE_INVALID_HANDLE;
    };
    if config_json.is_null() {
        return CODE_REJECTED;
    }
    let json = match CStr::from_ptr(config_json).to_str() {
        Ok(s) => s,
        Err(_) => return CODE_REJECTED,
    };
    let config = match Config::from_json(json) {
        Ok(c) => c,
        Err(_) => return CODE_REJECTED,
    };
    match RUNTIME.block_on(pipeline.update_config(config)) {
        Ok(()) => CODE_OK,
        Err(_) => CODE_REJECTED,
    }
}

/// Frees a string previously handed to the host as an owned `char*`. No
/// current core operation returns one (callback strings are borrowed for
/// the duration of the call only), but the entry point is kept stable for
/// hosts and future accessors per §6.
///
/// # Safety
/// `ptr` must have been allocated by `CString::into_raw` inside this
/// crate, or be null.
#[no_mangle]
pub unsafe extern "C" fn string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Static, process-lifetime semantic version string.
#[no_mangle]
pub extern "C" fn version() -> *const c_char {
    VERSION_CSTRING.as_ptr()
}
