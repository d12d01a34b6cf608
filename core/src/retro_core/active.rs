//! The active-core slot and the C callbacks registered with every core
//!
//! libretro callbacks carry no user pointer, so the host records which core
//! is currently executing plugin code in a thread-local slot. Every call into
//! a plugin holds an [`ActiveGuard`]; callbacks arriving while no guard is
//! held are counted as errors and answered with neutral values.

use std::cell::Cell;
use std::ffi::{CStr, c_char, c_uint, c_void};
use std::marker::PhantomData;
use std::ptr::NonNull;

use tracing::error;

use super::{CoreError, CoreState, environment};
use crate::ffi::*;
use crate::ui::{RetroUi, VideoFrame};

/// Errors beyond this count are no longer logged.
const NOISY_LIMIT: u32 = 10;

thread_local! {
    static ACTIVE: Cell<Option<NonNull<CoreState>>> = const { Cell::new(None) };
    /// Callbacks that arrived with no active core.
    static STRAY_CALLS: Cell<u32> = const { Cell::new(0) };
}

/// Holds the active-core slot for the duration of a plugin call.
///
/// Releases the slot and detaches any UI when dropped.
pub(crate) struct ActiveGuard<'ui> {
    state: NonNull<CoreState>,
    _ui: PhantomData<&'ui mut dyn RetroUi>,
}

impl<'ui> ActiveGuard<'ui> {
    /// Claim the slot for `state`. Fails with [`CoreError::Busy`] when another
    /// call (of this or any core) is already in progress on this thread.
    pub(crate) fn acquire(state: NonNull<CoreState>) -> Result<Self, CoreError> {
        ACTIVE.with(|slot| {
            if slot.get().is_some() {
                return Err(CoreError::Busy);
            }
            slot.set(Some(state));
            Ok(Self { state, _ui: PhantomData })
        })
    }

    /// Route video, audio and messages to `ui` until the guard drops.
    pub(crate) fn attach_ui(&mut self, ui: &'ui mut dyn RetroUi) {
        let ptr: *mut (dyn RetroUi + 'ui) = ui;
        // SAFETY: only the trait object lifetime is erased. The pointer is
        // cleared in Drop, before 'ui ends.
        let ptr: *mut (dyn RetroUi + 'static) = unsafe { std::mem::transmute(ptr) };
        // SAFETY: the slot owner has exclusive access to its state between plugin calls.
        unsafe { (*self.state.as_ptr()).ui = Some(ptr) };
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: see attach_ui.
        unsafe { (*self.state.as_ptr()).ui = None };
        ACTIVE.with(|slot| slot.set(None));
    }
}

/// Whether a core call is in progress on this thread.
pub fn is_core_active() -> bool {
    ACTIVE.with(|slot| slot.get().is_some())
}

/// Run `f` on the active core's state, or log a spurious callback.
fn with_active<R>(what: &str, fallback: R, f: impl FnOnce(&mut CoreState) -> R) -> R {
    match ACTIVE.with(Cell::get) {
        // SAFETY: the slot only holds pointers to live states, and the host
        // holds no reference into the state while plugin code runs.
        Some(mut ptr) => f(unsafe { ptr.as_mut() }),
        None => {
            if note_stray_call() {
                error!("{} called with no active core", what);
            }
            fallback
        }
    }
}

/// Count a callback with no core to charge it to, like [`CoreState::note_error`].
fn note_stray_call() -> bool {
    let count = STRAY_CALLS.with(|c| {
        let n = c.get().saturating_add(1);
        c.set(n);
        n
    });
    count <= NOISY_LIMIT
}

impl CoreState {
    /// Count an error, returning whether it should still be logged.
    pub(crate) fn note_error(&mut self) -> bool {
        self.error_count = self.error_count.saturating_add(1);
        self.error_count <= NOISY_LIMIT
    }

    /// The attached UI, or a logged error when called outside a frame.
    fn ui_or_complain(&mut self, what: &str) -> Option<&mut dyn RetroUi> {
        match self.ui {
            // SAFETY: set by ActiveGuard::attach_ui and cleared before the borrow ends.
            Some(ui) => Some(unsafe { &mut *ui }),
            None => {
                if self.note_error() {
                    error!("{} outside of normal context", what);
                }
                None
            }
        }
    }

    fn sample_rate_or_complain(&mut self, what: &str) -> Option<u32> {
        let rate = self.av_info.timing.sample_rate;
        if rate > 0.0 {
            Some(rate as u32)
        } else {
            if self.note_error() {
                error!("{} without sample_rate", what);
            }
            None
        }
    }
}

pub(crate) unsafe extern "C" fn environment_cb(cmd: c_uint, data: *mut c_void) -> bool {
    with_active("environment", false, |state| {
        // SAFETY: data is the command's argument as defined by libretro.h.
        unsafe { environment::dispatch(state, cmd, data) }
    })
}

pub(crate) unsafe extern "C" fn video_refresh_cb(
    data: *const c_void,
    width: c_uint,
    height: c_uint,
    pitch: usize,
) {
    with_active("video_refresh", (), |state| {
        let format = state.pixel_format;
        let Some(ui) = state.ui_or_complain("video_refresh") else {
            return;
        };
        if data.is_null() {
            ui.video_refresh(None);
            return;
        }
        let len = VideoFrame::required_len(width, height, pitch, format);
        // SAFETY: the core guarantees `height` rows of `pitch` bytes at `data`.
        let pixels = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), len) };
        ui.video_refresh(Some(VideoFrame { data: pixels, width, height, pitch, format }));
    })
}

pub(crate) unsafe extern "C" fn audio_sample_cb(left: i16, right: i16) {
    with_active("audio_sample", (), |state| {
        let Some(rate) = state.sample_rate_or_complain("audio_sample") else {
            return;
        };
        if let Some(ui) = state.ui_or_complain("audio_sample") {
            ui.audio_batch(&[left, right], 1, rate);
        }
    })
}

pub(crate) unsafe extern "C" fn audio_sample_batch_cb(data: *const i16, frames: usize) -> usize {
    with_active("audio_sample_batch", frames, |state| {
        let Some(rate) = state.sample_rate_or_complain("audio_sample_batch") else {
            return frames;
        };
        let Some(ui) = state.ui_or_complain("audio_sample_batch") else {
            return frames;
        };
        if data.is_null() || frames == 0 {
            return 0;
        }
        // SAFETY: `frames` interleaved stereo samples at `data`.
        let samples = unsafe { std::slice::from_raw_parts(data, frames * 2) };
        ui.audio_batch(samples, frames, rate)
    })
}

pub(crate) unsafe extern "C" fn input_poll_cb() {
    with_active("input_poll", (), |state| {
        if state.ui.is_none() {
            if state.note_error() {
                error!("input_poll outside of normal context");
            }
            return;
        }
        state.input.poll();
    })
}

pub(crate) unsafe extern "C" fn input_state_cb(
    port: c_uint,
    device: c_uint,
    index: c_uint,
    id: c_uint,
) -> i16 {
    with_active("input_state", 0, |state| {
        if state.ui.is_none() {
            if state.note_error() {
                error!("input_state outside of normal context");
            }
            return 0;
        }
        match state.input.query(port, device, index, id) {
            Ok(value) => value,
            Err(e) => {
                if state.note_error() {
                    error!("{}", e);
                }
                0
            }
        }
    })
}

/// Non-variadic stand-in for `retro_log_printf_t`.
///
/// The format string is forwarded as-is; printf arguments are not expanded.
unsafe extern "C" fn log_shim(level: c_uint, fmt: *const c_char) {
    if fmt.is_null() {
        return;
    }
    // SAFETY: cores pass a NUL-terminated format string.
    let text = unsafe { CStr::from_ptr(fmt) }.to_string_lossy();
    let level = match level {
        RETRO_LOG_DEBUG => log::Level::Debug,
        RETRO_LOG_INFO => log::Level::Info,
        RETRO_LOG_WARN => log::Level::Warn,
        RETRO_LOG_ERROR => log::Level::Error,
        _ => log::Level::Trace,
    };
    log::log!(target: "retro_core", level, "{}", text.trim_end());
}

/// The log callback handed out for `GET_LOG_INTERFACE`.
pub(crate) fn log_printf() -> retro_log_printf_t {
    type Shim = unsafe extern "C" fn(c_uint, *const c_char);
    let shim: Shim = log_shim;
    // SAFETY: on the supported C ABIs the fixed leading arguments of a
    // variadic call are passed exactly as for a non-variadic call.
    unsafe { std::mem::transmute::<Shim, retro_log_printf_t>(shim) }
}
