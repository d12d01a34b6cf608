//! Shared test utilities: an in-process fake libretro core and a recording UI

use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char, c_int, c_uint, c_void};
use std::path::{Path, PathBuf};

use crate::ffi::*;
use crate::loader::CoreApi;
use crate::retro_core::{CoreError, CoreOptions, RetroCore};
use crate::ui::{OwnedFrame, PixelFormat, RetroUi, VideoFrame};

// ============================================================================
// Fake Core
// ============================================================================

/// Behaviour and recorded activity of the fake core on this thread.
pub struct Fake {
    pub library_name: CString,
    pub extensions: CString,
    pub need_fullpath: bool,
    pub no_game: bool,
    /// Quirks reported during `retro_load_game`.
    pub quirks: Option<u64>,
    /// Value the host wrote back for the quirks.
    pub quirks_written: Option<u64>,
    pub serialize_ok: bool,
    pub unserialize_ok: bool,
    pub serialized: Vec<u8>,
    pub unserialized: Option<Vec<u8>>,
    pub loaded_data: Option<Vec<u8>>,
    pub loaded_path: Option<String>,
    pub calls: Vec<&'static str>,
    pub frame_times: Vec<i64>,
    pub button_a: Vec<i16>,
    pub variable_seen: Option<String>,
    pub variable_update: Vec<bool>,
    pub port_devices: Vec<(u32, u32)>,
    /// Announce subsystems, controllers and a memory map on load, query the
    /// host's directories and settings, and adjust AV info while running.
    pub extended_env: bool,
    /// Host answers collected when `extended_env` is set.
    pub answers: EnvAnswers,
    env: Option<retro_environment_t>,
    video: Option<retro_video_refresh_t>,
    audio: Option<retro_audio_sample_t>,
    audio_batch: Option<retro_audio_sample_batch_t>,
    input_poll: Option<retro_input_poll_t>,
    input_state: Option<retro_input_state_t>,
}

impl Default for Fake {
    fn default() -> Self {
        Self {
            library_name: c"Fake Core".to_owned(),
            extensions: c"FAKE|bin|smc|swc".to_owned(),
            need_fullpath: false,
            no_game: false,
            quirks: None,
            quirks_written: None,
            serialize_ok: true,
            unserialize_ok: true,
            serialized: b"fake state bytes".to_vec(),
            unserialized: None,
            loaded_data: None,
            loaded_path: None,
            calls: Vec::new(),
            frame_times: Vec::new(),
            button_a: Vec::new(),
            variable_seen: None,
            variable_update: Vec::new(),
            port_devices: Vec::new(),
            extended_env: false,
            answers: EnvAnswers::default(),
            env: None,
            video: None,
            audio: None,
            audio_batch: None,
            input_poll: None,
            input_state: None,
        }
    }
}

/// What the host answered to the fake core's queries.
#[derive(Debug, Default)]
pub struct EnvAnswers {
    pub system_dir: Option<String>,
    pub save_dir: Option<String>,
    pub assets_dir: Option<String>,
    pub libretro_path: Option<String>,
    pub language: Option<u32>,
    pub av_enable: Option<i32>,
    pub got_log_interface: bool,
    pub null_data_accepted: bool,
    pub unknown_accepted: bool,
}

thread_local! {
    static FAKE: RefCell<Fake> = RefCell::new(Fake::default());
}

/// Inspect or change the fake core's state.
pub fn fake<R>(f: impl FnOnce(&mut Fake) -> R) -> R {
    FAKE.with(|fake| f(&mut fake.borrow_mut()))
}

fn record(call: &'static str) {
    fake(|f| f.calls.push(call));
}

fn env(cmd: c_uint, data: *mut c_void) -> bool {
    let cb = fake(|f| f.env);
    // SAFETY: the host registered this callback.
    cb.is_some_and(|cb| unsafe { cb(cmd, data) })
}

fn env_dir(cmd: c_uint) -> Option<String> {
    let mut dir: *const c_char = std::ptr::null();
    if !env(cmd, (&raw mut dir).cast()) || dir.is_null() {
        return None;
    }
    // SAFETY: the host hands out NUL-terminated strings it keeps alive.
    Some(unsafe { CStr::from_ptr(dir) }.to_string_lossy().into_owned())
}

unsafe extern "C" fn fake_proc_address(_sym: *const c_char) -> Option<retro_proc_address_t> {
    None
}

/// The rarer load-time commands, issued when `extended_env` is set.
fn announce_extras() {
    let memory = [retro_subsystem_memory_info { extension: c"srm".as_ptr(), type_: 0x101 }];
    let roms = [retro_subsystem_rom_info {
        desc: c"Cartridge".as_ptr(),
        valid_extensions: c"FAKE|bin".as_ptr(),
        need_fullpath: true,
        block_extract: false,
        required: true,
        memory: memory.as_ptr(),
        num_memory: 1,
    }];
    let subsystems = [
        retro_subsystem_info {
            desc: c"Link Play".as_ptr(),
            ident: c"link".as_ptr(),
            roms: roms.as_ptr(),
            num_roms: 1,
            id: 1,
        },
        retro_subsystem_info {
            desc: std::ptr::null(),
            ident: std::ptr::null(),
            roms: std::ptr::null(),
            num_roms: 0,
            id: 0,
        },
    ];
    env(RETRO_ENVIRONMENT_SET_SUBSYSTEM_INFO, subsystems.as_ptr().cast_mut().cast());

    let pads = [
        retro_controller_description { desc: c"Gamepad".as_ptr(), id: RETRO_DEVICE_JOYPAD },
        retro_controller_description {
            desc: c"Multitap".as_ptr(),
            id: (1 << RETRO_DEVICE_TYPE_SHIFT) | RETRO_DEVICE_JOYPAD,
        },
    ];
    let controllers = [
        retro_controller_info { types: pads.as_ptr(), num_types: 2 },
        retro_controller_info { types: std::ptr::null(), num_types: 0 },
    ];
    env(RETRO_ENVIRONMENT_SET_CONTROLLER_INFO, controllers.as_ptr().cast_mut().cast());

    let descriptors = [
        retro_memory_descriptor {
            flags: 0,
            ptr: std::ptr::null_mut(),
            offset: 0,
            start: 0x0000,
            select: 0,
            disconnect: 0,
            len: 0x800,
            addrspace: c"WRAM".as_ptr(),
        },
        retro_memory_descriptor {
            flags: 0,
            ptr: std::ptr::null_mut(),
            offset: 0x800,
            start: 0x6000,
            select: 0,
            disconnect: 0,
            len: 0x2000,
            addrspace: c"SRAM".as_ptr(),
        },
    ];
    let mut map = retro_memory_map { descriptors: descriptors.as_ptr(), num_descriptors: 2 };
    env(RETRO_ENVIRONMENT_SET_MEMORY_MAPS, (&raw mut map).cast());

    let mut proc_address =
        retro_get_proc_address_interface { get_proc_address: Some(fake_proc_address) };
    env(RETRO_ENVIRONMENT_SET_PROC_ADDRESS_CALLBACK, (&raw mut proc_address).cast());

    let mut answers = EnvAnswers {
        system_dir: env_dir(RETRO_ENVIRONMENT_GET_SYSTEM_DIRECTORY),
        save_dir: env_dir(RETRO_ENVIRONMENT_GET_SAVE_DIRECTORY),
        assets_dir: env_dir(RETRO_ENVIRONMENT_GET_CORE_ASSETS_DIRECTORY),
        libretro_path: env_dir(RETRO_ENVIRONMENT_GET_LIBRETRO_PATH),
        ..EnvAnswers::default()
    };
    let mut language: c_uint = u32::MAX;
    if env(RETRO_ENVIRONMENT_GET_LANGUAGE, (&raw mut language).cast()) {
        answers.language = Some(language);
    }
    let mut av_enable: c_int = 0;
    if env(RETRO_ENVIRONMENT_GET_AUDIO_VIDEO_ENABLE, (&raw mut av_enable).cast()) {
        answers.av_enable = Some(av_enable);
    }
    let mut log = retro_log_callback { log: None };
    if env(RETRO_ENVIRONMENT_GET_LOG_INTERFACE, (&raw mut log).cast())
        && let Some(log) = log.log
    {
        // SAFETY: a plain format string with no arguments.
        unsafe { log(RETRO_LOG_INFO, c"fake core loaded\n".as_ptr()) };
        answers.got_log_interface = true;
    }
    answers.null_data_accepted = env(RETRO_ENVIRONMENT_GET_CAN_DUPE, std::ptr::null_mut());
    let mut unused: c_uint = 0;
    answers.unknown_accepted = env(0x7ff, (&raw mut unused).cast());
    fake(|f| f.answers = answers);
}

/// The rarer per-frame commands, issued when `extended_env` is set.
fn adjust_while_running() {
    let mut message = retro_message { msg: c"Insert coin".as_ptr(), frames: 180 };
    env(RETRO_ENVIRONMENT_SET_MESSAGE, (&raw mut message).cast());

    let mut av_info = retro_system_av_info {
        geometry: retro_game_geometry {
            base_width: 2,
            base_height: 1,
            max_width: 8,
            max_height: 6,
            aspect_ratio: 2.0,
        },
        timing: retro_system_timing { fps: 50.0, sample_rate: 32000.0 },
    };
    env(RETRO_ENVIRONMENT_SET_SYSTEM_AV_INFO, (&raw mut av_info).cast());

    let mut geometry = retro_game_geometry {
        base_width: 4,
        base_height: 3,
        max_width: 8,
        max_height: 6,
        aspect_ratio: 1.5,
    };
    env(RETRO_ENVIRONMENT_SET_GEOMETRY, (&raw mut geometry).cast());
}

unsafe extern "C" fn fake_init() {
    record("init");
}

unsafe extern "C" fn fake_deinit() {
    record("deinit");
}

unsafe extern "C" fn fake_api_version() -> c_uint {
    RETRO_API_VERSION
}

unsafe extern "C" fn fake_get_system_info(info: *mut retro_system_info) {
    fake(|f| {
        // SAFETY: the host passes a valid out pointer.
        let info = unsafe { &mut *info };
        info.library_name = f.library_name.as_ptr();
        info.library_version = c"1.0".as_ptr();
        info.valid_extensions = f.extensions.as_ptr();
        info.need_fullpath = f.need_fullpath;
        info.block_extract = false;
    });
}

unsafe extern "C" fn fake_get_system_av_info(info: *mut retro_system_av_info) {
    // SAFETY: the host passes a valid out pointer.
    let info = unsafe { &mut *info };
    info.geometry = retro_game_geometry {
        base_width: 2,
        base_height: 1,
        max_width: 2,
        max_height: 1,
        aspect_ratio: 2.0,
    };
    info.timing = retro_system_timing { fps: 60.0, sample_rate: 48000.0 };
}

unsafe extern "C" fn fake_set_controller_port_device(port: c_uint, device: c_uint) {
    fake(|f| f.port_devices.push((port, device)));
}

unsafe extern "C" fn fake_reset() {
    record("reset");
}

unsafe extern "C" fn fake_frame_time(usec: i64) {
    fake(|f| f.frame_times.push(usec));
}

unsafe extern "C" fn fake_run() {
    record("run");
    let (poll, state, video, audio, batch) =
        fake(|f| (f.input_poll, f.input_state, f.video, f.audio, f.audio_batch));
    // SAFETY: the host registered these callbacks; buffers outlive each call.
    unsafe {
        if let Some(poll) = poll {
            poll();
        }
        if let Some(state) = state {
            let a = state(0, RETRO_DEVICE_JOYPAD, 0, RETRO_DEVICE_ID_JOYPAD_A);
            fake(|f| f.button_a.push(a));
        }

        if fake(|f| f.extended_env) {
            adjust_while_running();
        }

        let mut update = false;
        env(RETRO_ENVIRONMENT_GET_VARIABLE_UPDATE, (&raw mut update).cast());
        fake(|f| f.variable_update.push(update));
        let mut var = retro_variable { key: c"fake_speed".as_ptr(), value: std::ptr::null() };
        if env(RETRO_ENVIRONMENT_GET_VARIABLE, (&raw mut var).cast()) && !var.value.is_null() {
            let value = std::ffi::CStr::from_ptr(var.value).to_string_lossy().into_owned();
            fake(|f| f.variable_seen = Some(value));
        }

        let pixels: [u32; 2] = [0x00ff0000, 0x000000ff];
        if let Some(video) = video {
            video(pixels.as_ptr().cast(), 2, 1, 8);
        }
        if let Some(audio) = audio {
            audio(1, -1);
        }
        let samples: [i16; 4] = [10, -10, 20, -20];
        if let Some(batch) = batch {
            batch(samples.as_ptr(), 2);
        }
    }
}

unsafe extern "C" fn fake_set_environment(cb: retro_environment_t) {
    let no_game = fake(|f| {
        f.env = Some(cb);
        f.no_game
    });
    if no_game {
        let mut yes = true;
        env(RETRO_ENVIRONMENT_SET_SUPPORT_NO_GAME, (&raw mut yes).cast());
    }
}

unsafe extern "C" fn fake_set_video_refresh(cb: retro_video_refresh_t) {
    fake(|f| f.video = Some(cb));
}

unsafe extern "C" fn fake_set_audio_sample(cb: retro_audio_sample_t) {
    fake(|f| f.audio = Some(cb));
}

unsafe extern "C" fn fake_set_audio_sample_batch(cb: retro_audio_sample_batch_t) {
    fake(|f| f.audio_batch = Some(cb));
}

unsafe extern "C" fn fake_set_input_poll(cb: retro_input_poll_t) {
    fake(|f| f.input_poll = Some(cb));
}

unsafe extern "C" fn fake_set_input_state(cb: retro_input_state_t) {
    fake(|f| f.input_state = Some(cb));
}

unsafe extern "C" fn fake_load_game(game: *const retro_game_info) -> bool {
    record("load_game");
    if game.is_null() {
        if !fake(|f| f.no_game) {
            return false;
        }
    } else {
        // SAFETY: the host passes a valid game info.
        let game = unsafe { &*game };
        let path = unsafe { std::ffi::CStr::from_ptr(game.path) }.to_string_lossy().into_owned();
        let data = (!game.data.is_null())
            .then(|| unsafe { std::slice::from_raw_parts(game.data.cast::<u8>(), game.size) })
            .map(<[u8]>::to_vec);
        fake(|f| {
            f.loaded_path = Some(path);
            f.loaded_data = data;
        });
    }

    let mut format: c_uint = RETRO_PIXEL_FORMAT_XRGB8888;
    env(RETRO_ENVIRONMENT_SET_PIXEL_FORMAT, (&raw mut format).cast());

    let descriptors = [
        retro_input_descriptor {
            port: 0,
            device: RETRO_DEVICE_JOYPAD,
            index: 0,
            id: RETRO_DEVICE_ID_JOYPAD_A,
            description: c"A".as_ptr(),
        },
        retro_input_descriptor {
            port: 0,
            device: 0,
            index: 0,
            id: 0,
            description: std::ptr::null(),
        },
    ];
    env(RETRO_ENVIRONMENT_SET_INPUT_DESCRIPTORS, descriptors.as_ptr().cast_mut().cast());

    let vars = [
        retro_variable { key: c"fake_speed".as_ptr(), value: c"Speed; normal|fast|turbo".as_ptr() },
        retro_variable { key: std::ptr::null(), value: std::ptr::null() },
    ];
    env(RETRO_ENVIRONMENT_SET_VARIABLES, vars.as_ptr().cast_mut().cast());

    if let Some(mut quirks) = fake(|f| f.quirks) {
        env(RETRO_ENVIRONMENT_SET_SERIALIZATION_QUIRKS, (&raw mut quirks).cast());
        fake(|f| f.quirks_written = Some(quirks));
    }

    let mut level: c_uint = 7;
    env(RETRO_ENVIRONMENT_SET_PERFORMANCE_LEVEL, (&raw mut level).cast());

    let mut frame_time =
        retro_frame_time_callback { callback: Some(fake_frame_time), reference: 16_666 };
    env(RETRO_ENVIRONMENT_SET_FRAME_TIME_CALLBACK, (&raw mut frame_time).cast());

    if fake(|f| f.extended_env) {
        announce_extras();
    }
    true
}

unsafe extern "C" fn fake_unload_game() {
    record("unload_game");
}

unsafe extern "C" fn fake_serialize_size() -> usize {
    fake(|f| f.serialized.len())
}

unsafe extern "C" fn fake_serialize(data: *mut c_void, size: usize) -> bool {
    fake(|f| {
        if !f.serialize_ok || size < f.serialized.len() {
            return false;
        }
        // SAFETY: the host provides `size` writable bytes.
        let out = unsafe { std::slice::from_raw_parts_mut(data.cast::<u8>(), size) };
        out[..f.serialized.len()].copy_from_slice(&f.serialized);
        true
    })
}

unsafe extern "C" fn fake_unserialize(data: *const c_void, size: usize) -> bool {
    // SAFETY: the host provides `size` readable bytes.
    let bytes = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size) }.to_vec();
    fake(|f| {
        f.unserialized = Some(bytes);
        f.unserialize_ok
    })
}

/// Function table pointing at the fake core.
pub fn fake_api() -> CoreApi {
    CoreApi {
        init: fake_init,
        deinit: fake_deinit,
        api_version: fake_api_version,
        get_system_info: fake_get_system_info,
        get_system_av_info: fake_get_system_av_info,
        set_controller_port_device: fake_set_controller_port_device,
        reset: fake_reset,
        run: fake_run,
        set_environment: fake_set_environment,
        set_video_refresh: fake_set_video_refresh,
        set_audio_sample: fake_set_audio_sample,
        set_audio_sample_batch: fake_set_audio_sample_batch,
        set_input_poll: fake_set_input_poll,
        set_input_state: fake_set_input_state,
        load_game: fake_load_game,
        unload_game: fake_unload_game,
        serialize_size: fake_serialize_size,
        serialize: fake_serialize,
        unserialize: fake_unserialize,
        _lib: None,
    }
}

/// Reset the fake, apply `setup`, and load it as a core.
pub fn fake_core(setup: impl FnOnce(&mut Fake)) -> RetroCore {
    fake_core_with(setup, CoreOptions::default())
}

/// Like [`fake_core`] with explicit host options.
pub fn fake_core_with(setup: impl FnOnce(&mut Fake), options: CoreOptions) -> RetroCore {
    fake(|f| {
        *f = Fake::default();
        setup(f);
    });
    add_fake_core(options)
}

/// Load another fake core without resetting recorded state.
///
/// The name and extensions in effect at this point are the ones it reports.
pub fn add_fake_core(options: CoreOptions) -> RetroCore {
    let name = fake(|f| f.library_name.to_string_lossy().into_owned());
    let path = PathBuf::from(format!("/fake/{name}_libretro.so"));
    RetroCore::from_api(path, fake_api(), options).unwrap()
}

/// Stands in for the dynamic loader: every path opens the fake core.
pub fn fake_loader(path: &Path, options: CoreOptions) -> Result<RetroCore, CoreError> {
    RetroCore::from_api(path.to_path_buf(), fake_api(), options)
}

// ============================================================================
// Recording UI
// ============================================================================

#[derive(Default)]
pub struct RecordingUi {
    pub frames: Vec<Option<OwnedFrame>>,
    pub audio: Vec<i16>,
    pub sample_rates: Vec<u32>,
    pub messages: Vec<(String, u32)>,
    pub perf_level: Option<u32>,
}

impl RetroUi for RecordingUi {
    fn video_refresh(&mut self, frame: Option<VideoFrame<'_>>) {
        self.frames.push(frame.map(|f| f.to_owned_frame()));
    }

    fn audio_batch(&mut self, samples: &[i16], frames: usize, sample_rate: u32) -> usize {
        self.audio.extend_from_slice(samples);
        self.sample_rates.push(sample_rate);
        frames
    }

    fn show_message(&mut self, message: &str, frames: u32) {
        self.messages.push((message.to_string(), frames));
    }

    fn set_perf_level(&mut self, level: u32) {
        self.perf_level = Some(level);
    }
}

impl RecordingUi {
    pub fn last_format(&self) -> Option<PixelFormat> {
        self.frames.iter().rev().flatten().next().map(|f| f.format)
    }
}
