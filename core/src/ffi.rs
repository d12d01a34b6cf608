//! libretro C ABI declarations
//!
//! Mirrors the subset of `libretro.h` the host uses. Struct layouts must
//! match the C header exactly.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_uint, c_void};

pub const RETRO_API_VERSION: c_uint = 1;

// Devices
pub const RETRO_DEVICE_TYPE_SHIFT: c_uint = 8;
pub const RETRO_DEVICE_MASK: c_uint = (1 << RETRO_DEVICE_TYPE_SHIFT) - 1;
pub const RETRO_DEVICE_NONE: c_uint = 0;
pub const RETRO_DEVICE_JOYPAD: c_uint = 1;
pub const RETRO_DEVICE_MOUSE: c_uint = 2;
pub const RETRO_DEVICE_KEYBOARD: c_uint = 3;
pub const RETRO_DEVICE_LIGHTGUN: c_uint = 4;
pub const RETRO_DEVICE_ANALOG: c_uint = 5;
pub const RETRO_DEVICE_POINTER: c_uint = 6;

// Joypad buttons
pub const RETRO_DEVICE_ID_JOYPAD_B: c_uint = 0;
pub const RETRO_DEVICE_ID_JOYPAD_Y: c_uint = 1;
pub const RETRO_DEVICE_ID_JOYPAD_SELECT: c_uint = 2;
pub const RETRO_DEVICE_ID_JOYPAD_START: c_uint = 3;
pub const RETRO_DEVICE_ID_JOYPAD_UP: c_uint = 4;
pub const RETRO_DEVICE_ID_JOYPAD_DOWN: c_uint = 5;
pub const RETRO_DEVICE_ID_JOYPAD_LEFT: c_uint = 6;
pub const RETRO_DEVICE_ID_JOYPAD_RIGHT: c_uint = 7;
pub const RETRO_DEVICE_ID_JOYPAD_A: c_uint = 8;
pub const RETRO_DEVICE_ID_JOYPAD_X: c_uint = 9;
pub const RETRO_DEVICE_ID_JOYPAD_L: c_uint = 10;
pub const RETRO_DEVICE_ID_JOYPAD_R: c_uint = 11;
pub const RETRO_DEVICE_ID_JOYPAD_L2: c_uint = 12;
pub const RETRO_DEVICE_ID_JOYPAD_R2: c_uint = 13;
pub const RETRO_DEVICE_ID_JOYPAD_L3: c_uint = 14;
pub const RETRO_DEVICE_ID_JOYPAD_R3: c_uint = 15;

// Mouse
pub const RETRO_DEVICE_ID_MOUSE_X: c_uint = 0;
pub const RETRO_DEVICE_ID_MOUSE_Y: c_uint = 1;
pub const RETRO_DEVICE_ID_MOUSE_LEFT: c_uint = 2;

// Lightgun
pub const RETRO_DEVICE_ID_LIGHTGUN_TRIGGER: c_uint = 2;
pub const RETRO_DEVICE_ID_LIGHTGUN_SCREEN_X: c_uint = 13;
pub const RETRO_DEVICE_ID_LIGHTGUN_SCREEN_Y: c_uint = 14;
pub const RETRO_DEVICE_ID_LIGHTGUN_IS_OFFSCREEN: c_uint = 15;

// Pointer
pub const RETRO_DEVICE_ID_POINTER_X: c_uint = 0;
pub const RETRO_DEVICE_ID_POINTER_Y: c_uint = 1;
pub const RETRO_DEVICE_ID_POINTER_PRESSED: c_uint = 2;
pub const RETRO_DEVICE_ID_POINTER_COUNT: c_uint = 3;

/// Number of keyboard key codes (`RETROK_LAST`).
pub const RETROK_LAST: usize = 324;

// Environment commands
pub const RETRO_ENVIRONMENT_EXPERIMENTAL: c_uint = 0x10000;
pub const RETRO_ENVIRONMENT_SET_ROTATION: c_uint = 1;
pub const RETRO_ENVIRONMENT_GET_OVERSCAN: c_uint = 2;
pub const RETRO_ENVIRONMENT_GET_CAN_DUPE: c_uint = 3;
pub const RETRO_ENVIRONMENT_SET_MESSAGE: c_uint = 6;
pub const RETRO_ENVIRONMENT_SHUTDOWN: c_uint = 7;
pub const RETRO_ENVIRONMENT_SET_PERFORMANCE_LEVEL: c_uint = 8;
pub const RETRO_ENVIRONMENT_GET_SYSTEM_DIRECTORY: c_uint = 9;
pub const RETRO_ENVIRONMENT_SET_PIXEL_FORMAT: c_uint = 10;
pub const RETRO_ENVIRONMENT_SET_INPUT_DESCRIPTORS: c_uint = 11;
pub const RETRO_ENVIRONMENT_GET_VARIABLE: c_uint = 15;
pub const RETRO_ENVIRONMENT_SET_VARIABLES: c_uint = 16;
pub const RETRO_ENVIRONMENT_GET_VARIABLE_UPDATE: c_uint = 17;
pub const RETRO_ENVIRONMENT_SET_SUPPORT_NO_GAME: c_uint = 18;
pub const RETRO_ENVIRONMENT_GET_LIBRETRO_PATH: c_uint = 19;
pub const RETRO_ENVIRONMENT_SET_FRAME_TIME_CALLBACK: c_uint = 21;
pub const RETRO_ENVIRONMENT_GET_LOG_INTERFACE: c_uint = 27;
pub const RETRO_ENVIRONMENT_GET_CORE_ASSETS_DIRECTORY: c_uint = 30;
pub const RETRO_ENVIRONMENT_GET_SAVE_DIRECTORY: c_uint = 31;
pub const RETRO_ENVIRONMENT_SET_SYSTEM_AV_INFO: c_uint = 32;
pub const RETRO_ENVIRONMENT_SET_PROC_ADDRESS_CALLBACK: c_uint = 33;
pub const RETRO_ENVIRONMENT_SET_SUBSYSTEM_INFO: c_uint = 34;
pub const RETRO_ENVIRONMENT_SET_CONTROLLER_INFO: c_uint = 35;
pub const RETRO_ENVIRONMENT_SET_MEMORY_MAPS: c_uint = 36;
pub const RETRO_ENVIRONMENT_SET_GEOMETRY: c_uint = 37;
pub const RETRO_ENVIRONMENT_GET_USERNAME: c_uint = 38;
pub const RETRO_ENVIRONMENT_GET_LANGUAGE: c_uint = 39;
pub const RETRO_ENVIRONMENT_SET_SUPPORT_ACHIEVEMENTS: c_uint = 42;
pub const RETRO_ENVIRONMENT_SET_SERIALIZATION_QUIRKS: c_uint = 44;
pub const RETRO_ENVIRONMENT_GET_AUDIO_VIDEO_ENABLE: c_uint = 47;
pub const RETRO_ENVIRONMENT_GET_INPUT_BITMASKS: c_uint = 51;
pub const RETRO_ENVIRONMENT_GET_CORE_OPTIONS_VERSION: c_uint = 52;

// Pixel formats
pub const RETRO_PIXEL_FORMAT_0RGB1555: c_uint = 0;
pub const RETRO_PIXEL_FORMAT_XRGB8888: c_uint = 1;
pub const RETRO_PIXEL_FORMAT_RGB565: c_uint = 2;

// Serialization quirks
pub const RETRO_SERIALIZATION_QUIRK_INCOMPLETE: u64 = 1 << 0;
pub const RETRO_SERIALIZATION_QUIRK_MUST_INITIALIZE: u64 = 1 << 1;
pub const RETRO_SERIALIZATION_QUIRK_CORE_VARIABLE_SIZE: u64 = 1 << 2;
pub const RETRO_SERIALIZATION_QUIRK_FRONT_VARIABLE_SIZE: u64 = 1 << 3;
pub const RETRO_SERIALIZATION_QUIRK_SINGLE_SESSION: u64 = 1 << 4;
pub const RETRO_SERIALIZATION_QUIRK_ENDIAN_DEPENDENT: u64 = 1 << 5;
pub const RETRO_SERIALIZATION_QUIRK_PLATFORM_DEPENDENT: u64 = 1 << 6;

// Log levels
pub const RETRO_LOG_DEBUG: c_uint = 0;
pub const RETRO_LOG_INFO: c_uint = 1;
pub const RETRO_LOG_WARN: c_uint = 2;
pub const RETRO_LOG_ERROR: c_uint = 3;

pub const RETRO_LANGUAGE_ENGLISH: c_uint = 0;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct retro_system_info {
    pub library_name: *const c_char,
    pub library_version: *const c_char,
    pub valid_extensions: *const c_char,
    pub need_fullpath: bool,
    pub block_extract: bool,
}

impl Default for retro_system_info {
    fn default() -> Self {
        Self {
            library_name: std::ptr::null(),
            library_version: std::ptr::null(),
            valid_extensions: std::ptr::null(),
            need_fullpath: false,
            block_extract: false,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct retro_game_geometry {
    pub base_width: c_uint,
    pub base_height: c_uint,
    pub max_width: c_uint,
    pub max_height: c_uint,
    pub aspect_ratio: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct retro_system_timing {
    pub fps: f64,
    pub sample_rate: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct retro_system_av_info {
    pub geometry: retro_game_geometry,
    pub timing: retro_system_timing,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct retro_game_info {
    pub path: *const c_char,
    pub data: *const c_void,
    pub size: usize,
    pub meta: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct retro_variable {
    pub key: *const c_char,
    pub value: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct retro_input_descriptor {
    pub port: c_uint,
    pub device: c_uint,
    pub index: c_uint,
    pub id: c_uint,
    pub description: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct retro_controller_description {
    pub desc: *const c_char,
    pub id: c_uint,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct retro_controller_info {
    pub types: *const retro_controller_description,
    pub num_types: c_uint,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct retro_message {
    pub msg: *const c_char,
    pub frames: c_uint,
}

/// `retro_log_printf_t`. The host installs a non-variadic shim behind it.
pub type retro_log_printf_t = unsafe extern "C" fn(level: c_uint, fmt: *const c_char, ...);

#[repr(C)]
pub struct retro_log_callback {
    pub log: Option<retro_log_printf_t>,
}

pub type retro_frame_time_callback_t = unsafe extern "C" fn(usec: i64);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct retro_frame_time_callback {
    pub callback: Option<retro_frame_time_callback_t>,
    pub reference: i64,
}

pub type retro_proc_address_t = unsafe extern "C" fn();
pub type retro_get_proc_address_t =
    unsafe extern "C" fn(sym: *const c_char) -> Option<retro_proc_address_t>;

#[repr(C)]
pub struct retro_get_proc_address_interface {
    pub get_proc_address: Option<retro_get_proc_address_t>,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct retro_subsystem_memory_info {
    pub extension: *const c_char,
    pub type_: c_uint,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct retro_subsystem_rom_info {
    pub desc: *const c_char,
    pub valid_extensions: *const c_char,
    pub need_fullpath: bool,
    pub block_extract: bool,
    pub required: bool,
    pub memory: *const retro_subsystem_memory_info,
    pub num_memory: c_uint,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct retro_subsystem_info {
    pub desc: *const c_char,
    pub ident: *const c_char,
    pub roms: *const retro_subsystem_rom_info,
    pub num_roms: c_uint,
    pub id: c_uint,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct retro_memory_descriptor {
    pub flags: u64,
    pub ptr: *mut c_void,
    pub offset: usize,
    pub start: usize,
    pub select: usize,
    pub disconnect: usize,
    pub len: usize,
    pub addrspace: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct retro_memory_map {
    pub descriptors: *const retro_memory_descriptor,
    pub num_descriptors: c_uint,
}

// Host callbacks handed to the core
pub type retro_environment_t = unsafe extern "C" fn(cmd: c_uint, data: *mut c_void) -> bool;
pub type retro_video_refresh_t =
    unsafe extern "C" fn(data: *const c_void, width: c_uint, height: c_uint, pitch: usize);
pub type retro_audio_sample_t = unsafe extern "C" fn(left: i16, right: i16);
pub type retro_audio_sample_batch_t =
    unsafe extern "C" fn(data: *const i16, frames: usize) -> usize;
pub type retro_input_poll_t = unsafe extern "C" fn();
pub type retro_input_state_t =
    unsafe extern "C" fn(port: c_uint, device: c_uint, index: c_uint, id: c_uint) -> i16;

// Core entry points
pub type retro_init_fn = unsafe extern "C" fn();
pub type retro_deinit_fn = unsafe extern "C" fn();
pub type retro_api_version_fn = unsafe extern "C" fn() -> c_uint;
pub type retro_get_system_info_fn = unsafe extern "C" fn(info: *mut retro_system_info);
pub type retro_get_system_av_info_fn = unsafe extern "C" fn(info: *mut retro_system_av_info);
pub type retro_set_controller_port_device_fn = unsafe extern "C" fn(port: c_uint, device: c_uint);
pub type retro_reset_fn = unsafe extern "C" fn();
pub type retro_run_fn = unsafe extern "C" fn();
pub type retro_set_environment_fn = unsafe extern "C" fn(cb: retro_environment_t);
pub type retro_set_video_refresh_fn = unsafe extern "C" fn(cb: retro_video_refresh_t);
pub type retro_set_audio_sample_fn = unsafe extern "C" fn(cb: retro_audio_sample_t);
pub type retro_set_audio_sample_batch_fn = unsafe extern "C" fn(cb: retro_audio_sample_batch_t);
pub type retro_set_input_poll_fn = unsafe extern "C" fn(cb: retro_input_poll_t);
pub type retro_set_input_state_fn = unsafe extern "C" fn(cb: retro_input_state_t);
pub type retro_load_game_fn = unsafe extern "C" fn(game: *const retro_game_info) -> bool;
pub type retro_unload_game_fn = unsafe extern "C" fn();
pub type retro_serialize_size_fn = unsafe extern "C" fn() -> usize;
pub type retro_serialize_fn = unsafe extern "C" fn(data: *mut c_void, size: usize) -> bool;
pub type retro_unserialize_fn = unsafe extern "C" fn(data: *const c_void, size: usize) -> bool;
