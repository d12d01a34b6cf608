//! A loaded libretro core
//!
//! [`RetroCore`] owns a core's function table and all host-side state the
//! core can observe through callbacks. Its lifecycle is
//! `loaded -> inited -> game loaded <-> reset`; dropping it unwinds only the
//! steps that were reached.
//!
//! Plugin calls go through the active-core slot (see [`active`]), so at most
//! one core per thread executes plugin code at a time.

pub(crate) mod active;
pub mod environment;
pub mod input;
pub mod variables;


use std::ffi::{CStr, CString, c_char};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::time::Instant;

use hashbrown::HashMap;
use retrohost_shared::save_format;
use retrohost_shared::{MAX_SAVE_DATA_LEN, SaveFlags, SaveFormatError, SaveState};
use tracing::{info, warn};

use crate::ffi::*;
use crate::loader::CoreApi;
use crate::ui::{PixelFormat, RetroUi};
use active::ActiveGuard;
use input::InputState;
use variables::{VariableError, Variables};

pub use active::is_core_active;

/// Frames after launch during which a failed save counts as "too early"
/// for cores that report `MUST_INITIALIZE`.
pub const DEFAULT_TOO_EARLY_FRAMES: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("failed to load core {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("core is missing symbol {symbol}")]
    MissingSymbol { symbol: &'static str },

    #[error("another core call is already in progress")]
    Busy,

    #[error("core needs a ROM but none was set")]
    NeedsRom,

    #[error("core wants block_extract, which is not supported")]
    BlockExtract,

    #[error("path {} cannot be passed to a core", .0.display())]
    InvalidPath(PathBuf),

    #[error("failed to read ROM {}: {source}", path.display())]
    RomRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("retro_load_game failed (no_rom={no_rom})")]
    LoadGameFailed { no_rom: bool },
}

#[derive(Debug, thiserror::Error)]
pub enum SaveStateError {
    #[error("core says SINGLE_SESSION; refusing to save")]
    SingleSession,

    #[error("retro_serialize_size {size} larger than {max}", max = MAX_SAVE_DATA_LEN)]
    TooLarge { size: usize },

    #[error("retro_serialize failed at startup ({frames} frames); try again later")]
    TooEarly { frames: u64 },

    #[error("retro_serialize failed")]
    SerializeFailed,

    #[error("another core call is already in progress")]
    Busy,

    #[error(transparent)]
    Format(#[from] SaveFormatError),
}

impl SaveStateError {
    /// The save may succeed once the core has run longer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TooEarly { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadStateError {
    #[error(transparent)]
    Format(#[from] SaveFormatError),

    #[error("retro_unserialize failed; core was reset")]
    UnserializeFailed,

    #[error("another core call is already in progress")]
    Busy,
}

/// Directories handed to cores through the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreDirs {
    pub cores: PathBuf,
    pub system: PathBuf,
    pub saves: PathBuf,
}

/// Host settings applied to every core.
#[derive(Debug, Clone)]
pub struct CoreOptions {
    pub dirs: CoreDirs,
    pub too_early_frames: u64,
    pub variable_overrides: HashMap<String, String>,
    pub map_keys_to_joypad: bool,
    /// RETROK key code to joypad button id.
    pub key_to_joypad: Vec<(usize, u32)>,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            dirs: CoreDirs::default(),
            too_early_frames: DEFAULT_TOO_EARLY_FRAMES,
            variable_overrides: HashMap::new(),
            map_keys_to_joypad: true,
            key_to_joypad: Vec::new(),
        }
    }
}

/// A ROM image variant a subsystem accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemRom {
    pub description: String,
    pub extensions: Vec<String>,
    pub need_fullpath: bool,
    pub block_extract: bool,
    pub required: bool,
    pub memory: Vec<SubsystemMemory>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemMemory {
    pub memory_type: u32,
    pub extension: String,
}

/// A special game type, e.g. a multi-cartridge setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subsystem {
    pub id: u32,
    pub description: String,
    pub ident: String,
    pub roms: Vec<SubsystemRom>,
}

/// One region of the core's memory map. `ptr` is an address inside the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDescriptor {
    pub flags: u64,
    pub ptr: usize,
    pub offset: usize,
    pub start: usize,
    pub select: usize,
    pub disconnect: usize,
    pub len: usize,
    pub addrspace: String,
}

/// Directory strings kept alive for the core.
pub(crate) struct CDirs {
    pub(crate) cores: CString,
    pub(crate) system: CString,
    pub(crate) saves: CString,
}

/// Everything callbacks may touch. Lives at a stable heap address.
pub(crate) struct CoreState {
    pub(crate) dirs: CDirs,
    pub(crate) pixel_format: PixelFormat,
    pub(crate) av_info: retro_system_av_info,
    pub(crate) input: InputState,
    pub(crate) variables: Variables,
    pub(crate) need_change: bool,
    pub(crate) serialize_quirks: u64,
    pub(crate) no_rom: bool,
    pub(crate) frame_time: retro_frame_time_callback,
    pub(crate) get_proc_address: Option<retro_get_proc_address_t>,
    pub(crate) subsystems: Vec<Subsystem>,
    pub(crate) memory_map: Vec<MemoryDescriptor>,
    pub(crate) frame_count: u64,
    pub(crate) pending_perf_level: Option<u32>,
    pub(crate) last_frame_at: Option<Instant>,
    pub(crate) error_count: u32,
    pub(crate) ui: Option<*mut dyn RetroUi>,
}

impl CoreState {
    fn new(options: &CoreOptions) -> Result<Self, CoreError> {
        Ok(Self {
            dirs: CDirs {
                cores: path_to_cstring(&options.dirs.cores)?,
                system: path_to_cstring(&options.dirs.system)?,
                saves: path_to_cstring(&options.dirs.saves)?,
            },
            pixel_format: PixelFormat::Rgb1555,
            av_info: retro_system_av_info::default(),
            input: InputState::new(options.map_keys_to_joypad, options.key_to_joypad.clone()),
            variables: Variables::new(options.variable_overrides.clone()),
            need_change: false,
            serialize_quirks: 0,
            no_rom: false,
            frame_time: retro_frame_time_callback::default(),
            get_proc_address: None,
            subsystems: Vec::new(),
            memory_map: Vec::new(),
            frame_count: 0,
            pending_perf_level: None,
            last_frame_at: None,
            error_count: 0,
            ui: None,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(&CoreOptions::default()).unwrap()
    }
}

pub(crate) fn path_to_cstring(path: &Path) -> Result<CString, CoreError> {
    CString::new(path.to_string_lossy().into_owned())
        .map_err(|_| CoreError::InvalidPath(path.to_path_buf()))
}

/// Copy a C string, or return an empty string for NULL.
///
/// # Safety
/// `ptr` must be NULL or point to a NUL-terminated string.
pub(crate) unsafe fn c_string_lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: non-null and NUL-terminated per the caller.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// Filter a core's `valid_extensions`. `swc` and `fig` are kept only when the
/// core does not also take `smc`.
pub(crate) fn supported_extensions(name: &str, list: &str) -> Vec<String> {
    let mut support = Vec::new();
    let (mut want_swc, mut want_fig) = (false, false);
    for ext in environment::split_extensions(list) {
        match ext.as_str() {
            "swc" => want_swc = true,
            "fig" => want_fig = true,
            _ => support.push(ext),
        }
    }
    let have_smc = support.iter().any(|e| e == "smc");
    for (wanted, ext) in [(want_swc, "swc"), (want_fig, "fig")] {
        if wanted && !have_smc {
            warn!("core {} supports \"{}\" without \"smc\"", name, ext);
            support.push(ext.to_string());
        }
    }
    support
}

/// A dynamically loaded libretro core.
pub struct RetroCore {
    path: PathBuf,
    api: CoreApi,
    state: NonNull<CoreState>,
    name: String,
    version: String,
    support: Vec<String>,
    need_fullpath: bool,
    block_extract: bool,
    inited: bool,
    game_loaded: bool,
    rom_path: Option<PathBuf>,
    rom_size: u64,
    rom_data: Vec<u8>,
    rom_path_c: Option<CString>,
    too_early_frames: u64,
}

impl RetroCore {
    /// Load the core library at `path`, query it and register the host callbacks.
    pub fn load(path: impl AsRef<Path>, options: CoreOptions) -> Result<Self, CoreError> {
        let path = path.as_ref().to_path_buf();
        let api = CoreApi::open(&path)?;
        Self::from_api(path, api, options)
    }

    /// Wrap an already resolved function table.
    pub(crate) fn from_api(
        path: PathBuf,
        api: CoreApi,
        options: CoreOptions,
    ) -> Result<Self, CoreError> {
        let state = NonNull::from(Box::leak(Box::new(CoreState::new(&options)?)));
        let mut core = Self {
            path,
            api,
            state,
            name: String::new(),
            version: String::new(),
            support: Vec::new(),
            need_fullpath: false,
            block_extract: false,
            inited: false,
            game_loaded: false,
            rom_path: None,
            rom_size: 0,
            rom_data: Vec::new(),
            rom_path_c: None,
            too_early_frames: options.too_early_frames,
        };

        let guard = ActiveGuard::acquire(core.state)?;
        let mut info = retro_system_info::default();
        // SAFETY: the slot is held and `info` outlives the call.
        let api_version = unsafe {
            (core.api.get_system_info)(&mut info);
            (core.api.api_version)()
        };
        // SAFETY: library strings are static for the library's lifetime.
        unsafe {
            core.name = c_string_lossy(info.library_name).to_lowercase();
            core.version = c_string_lossy(info.library_version);
            core.support = supported_extensions(&core.name, &c_string_lossy(info.valid_extensions));
        }
        core.need_fullpath = info.need_fullpath;
        core.block_extract = info.block_extract;
        if api_version != RETRO_API_VERSION {
            warn!(
                "loaded \"{}\" API v.{} (want {}) - may break",
                core.name, api_version, RETRO_API_VERSION
            );
        }
        // SAFETY: the callbacks are valid for the life of the process.
        unsafe {
            (core.api.set_environment)(active::environment_cb);
            (core.api.set_video_refresh)(active::video_refresh_cb);
            (core.api.set_audio_sample)(active::audio_sample_cb);
            (core.api.set_audio_sample_batch)(active::audio_sample_batch_cb);
            (core.api.set_input_poll)(active::input_poll_cb);
            (core.api.set_input_state)(active::input_state_cb);
        }
        drop(guard);
        core.state_mut().need_change = true;
        info!("Loaded core \"{}\" {} from {}", core.name, core.version, core.path.display());
        Ok(core)
    }

    fn state(&self) -> &CoreState {
        // SAFETY: allocated in from_api, freed only in Drop. No callback runs
        // while &self is borrowed outside a plugin call.
        unsafe { self.state.as_ref() }
    }

    fn state_mut(&mut self) -> &mut CoreState {
        // SAFETY: see state().
        unsafe { self.state.as_mut() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Declared `library_name`, lowercased.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// File extensions this core accepts.
    pub fn support(&self) -> &[String] {
        &self.support
    }

    pub fn supports(&self, file_type: &str) -> bool {
        self.support.iter().any(|e| e == file_type)
    }

    /// The core runs without a game file.
    pub fn no_rom(&self) -> bool {
        self.state().no_rom
    }

    pub fn need_fullpath(&self) -> bool {
        self.need_fullpath
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.state().pixel_format
    }

    pub fn av_info(&self) -> retro_system_av_info {
        self.state().av_info
    }

    pub fn frame_count(&self) -> u64 {
        self.state().frame_count
    }

    pub fn serialize_quirks(&self) -> u64 {
        self.state().serialize_quirks
    }

    pub fn subsystems(&self) -> &[Subsystem] {
        &self.state().subsystems
    }

    pub fn memory_map(&self) -> &[MemoryDescriptor] {
        &self.state().memory_map
    }

    pub fn has_proc_address_callback(&self) -> bool {
        self.state().get_proc_address.is_some()
    }

    pub fn is_game_loaded(&self) -> bool {
        self.game_loaded
    }

    pub fn input(&self) -> &InputState {
        &self.state().input
    }

    /// Host-side input (keys, mouse, joypad state).
    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.state_mut().input
    }

    pub fn update_joypad(&mut self, port: u32, id: u32, state: i16) {
        self.input_mut().update_joypad(port, id, state);
    }

    pub fn variables(&self) -> &Variables {
        &self.state().variables
    }

    pub fn set_variable(&mut self, key: &str, value: &str) -> Result<(), VariableError> {
        self.state_mut().variables.set(key, value)
    }

    pub fn set_variable_to_next(&mut self, key: &str) -> Result<(), VariableError> {
        self.state_mut().variables.set_to_next(key)
    }

    /// Choose the ROM the next [`launch_rom`](Self::launch_rom) loads.
    pub fn set_rom_path(&mut self, path: impl Into<PathBuf>, size: u64) {
        self.rom_path = Some(path.into());
        self.rom_size = size;
    }

    pub fn rom_path(&self) -> Option<&Path> {
        self.rom_path.as_deref()
    }

    pub fn rom_size(&self) -> u64 {
        self.rom_size
    }

    /// Initialize the core if needed and (re)load the game.
    pub fn launch_rom(&mut self) -> Result<(), CoreError> {
        let guard = ActiveGuard::acquire(self.state)?;
        if !self.inited {
            self.state_mut().input.clear_ports();
            // SAFETY: slot held.
            unsafe { (self.api.init)() };
            self.inited = true;
        }
        if self.game_loaded {
            // SAFETY: slot held.
            unsafe { (self.api.unload_game)() };
            self.game_loaded = false;
            self.rom_data.clear();
        }

        self.load_rom()?;
        self.game_loaded = true;

        // retro_get_system_av_info is only valid after retro_load_game.
        let mut av_info = retro_system_av_info::default();
        // SAFETY: slot held, av_info outlives the call.
        unsafe { (self.api.get_system_av_info)(&mut av_info) };
        self.state_mut().av_info = av_info;
        drop(guard);

        self.reset()?;
        self.state_mut().input.map_input();
        Ok(())
    }

    /// Hand the game to `retro_load_game`. Caller holds the slot.
    fn load_rom(&mut self) -> Result<(), CoreError> {
        let no_rom = self.state().no_rom;
        let loaded = if no_rom {
            // SAFETY: NULL game info is valid for SUPPORT_NO_GAME cores.
            unsafe { (self.api.load_game)(std::ptr::null()) }
        } else {
            let path = self.rom_path.clone().ok_or(CoreError::NeedsRom)?;
            if self.block_extract {
                return Err(CoreError::BlockExtract);
            }
            let path_c = path_to_cstring(&path)?;
            let mut game = retro_game_info {
                path: path_c.as_ptr(),
                data: std::ptr::null(),
                size: 0,
                meta: c"".as_ptr(),
            };
            if !self.need_fullpath {
                self.rom_data = std::fs::read(&path)
                    .map_err(|source| CoreError::RomRead { path, source })?;
                game.data = self.rom_data.as_ptr().cast();
                game.size = self.rom_data.len();
            }
            // The CString's buffer does not move with it.
            self.rom_path_c = Some(path_c);
            // SAFETY: `game` and the buffers it points to outlive the call.
            unsafe { (self.api.load_game)(&game) }
        };
        if loaded {
            Ok(())
        } else {
            Err(CoreError::LoadGameFailed { no_rom })
        }
    }

    /// Run one frame, delivering output to `ui`.
    pub fn next_frame(&mut self, ui: &mut dyn RetroUi) -> Result<(), CoreError> {
        let mut guard = ActiveGuard::acquire(self.state)?;
        if let Some(level) = self.state_mut().pending_perf_level.take() {
            ui.set_perf_level(level);
        }
        guard.attach_ui(ui);

        let (callback, usec) = {
            let state = self.state_mut();
            let now = Instant::now();
            let usec = match state.last_frame_at {
                Some(prev) => {
                    i64::try_from(now.duration_since(prev).as_micros()).unwrap_or(i64::MAX)
                }
                None => state.frame_time.reference,
            };
            state.last_frame_at = Some(now);
            (state.frame_time.callback, usec)
        };
        // SAFETY: slot held; the callbacks were registered by this core.
        unsafe {
            if let Some(callback) = callback {
                callback(usec);
            }
            (self.api.run)();
        }
        drop(guard);
        self.state_mut().frame_count += 1;
        Ok(())
    }

    /// `retro_reset`, then clear the frame count and key state.
    pub fn reset(&mut self) -> Result<(), CoreError> {
        let guard = ActiveGuard::acquire(self.state)?;
        // SAFETY: slot held.
        unsafe { (self.api.reset)() };
        drop(guard);
        let state = self.state_mut();
        state.frame_count = 0;
        state.input.clear_keys();
        state.need_change = true;
        Ok(())
    }

    pub fn set_controller_port_device(&mut self, port: u32, device: u32) -> Result<(), CoreError> {
        let _guard = ActiveGuard::acquire(self.state)?;
        // SAFETY: slot held.
        unsafe { (self.api.set_controller_port_device)(port, device) };
        Ok(())
    }

    /// Serialize the running game. Game name and type are left empty.
    pub fn save_state(&mut self) -> Result<SaveState, SaveStateError> {
        let quirks = self.state().serialize_quirks;
        if quirks & RETRO_SERIALIZATION_QUIRK_SINGLE_SESSION != 0 {
            warn!("retro_serialize: core says SINGLE_SESSION. Refusing to save.");
            return Err(SaveStateError::SingleSession);
        }

        let guard = ActiveGuard::acquire(self.state).map_err(|_| SaveStateError::Busy)?;
        // SAFETY: slot held.
        let size = unsafe { (self.api.serialize_size)() };
        if size > MAX_SAVE_DATA_LEN {
            warn!("retro_serialize_size {:#x} larger than {:#x}", size, MAX_SAVE_DATA_LEN);
            return Err(SaveStateError::TooLarge { size });
        }
        let mut data = vec![0u8; size];
        // SAFETY: slot held, `data` has room for `size` bytes.
        let ok = unsafe { (self.api.serialize)(data.as_mut_ptr().cast(), size) };
        drop(guard);

        let too_early_frames = self.too_early_frames;
        let state = self.state_mut();
        if !ok {
            if state.serialize_quirks & RETRO_SERIALIZATION_QUIRK_MUST_INITIALIZE != 0
                && state.frame_count < too_early_frames
            {
                warn!("retro_serialize failed at startup: {} frames", state.frame_count);
                return Err(SaveStateError::TooEarly { frames: state.frame_count });
            }
            warn!("retro_serialize failed");
            return Err(SaveStateError::SerializeFailed);
        }
        state.serialize_quirks &= !RETRO_SERIALIZATION_QUIRK_MUST_INITIALIZE;

        let mut flags = SaveFlags::host();
        if quirks & RETRO_SERIALIZATION_QUIRK_ENDIAN_DEPENDENT != 0 {
            flags |= SaveFlags::ENDIAN_DEPENDENT;
        }
        if quirks & RETRO_SERIALIZATION_QUIRK_PLATFORM_DEPENDENT != 0 {
            flags |= SaveFlags::PLATFORM_DEPENDENT;
        }
        Ok(SaveState::new(flags, data))
    }

    /// Validate a save file's bytes and restore them into the core.
    ///
    /// A core that rejects the state is reset to get it back to a known state.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), LoadStateError> {
        let save = save_format::decode(bytes).inspect_err(|e| warn!("save rejected: {}", e))?;
        let guard = ActiveGuard::acquire(self.state).map_err(|_| LoadStateError::Busy)?;
        // SAFETY: slot held, `save.data` outlives the call.
        let ok = unsafe { (self.api.unserialize)(save.data.as_ptr().cast(), save.data.len()) };
        drop(guard);
        if !ok {
            warn!("retro_unserialize failed");
            if let Err(e) = self.reset() {
                warn!("reset after failed load: {}", e);
            }
            return Err(LoadStateError::UnserializeFailed);
        }
        Ok(())
    }
}

impl Drop for RetroCore {
    fn drop(&mut self) {
        if self.game_loaded || self.inited {
            match ActiveGuard::acquire(self.state) {
                Ok(guard) => {
                    // SAFETY: slot held; each call matches a step that succeeded.
                    unsafe {
                        if self.game_loaded {
                            (self.api.unload_game)();
                        }
                        if self.inited {
                            (self.api.deinit)();
                        }
                    }
                    drop(guard);
                }
                Err(e) => warn!("core \"{}\" not deinitialized: {}", self.name, e),
            }
        }
        // SAFETY: allocated by Box in from_api; nothing references it any more.
        drop(unsafe { Box::from_raw(self.state.as_ptr()) });
    }
}

impl std::fmt::Debug for RetroCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetroCore")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("support", &self.support)
            .field("game_loaded", &self.game_loaded)
            .finish_non_exhaustive()
    }
}
