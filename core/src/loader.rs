//! Dynamic loading of libretro cores
//!
//! Opens a core's shared library and resolves the entry points the host
//! calls. The library handle lives inside [`CoreApi`], so the function
//! pointers stay valid for as long as the table does.

use std::path::Path;

use libloading::Library;

use crate::ffi::*;
use crate::retro_core::CoreError;

/// Resolved libretro entry points of one core.
pub struct CoreApi {
    pub init: retro_init_fn,
    pub deinit: retro_deinit_fn,
    pub api_version: retro_api_version_fn,
    pub get_system_info: retro_get_system_info_fn,
    pub get_system_av_info: retro_get_system_av_info_fn,
    pub set_controller_port_device: retro_set_controller_port_device_fn,
    pub reset: retro_reset_fn,
    pub run: retro_run_fn,
    pub set_environment: retro_set_environment_fn,
    pub set_video_refresh: retro_set_video_refresh_fn,
    pub set_audio_sample: retro_set_audio_sample_fn,
    pub set_audio_sample_batch: retro_set_audio_sample_batch_fn,
    pub set_input_poll: retro_set_input_poll_fn,
    pub set_input_state: retro_set_input_state_fn,
    pub load_game: retro_load_game_fn,
    pub unload_game: retro_unload_game_fn,
    pub serialize_size: retro_serialize_size_fn,
    pub serialize: retro_serialize_fn,
    pub unserialize: retro_unserialize_fn,
    /// Keeps the shared library mapped. `None` for statically linked tables.
    pub(crate) _lib: Option<Library>,
}

/// Resolve `name` in `lib` as a function pointer of type `$ty`.
macro_rules! resolve {
    ($lib:expr, $ty:ty, $name:literal) => {{
        // SAFETY: the symbol is declared by libretro.h with this signature.
        let sym = unsafe { $lib.get::<$ty>(concat!($name, "\0").as_bytes()) }
            .map_err(|_| CoreError::MissingSymbol { symbol: $name })?;
        *sym
    }};
}

impl CoreApi {
    /// Load the shared library at `path` and resolve all 19 entry points.
    ///
    /// # Errors
    /// [`CoreError::Load`] if the library cannot be opened,
    /// [`CoreError::MissingSymbol`] naming the first absent entry point.
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        // SAFETY: loading a library runs its initializers. Cores are trusted
        // code the user placed in the cores directory.
        let lib = unsafe { Library::new(path) }.map_err(|source| CoreError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            init: resolve!(lib, retro_init_fn, "retro_init"),
            deinit: resolve!(lib, retro_deinit_fn, "retro_deinit"),
            api_version: resolve!(lib, retro_api_version_fn, "retro_api_version"),
            get_system_info: resolve!(lib, retro_get_system_info_fn, "retro_get_system_info"),
            get_system_av_info: resolve!(
                lib,
                retro_get_system_av_info_fn,
                "retro_get_system_av_info"
            ),
            set_controller_port_device: resolve!(
                lib,
                retro_set_controller_port_device_fn,
                "retro_set_controller_port_device"
            ),
            reset: resolve!(lib, retro_reset_fn, "retro_reset"),
            run: resolve!(lib, retro_run_fn, "retro_run"),
            set_environment: resolve!(lib, retro_set_environment_fn, "retro_set_environment"),
            set_video_refresh: resolve!(
                lib,
                retro_set_video_refresh_fn,
                "retro_set_video_refresh"
            ),
            set_audio_sample: resolve!(lib, retro_set_audio_sample_fn, "retro_set_audio_sample"),
            set_audio_sample_batch: resolve!(
                lib,
                retro_set_audio_sample_batch_fn,
                "retro_set_audio_sample_batch"
            ),
            set_input_poll: resolve!(lib, retro_set_input_poll_fn, "retro_set_input_poll"),
            set_input_state: resolve!(lib, retro_set_input_state_fn, "retro_set_input_state"),
            load_game: resolve!(lib, retro_load_game_fn, "retro_load_game"),
            unload_game: resolve!(lib, retro_unload_game_fn, "retro_unload_game"),
            serialize_size: resolve!(lib, retro_serialize_size_fn, "retro_serialize_size"),
            serialize: resolve!(lib, retro_serialize_fn, "retro_serialize"),
            unserialize: resolve!(lib, retro_unserialize_fn, "retro_unserialize"),
            _lib: Some(lib),
        })
    }
}
