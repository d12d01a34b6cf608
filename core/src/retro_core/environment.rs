//! `retro_environment` command dispatch

use std::ffi::{c_char, c_int, c_uint, c_void};

use tracing::{error, warn};

use super::{CoreState, MemoryDescriptor, Subsystem, SubsystemMemory, SubsystemRom, c_string_lossy};
use crate::ffi::*;
use crate::ui::PixelFormat;

/// Quirk bits the host honours. Everything else a core reports is dropped.
pub const SUPPORTED_QUIRKS: u64 = RETRO_SERIALIZATION_QUIRK_MUST_INITIALIZE
    | RETRO_SERIALIZATION_QUIRK_CORE_VARIABLE_SIZE
    | RETRO_SERIALIZATION_QUIRK_SINGLE_SESSION
    | RETRO_SERIALIZATION_QUIRK_ENDIAN_DEPENDENT;

/// Environment commands the host understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvCmd {
    SetRotation,
    GetOverscan,
    GetCanDupe,
    SetMessage,
    Shutdown,
    SetPerformanceLevel,
    GetSystemDirectory,
    SetPixelFormat,
    SetInputDescriptors,
    GetVariable,
    SetVariables,
    GetVariableUpdate,
    SetSupportNoGame,
    GetLibretroPath,
    SetFrameTimeCallback,
    GetLogInterface,
    GetCoreAssetsDirectory,
    GetSaveDirectory,
    SetSystemAvInfo,
    SetProcAddressCallback,
    SetSubsystemInfo,
    SetControllerInfo,
    SetMemoryMaps,
    SetGeometry,
    GetUsername,
    GetLanguage,
    SetSupportAchievements,
    SetSerializationQuirks,
    GetAudioVideoEnable,
    GetInputBitmasks,
    GetCoreOptionsVersion,
}

impl EnvCmd {
    /// Decode a command number. The experimental bit is ignored.
    pub fn from_raw(cmd: c_uint) -> Option<Self> {
        Some(match cmd & !RETRO_ENVIRONMENT_EXPERIMENTAL {
            RETRO_ENVIRONMENT_SET_ROTATION => Self::SetRotation,
            RETRO_ENVIRONMENT_GET_OVERSCAN => Self::GetOverscan,
            RETRO_ENVIRONMENT_GET_CAN_DUPE => Self::GetCanDupe,
            RETRO_ENVIRONMENT_SET_MESSAGE => Self::SetMessage,
            RETRO_ENVIRONMENT_SHUTDOWN => Self::Shutdown,
            RETRO_ENVIRONMENT_SET_PERFORMANCE_LEVEL => Self::SetPerformanceLevel,
            RETRO_ENVIRONMENT_GET_SYSTEM_DIRECTORY => Self::GetSystemDirectory,
            RETRO_ENVIRONMENT_SET_PIXEL_FORMAT => Self::SetPixelFormat,
            RETRO_ENVIRONMENT_SET_INPUT_DESCRIPTORS => Self::SetInputDescriptors,
            RETRO_ENVIRONMENT_GET_VARIABLE => Self::GetVariable,
            RETRO_ENVIRONMENT_SET_VARIABLES => Self::SetVariables,
            RETRO_ENVIRONMENT_GET_VARIABLE_UPDATE => Self::GetVariableUpdate,
            RETRO_ENVIRONMENT_SET_SUPPORT_NO_GAME => Self::SetSupportNoGame,
            RETRO_ENVIRONMENT_GET_LIBRETRO_PATH => Self::GetLibretroPath,
            RETRO_ENVIRONMENT_SET_FRAME_TIME_CALLBACK => Self::SetFrameTimeCallback,
            RETRO_ENVIRONMENT_GET_LOG_INTERFACE => Self::GetLogInterface,
            RETRO_ENVIRONMENT_GET_CORE_ASSETS_DIRECTORY => Self::GetCoreAssetsDirectory,
            RETRO_ENVIRONMENT_GET_SAVE_DIRECTORY => Self::GetSaveDirectory,
            RETRO_ENVIRONMENT_SET_SYSTEM_AV_INFO => Self::SetSystemAvInfo,
            RETRO_ENVIRONMENT_SET_PROC_ADDRESS_CALLBACK => Self::SetProcAddressCallback,
            RETRO_ENVIRONMENT_SET_SUBSYSTEM_INFO => Self::SetSubsystemInfo,
            RETRO_ENVIRONMENT_SET_CONTROLLER_INFO => Self::SetControllerInfo,
            RETRO_ENVIRONMENT_SET_MEMORY_MAPS => Self::SetMemoryMaps,
            RETRO_ENVIRONMENT_SET_GEOMETRY => Self::SetGeometry,
            RETRO_ENVIRONMENT_GET_USERNAME => Self::GetUsername,
            RETRO_ENVIRONMENT_GET_LANGUAGE => Self::GetLanguage,
            RETRO_ENVIRONMENT_SET_SUPPORT_ACHIEVEMENTS => Self::SetSupportAchievements,
            RETRO_ENVIRONMENT_SET_SERIALIZATION_QUIRKS => Self::SetSerializationQuirks,
            RETRO_ENVIRONMENT_GET_AUDIO_VIDEO_ENABLE => Self::GetAudioVideoEnable,
            RETRO_ENVIRONMENT_GET_INPUT_BITMASKS => Self::GetInputBitmasks,
            RETRO_ENVIRONMENT_GET_CORE_OPTIONS_VERSION => Self::GetCoreOptionsVersion,
            _ => return None,
        })
    }
}

/// Keep the supported quirk bits and add `FRONT_VARIABLE_SIZE`.
pub fn filter_quirks(quirks: u64) -> u64 {
    (quirks & SUPPORTED_QUIRKS) | RETRO_SERIALIZATION_QUIRK_FRONT_VARIABLE_SIZE
}

/// Handle one environment call.
///
/// # Safety
/// `data` must point to the argument type libretro.h defines for `cmd`.
pub(crate) unsafe fn dispatch(state: &mut CoreState, cmd: c_uint, data: *mut c_void) -> bool {
    let Some(command) = EnvCmd::from_raw(cmd) else {
        if cmd & RETRO_ENVIRONMENT_EXPERIMENTAL != 0 {
            warn!("core wants cmd ({} | EXPERIMENTAL)", cmd & !RETRO_ENVIRONMENT_EXPERIMENTAL);
        } else {
            warn!("core wants cmd {} (unsupported)", cmd);
        }
        return false;
    };

    match command {
        EnvCmd::Shutdown => return true,
        EnvCmd::SetRotation | EnvCmd::GetOverscan => {
            warn!("core wants {:?} (unsupported)", command);
            return false;
        }
        EnvCmd::GetInputBitmasks => return false,
        _ => {}
    }
    if data.is_null() {
        warn!("core sent {:?} with NULL data", command);
        return false;
    }

    // SAFETY: per the caller's contract, data has the type matching `command`.
    unsafe {
        match command {
            EnvCmd::GetCanDupe => *data.cast::<bool>() = true,
            EnvCmd::SetMessage => {
                let msg = &*data.cast::<retro_message>();
                let text = c_string_lossy(msg.msg);
                match state.ui {
                    Some(ui) => (*ui).show_message(&text, msg.frames),
                    None => warn!("core posts {} frames of: \"{}\"", msg.frames, text),
                }
            }
            EnvCmd::SetPerformanceLevel => {
                let level = *data.cast::<c_uint>();
                match state.ui {
                    Some(ui) => (*ui).set_perf_level(level),
                    None => state.pending_perf_level = Some(level),
                }
            }
            EnvCmd::GetSystemDirectory => {
                *data.cast::<*const c_char>() = state.dirs.system.as_ptr()
            }
            EnvCmd::GetLibretroPath => *data.cast::<*const c_char>() = state.dirs.cores.as_ptr(),
            EnvCmd::GetCoreAssetsDirectory | EnvCmd::GetSaveDirectory => {
                *data.cast::<*const c_char>() = state.dirs.saves.as_ptr()
            }
            EnvCmd::SetPixelFormat => {
                let raw = *data.cast::<c_uint>();
                match PixelFormat::from_raw(raw) {
                    Some(format) => state.pixel_format = format,
                    None => {
                        error!("unknown retro_pixel_format {}", raw);
                        return false;
                    }
                }
            }
            EnvCmd::SetInputDescriptors => {
                let mut d = data.cast::<retro_input_descriptor>().cast_const();
                while !(*d).description.is_null() {
                    let desc = &*d;
                    state.input.add_descriptor(
                        desc.port,
                        desc.device,
                        desc.index,
                        desc.id,
                        &c_string_lossy(desc.description),
                    );
                    d = d.add(1);
                }
            }
            EnvCmd::GetVariable => {
                let var = &mut *data.cast::<retro_variable>();
                let key = c_string_lossy(var.key);
                var.value = match state.variables.value_ptr(&key) {
                    Some(ptr) => ptr,
                    None => {
                        warn!("get_var: \"{}\" = (not found)", key);
                        std::ptr::null()
                    }
                };
            }
            EnvCmd::SetVariables => {
                let mut v = data.cast::<retro_variable>().cast_const();
                while !(*v).key.is_null() {
                    state.variables.declare(&c_string_lossy((*v).key), &c_string_lossy((*v).value));
                    v = v.add(1);
                }
            }
            EnvCmd::GetVariableUpdate => {
                *data.cast::<bool>() = state.variables.take_update(state.need_change);
                state.need_change = false;
            }
            EnvCmd::SetSupportNoGame => state.no_rom = *data.cast::<bool>(),
            EnvCmd::SetFrameTimeCallback => {
                state.frame_time = *data.cast::<retro_frame_time_callback>()
            }
            EnvCmd::GetLogInterface => {
                (*data.cast::<retro_log_callback>()).log = Some(super::active::log_printf());
            }
            EnvCmd::SetSystemAvInfo => state.av_info = *data.cast::<retro_system_av_info>(),
            EnvCmd::SetProcAddressCallback => {
                let interface = &*data.cast::<retro_get_proc_address_interface>();
                state.get_proc_address = interface.get_proc_address;
            }
            EnvCmd::SetSubsystemInfo => {
                let mut s = data.cast::<retro_subsystem_info>().cast_const();
                let mut subsystems = Vec::new();
                while !(*s).ident.is_null() {
                    subsystems.push(read_subsystem(&*s));
                    s = s.add(1);
                }
                state.subsystems = subsystems;
            }
            EnvCmd::SetControllerInfo => {
                let mut c = data.cast::<retro_controller_info>().cast_const();
                let mut port = 0;
                while (*c).num_types != 0 && !(*c).types.is_null() {
                    let types = std::slice::from_raw_parts((*c).types, (*c).num_types as usize);
                    let choices: Vec<(u32, String)> =
                        types.iter().map(|t| (t.id, c_string_lossy(t.desc))).collect();
                    state.input.set_port_choices(port, &choices);
                    port += 1;
                    c = c.add(1);
                }
            }
            EnvCmd::SetMemoryMaps => {
                let map = &*data.cast::<retro_memory_map>();
                state.memory_map.clear();
                if !map.descriptors.is_null() {
                    let descs =
                        std::slice::from_raw_parts(map.descriptors, map.num_descriptors as usize);
                    state.memory_map = descs
                        .iter()
                        .map(|d| MemoryDescriptor {
                            flags: d.flags,
                            ptr: d.ptr as usize,
                            offset: d.offset,
                            start: d.start,
                            select: d.select,
                            disconnect: d.disconnect,
                            len: d.len,
                            addrspace: c_string_lossy(d.addrspace),
                        })
                        .collect();
                }
            }
            EnvCmd::SetGeometry => {
                let geom = &*data.cast::<retro_game_geometry>();
                state.av_info.geometry.base_width = geom.base_width;
                state.av_info.geometry.base_height = geom.base_height;
                state.av_info.geometry.aspect_ratio = geom.aspect_ratio;
            }
            EnvCmd::GetUsername => *data.cast::<*const c_char>() = std::ptr::null(),
            EnvCmd::GetLanguage => *data.cast::<c_uint>() = RETRO_LANGUAGE_ENGLISH,
            EnvCmd::SetSupportAchievements => {}
            EnvCmd::SetSerializationQuirks => {
                let quirks = &mut *data.cast::<u64>();
                state.serialize_quirks = filter_quirks(*quirks);
                *quirks = state.serialize_quirks;
            }
            // 1: video, 2: audio
            EnvCmd::GetAudioVideoEnable => *data.cast::<c_int>() = 1 | 2,
            EnvCmd::GetCoreOptionsVersion => *data.cast::<c_uint>() = 0,
            // Answered before the NULL check.
            EnvCmd::Shutdown
            | EnvCmd::SetRotation
            | EnvCmd::GetOverscan
            | EnvCmd::GetInputBitmasks => {}
        }
    }
    true
}

/// Split a `|` separated extension list, lowercased, without `bin` and `bs`.
pub(crate) fn split_extensions(list: &str) -> Vec<String> {
    list.split('|')
        .filter(|e| !e.is_empty())
        .map(str::to_ascii_lowercase)
        .filter(|e| e != "bin" && e != "bs")
        .collect()
}

/// # Safety
/// `info` must be a valid `retro_subsystem_info` with valid nested arrays.
unsafe fn read_subsystem(info: &retro_subsystem_info) -> Subsystem {
    let roms = if info.roms.is_null() {
        &[][..]
    } else {
        // SAFETY: num_roms entries at roms.
        unsafe { std::slice::from_raw_parts(info.roms, info.num_roms as usize) }
    };
    // SAFETY: strings and arrays come from the same valid info.
    unsafe {
        Subsystem {
            id: info.id,
            description: c_string_lossy(info.desc),
            ident: c_string_lossy(info.ident),
            roms: roms
                .iter()
                .map(|r| {
                    let memory = if r.memory.is_null() {
                        &[][..]
                    } else {
                        std::slice::from_raw_parts(r.memory, r.num_memory as usize)
                    };
                    SubsystemRom {
                        description: c_string_lossy(r.desc),
                        extensions: split_extensions(&c_string_lossy(r.valid_extensions)),
                        need_fullpath: r.need_fullpath,
                        block_extract: r.block_extract,
                        required: r.required,
                        memory: memory
                            .iter()
                            .map(|m| SubsystemMemory {
                                memory_type: m.type_,
                                extension: c_string_lossy(m.extension),
                            })
                            .collect(),
                    }
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_known_and_experimental() {
        assert_eq!(EnvCmd::from_raw(3), Some(EnvCmd::GetCanDupe));
        let experimental = |cmd: c_uint| EnvCmd::from_raw(cmd | RETRO_ENVIRONMENT_EXPERIMENTAL);
        assert_eq!(experimental(44), Some(EnvCmd::SetSerializationQuirks));
        assert_eq!(experimental(51), Some(EnvCmd::GetInputBitmasks));
        assert_eq!(EnvCmd::from_raw(4), None);
        assert_eq!(EnvCmd::from_raw(20), None);
        assert_eq!(EnvCmd::from_raw(1000), None);
    }

    #[test]
    fn test_every_listed_command_decodes() {
        let codes = [
            1, 2, 3, 6, 7, 8, 9, 10, 11, 15, 16, 17, 18, 19, 21, 27, 30, 31, 32, 33, 34, 35, 36,
            37, 38, 39, 42, 44, 47, 51, 52,
        ];
        for code in codes {
            assert!(EnvCmd::from_raw(code).is_some(), "command {code}");
        }
    }

    #[test]
    fn test_filter_quirks() {
        let all = u64::MAX;
        let kept = filter_quirks(all);
        assert_eq!(
            kept,
            SUPPORTED_QUIRKS | RETRO_SERIALIZATION_QUIRK_FRONT_VARIABLE_SIZE
        );
        assert_eq!(kept & RETRO_SERIALIZATION_QUIRK_INCOMPLETE, 0);
        assert_eq!(kept & RETRO_SERIALIZATION_QUIRK_PLATFORM_DEPENDENT, 0);
        assert_eq!(filter_quirks(0), RETRO_SERIALIZATION_QUIRK_FRONT_VARIABLE_SIZE);
    }

    #[test]
    fn test_split_extensions() {
        assert_eq!(split_extensions("NES|fds|bin|BS|unf"), ["nes", "fds", "unf"]);
        assert!(split_extensions("").is_empty());
    }
}
