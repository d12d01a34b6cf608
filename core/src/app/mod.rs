//! Apps: a game file (or a game-less core) bound to the core that runs it

pub mod config;

use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::retro_core::{CoreError, RetroCore};
use crate::ui::{RetroUi, VideoFrame};

pub use config::Config;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("app \"{app}\" runs on core {}, not {}", expected.display(), got.display())]
    WrongCore { app: String, expected: PathBuf, got: PathBuf },

    #[error("core \"{core}\" needs a rom")]
    NeedsRom { core: String },

    #[error("app \"{0}\" is not running")]
    NotRunning(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// A launchable entry of the cache.
///
/// The app refers to its core by path; the [`RetroCore`] itself is owned by
/// the cache index and passed in for each operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetroApp {
    name: String,
    file_type: String,
    core_path: PathBuf,
    rom_path: Option<PathBuf>,
    rom_size: u64,
    running: bool,
    perf_level: Option<u32>,
}

impl RetroApp {
    /// An app for the game file `rom_path`, named `file_name`.
    pub fn for_rom(
        core: &RetroCore,
        file_type: impl Into<String>,
        rom_path: impl Into<PathBuf>,
        size: u64,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            name: file_name.into(),
            file_type: file_type.into(),
            core_path: core.path().to_path_buf(),
            rom_path: Some(rom_path.into()),
            rom_size: size,
            running: false,
            perf_level: None,
        }
    }

    /// An app for a core that runs without a game. Named after the core.
    pub fn no_rom(core: &RetroCore) -> Self {
        Self {
            name: core.name().to_string(),
            file_type: String::new(),
            core_path: core.path().to_path_buf(),
            rom_path: None,
            rom_size: 0,
            running: false,
            perf_level: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Detected file type, empty for game-less apps.
    pub fn file_type(&self) -> &str {
        &self.file_type
    }

    pub fn core_path(&self) -> &Path {
        &self.core_path
    }

    pub fn rom_path(&self) -> Option<&Path> {
        self.rom_path.as_deref()
    }

    pub fn rom_size(&self) -> u64 {
        self.rom_size
    }

    pub fn is_open(&self) -> bool {
        self.running
    }

    /// Highest performance level the core asked for while this app ran.
    pub fn perf_level(&self) -> Option<u32> {
        self.perf_level
    }

    /// Keep the highest level seen.
    pub fn record_perf_level(&mut self, level: u32) {
        if self.perf_level.is_none_or(|current| current < level) {
            self.perf_level = Some(level);
        }
    }

    fn check_core(&self, core: &RetroCore) -> Result<(), AppError> {
        if core.path() == self.core_path {
            Ok(())
        } else {
            Err(AppError::WrongCore {
                app: self.name.clone(),
                expected: self.core_path.clone(),
                got: core.path().to_path_buf(),
            })
        }
    }

    /// Launch the game on `core`.
    pub fn open(&mut self, core: &mut RetroCore) -> Result<(), AppError> {
        self.check_core(core)?;
        if !core.no_rom() {
            let Some(rom) = &self.rom_path else {
                error!("open: core \"{}\" needs a rom", core.path().display());
                return Err(AppError::NeedsRom { core: core.name().to_string() });
            };
            core.set_rom_path(rom.clone(), self.rom_size);
        }
        core.launch_rom()
            .inspect_err(|e| error!("open: core \"{}\" launch failed: {}", core.name(), e))?;
        self.running = true;
        info!("Opened \"{}\" on core \"{}\"", self.name, core.name());
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), AppError> {
        if !self.running {
            error!("RetroApp[{}]::close: not running", self.name);
            return Err(AppError::NotRunning(self.name.clone()));
        }
        self.running = false;
        Ok(())
    }

    /// Run one frame of the game.
    pub fn next_frame(
        &mut self,
        core: &mut RetroCore,
        ui: &mut dyn RetroUi,
    ) -> Result<(), AppError> {
        if !self.running {
            error!("RetroApp[{}]::next_frame: must call open first", self.name);
            return Err(AppError::NotRunning(self.name.clone()));
        }
        self.check_core(core)?;
        let mut watch = PerfWatch { inner: ui, app: self };
        core.next_frame(&mut watch)?;
        Ok(())
    }
}

/// Forwards to the front end while recording performance levels on the app.
struct PerfWatch<'a> {
    inner: &'a mut dyn RetroUi,
    app: &'a mut RetroApp,
}

impl RetroUi for PerfWatch<'_> {
    fn video_refresh(&mut self, frame: Option<VideoFrame<'_>>) {
        self.inner.video_refresh(frame);
    }

    fn audio_batch(&mut self, samples: &[i16], frames: usize, sample_rate: u32) -> usize {
        self.inner.audio_batch(samples, frames, sample_rate)
    }

    fn show_message(&mut self, message: &str, frames: u32) {
        self.inner.show_message(message, frames);
    }

    fn set_perf_level(&mut self, level: u32) {
        self.app.record_perf_level(level);
        self.inner.set_perf_level(level);
    }
}
