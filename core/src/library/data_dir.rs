//! On-disk layout of the core cache and game library

use std::io;
use std::path::{Path, PathBuf};

use crate::app::config::PathsConfig;
use crate::retro_core::CoreDirs;

/// The four directories the cache works in.
///
/// Cores and system files are downloadable, so they live under the platform
/// cache dir. Saves and games are user data and live under the config dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    /// Downloaded core libraries
    pub cores: PathBuf,
    /// BIOS images and databases cores ask for
    pub system: PathBuf,
    /// Save-state files (`<name>.bin`)
    pub saves: PathBuf,
    /// Game files
    pub games: PathBuf,
}

impl CacheLayout {
    /// Layout rooted at the given cache and config directories.
    pub fn under(cache_root: &Path, config_root: &Path) -> Self {
        let retroweb = cache_root.join("retroweb");
        let retrogame = config_root.join("retrogame");
        Self {
            cores: retroweb.join("core"),
            system: retroweb.join("sys"),
            saves: retrogame.join("save"),
            games: retrogame.join("game"),
        }
    }

    /// Layout under the platform cache and config directories.
    ///
    /// Returns `None` if the home directory cannot be determined.
    pub fn from_base_dirs() -> Option<Self> {
        let dirs = directories::BaseDirs::new()?;
        Some(Self::under(dirs.cache_dir(), dirs.config_dir()))
    }

    /// Replace directories the user configured explicitly.
    pub fn with_overrides(mut self, paths: &PathsConfig) -> Self {
        if let Some(p) = &paths.cores {
            self.cores = p.clone();
        }
        if let Some(p) = &paths.system {
            self.system = p.clone();
        }
        if let Some(p) = &paths.saves {
            self.saves = p.clone();
        }
        if let Some(p) = &paths.games {
            self.games = p.clone();
        }
        self
    }

    /// Create every directory that does not exist yet.
    ///
    /// On failure, returns the directory that could not be created.
    pub fn create_all(&self) -> Result<(), (PathBuf, io::Error)> {
        for dir in [&self.cores, &self.system, &self.saves, &self.games] {
            std::fs::create_dir_all(dir).map_err(|e| (dir.clone(), e))?;
        }
        Ok(())
    }

    /// Directories reported to cores.
    pub fn core_dirs(&self) -> CoreDirs {
        CoreDirs {
            cores: self.cores.clone(),
            system: self.system.clone(),
            saves: self.saves.clone(),
        }
    }

    /// Path of the save called `name`.
    pub fn save_path(&self, name: &str) -> PathBuf {
        self.saves.join(format!("{name}.bin"))
    }
}
