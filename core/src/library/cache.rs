//! Scanning the cache directories

use std::path::{Path, PathBuf};

use retrohost_shared::sniff_file;
use tracing::{debug, info, warn};

use super::{CacheError, NST_DATABASE, RetroWeb};
use crate::app::RetroApp;
use crate::retro_core::RetroCore;

/// A regular file found in a directory.
struct DirFile {
    path: PathBuf,
    name: String,
    size: u64,
}

/// Regular files of `dir`, sorted by name. Subdirectories are skipped.
fn list_files(dir: &Path) -> Result<Vec<DirFile>, CacheError> {
    let read_err = |source| CacheError::ReadDir { path: dir.to_path_buf(), source };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let path = entry.path();
        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                warn!("stat({}) failed: {}", path.display(), e);
                continue;
            }
        };
        if meta.is_dir() {
            debug!("{}: ignore subdir", path.display());
            continue;
        }
        files.push(DirFile {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            size: meta.len(),
        });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

impl RetroWeb {
    /// Scan the cache directories and index what is new.
    ///
    /// Calling it again only adds what appeared since; existing cores and
    /// apps are kept as they are.
    pub fn list_cache_contents(&mut self) -> Result<(), CacheError> {
        for file in list_files(&self.layout.cores)? {
            if let Err(e) = self.add_to_cores(&file.path) {
                warn!("skip core {}: {}", file.path.display(), e);
            }
        }

        let mut search = vec![self.layout.games.clone()];
        search.extend(self.config.paths.extra_game_dirs.iter().cloned());
        for dir in search {
            let is_game_dir = dir == self.layout.games;
            let files = match list_files(&dir) {
                Ok(files) => files,
                Err(e) if !is_game_dir => {
                    debug!("skip game dir: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            for file in files {
                self.add_game(file, is_game_dir)?;
            }
        }

        for file in list_files(&self.layout.saves)? {
            if let Some(stem) = file.name.strip_suffix(".bin") {
                self.saves.insert(stem.to_string());
            }
        }

        self.have_nst_database = self.layout.system.join(NST_DATABASE).is_file();
        Ok(())
    }

    fn add_game(&mut self, file: DirFile, in_game_dir: bool) -> Result<(), CacheError> {
        if self.apps.contains_key(&file.name) {
            return Ok(());
        }
        let file_type = match sniff_file(&file.path) {
            Ok(t) => t,
            Err(e) => {
                warn!("ignore {}: {}", file.path.display(), e);
                return Ok(());
            }
        };
        let Some(core_path) = self.type_map.get(&file_type).and_then(|paths| paths.first()) else {
            warn!("ignore {}: type {} not found", file.path.display(), file_type);
            return Ok(());
        };
        let Some(core) = self.cores.get(core_path) else {
            warn!(
                "ignore {}: core {} missing from index",
                file.path.display(),
                core_path.display()
            );
            return Ok(());
        };

        let rom_path = if in_game_dir {
            file.path
        } else {
            let dst = self.layout.games.join(&file.name);
            std::fs::copy(&file.path, &dst).map_err(|source| CacheError::Copy {
                path: dst.clone(),
                source,
            })?;
            info!("copied {} to {}", file.path.display(), dst.display());
            dst
        };
        let app = RetroApp::for_rom(core, file_type, rom_path, file.size, file.name.clone());
        self.apps.insert(file.name, app);
        Ok(())
    }

    /// Load the core at `path` and index it.
    ///
    /// Returns false if the path or the core's name is already indexed.
    pub fn add_to_cores(&mut self, path: &Path) -> Result<bool, CacheError> {
        if self.cores.contains_key(path) {
            return Ok(false);
        }
        let core = (self.loader)(path, self.core_options())?;
        self.add_core(core)
    }

    /// Index a loaded core: its file types, and an app if it runs without a game.
    pub fn add_core(&mut self, core: RetroCore) -> Result<bool, CacheError> {
        let path = core.path().to_path_buf();
        if self.cores.contains_key(&path) {
            return Ok(false);
        }
        if let Some(dup) = self.core_by_name(core.name()) {
            warn!(
                "skip core {}: \"{}\" already loaded from {}",
                path.display(),
                core.name(),
                dup.path().display()
            );
            return Ok(false);
        }
        if core.no_rom() && self.apps.contains_key(core.name()) {
            return Err(CacheError::DuplicateApp { path, name: core.name().to_string() });
        }

        for ext in core.support() {
            self.type_map.entry(ext.clone()).or_default().push(path.clone());
        }
        if core.no_rom() {
            let app = RetroApp::no_rom(&core);
            self.apps.insert(app.name().to_string(), app);
        }
        info!("core \"{}\" {} from {}", core.name(), core.version(), path.display());
        self.cores.insert(path, core);
        Ok(true)
    }
}
