//! Save files in the save dir
//!
//! A save is a [`retrohost_shared::save_format`] record stored as
//! `<saves>/<name>.bin`. The game name and type in its header decide which
//! app can load it.

use std::io;
use std::path::PathBuf;

use retrohost_shared::save_format;
use retrohost_shared::{MAX_SAVE_DATA_LEN, SaveFormatError, saved_size};
use tracing::{info, warn};

use super::RetroWeb;
use crate::retro_core::{LoadStateError, SaveStateError};

/// What [`RetroWeb::load_save`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSaveOutcome {
    /// The save was restored into the current app's core.
    Loaded,
    /// The save belongs to this other app; open it and load again.
    SwitchTo(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SaveFileError {
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("not a file: {}", path.display())]
    NotAFile { path: PathBuf },

    #[error("{} too large: {size} bytes", path.display())]
    TooLarge { path: PathBuf, size: u64 },

    #[error(transparent)]
    Format(#[from] SaveFormatError),

    #[error(transparent)]
    Load(#[from] LoadStateError),

    #[error(transparent)]
    Save(#[from] SaveStateError),

    #[error("\"{game}\" can load this save, but it cannot be found")]
    NoMatchingApp { game: String },

    #[error("\"{game}\" has the right name but does not support type \"{game_type}\"")]
    UnsupportedType { game: String, game_type: String },

    #[error("no app named \"{0}\"")]
    UnknownApp(String),

    #[error("save \"{0}\" not found")]
    UnknownSave(String),

    #[error("save \"{0}\" already exists")]
    AlreadyExists(String),

    #[error("invalid save name \"{0}\"")]
    InvalidName(String),
}

/// Save names are plain file stems inside the saves directory.
fn check_save_name(name: &str) -> Result<(), SaveFileError> {
    if name.is_empty() || name == "." || name.contains("..") || name.contains(['/', '\\', '\0']) {
        warn!("rejecting save name \"{}\"", name);
        return Err(SaveFileError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl RetroWeb {
    /// Full path of the save called `name`.
    pub fn save_path(&self, name: &str) -> PathBuf {
        self.layout.save_path(name)
    }

    fn checked_save_path(&self, name: &str) -> Result<PathBuf, SaveFileError> {
        check_save_name(name)?;
        Ok(self.save_path(name))
    }

    /// Restore save `name`.
    ///
    /// If `current_app` is the game the save was made from, the save is
    /// loaded into its core. Otherwise the app able to load it is returned
    /// and nothing changes.
    pub fn load_save(
        &mut self,
        current_app: Option<&str>,
        name: &str,
    ) -> Result<LoadSaveOutcome, SaveFileError> {
        let path = self.checked_save_path(name)?;
        let quiet = std::mem::take(&mut self.quiet_first_load);
        let meta = std::fs::metadata(&path).map_err(|source| {
            if !quiet {
                warn!("load_save: stat({}) failed: {}", path.display(), source);
            }
            SaveFileError::Io { path: path.clone(), source }
        })?;
        if meta.is_dir() {
            warn!("load_save: not a file: {}", path.display());
            return Err(SaveFileError::NotAFile { path });
        }
        if meta.len() > saved_size(MAX_SAVE_DATA_LEN) as u64 {
            warn!("load_save: file {} too large: {}", path.display(), meta.len());
            return Err(SaveFileError::TooLarge { path, size: meta.len() });
        }
        let bytes = std::fs::read(&path)
            .map_err(|source| SaveFileError::Io { path: path.clone(), source })?;
        let header = save_format::peek_header(&bytes)?;

        if let Some(current) = current_app.and_then(|name| self.apps.get(name))
            && current.name() == header.game_name
        {
            let core = self
                .cores
                .get_mut(current.core_path())
                .ok_or_else(|| SaveFileError::UnknownApp(current.name().to_string()))?;
            core.load_state(&bytes)?;
            info!("loaded save {} into \"{}\"", name, header.game_name);
            return Ok(LoadSaveOutcome::Loaded);
        }

        let Some(app) = self.apps.get(&header.game_name) else {
            warn!(
                "load_save({}): \"{}\" can load this, but cannot be found. Add it to {}",
                path.display(),
                header.game_name,
                self.layout.games.display()
            );
            return Err(SaveFileError::NoMatchingApp { game: header.game_name });
        };
        let supported = header.game_type.is_empty()
            || self
                .cores
                .get(app.core_path())
                .is_some_and(|core| core.supports(&header.game_type));
        if supported {
            return Ok(LoadSaveOutcome::SwitchTo(app.name().to_string()));
        }

        match self.cores_for_type(&header.game_type).first().and_then(|p| self.cores.get(p)) {
            Some(core) => warn!(
                "load_save({}): \"{}\" has the right name but does not support \"{}\". \
                 Look for \"{}\" roms?",
                path.display(),
                header.game_name,
                header.game_type,
                core.name()
            ),
            None => warn!(
                "load_save({}): \"{}\" has the right name but no core supports \"{}\"",
                path.display(),
                header.game_name,
                header.game_type
            ),
        }
        Err(SaveFileError::UnsupportedType {
            game: header.game_name,
            game_type: header.game_type,
        })
    }

    /// Save the running game of `app_name` as `name`.
    ///
    /// The file is written next to its final path and renamed into place.
    pub fn save_to(&mut self, app_name: &str, name: &str) -> Result<(), SaveFileError> {
        let path = self.checked_save_path(name)?;
        let app = self
            .apps
            .get(app_name)
            .ok_or_else(|| SaveFileError::UnknownApp(app_name.to_string()))?;
        let core = self
            .cores
            .get_mut(app.core_path())
            .ok_or_else(|| SaveFileError::UnknownApp(app_name.to_string()))?;

        let mut state = core.save_state()?;
        state.game_name = app.name().to_string();
        state.game_type = app.file_type().to_string();
        let bytes = save_format::encode(&state)?;

        let tmp = path.with_extension("bin.tmp");
        let io_err = |source| SaveFileError::Io { path: path.clone(), source };
        std::fs::write(&tmp, &bytes).map_err(io_err)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(e));
        }
        info!("saved \"{}\" to {}", app_name, path.display());
        self.saves.insert(name.to_string());
        Ok(())
    }

    /// Rename save `from` to `to`, which must not exist yet.
    pub fn rename_save(&mut self, from: &str, to: &str) -> Result<(), SaveFileError> {
        let from_path = self.checked_save_path(from)?;
        let to_path = self.checked_save_path(to)?;
        if !self.saves.contains(from) {
            warn!("rename_save: from=\"{}\" not found", from);
            return Err(SaveFileError::UnknownSave(from.to_string()));
        }
        if self.saves.contains(to) || to_path.exists() {
            warn!("rename_save: to=\"{}\" already exists", to);
            return Err(SaveFileError::AlreadyExists(to.to_string()));
        }
        std::fs::rename(from_path, &to_path)
            .map_err(|source| SaveFileError::Io { path: to_path, source })?;
        self.saves.remove(from);
        self.saves.insert(to.to_string());
        Ok(())
    }
}
