//! Core cache and game library
//!
//! [`RetroWeb`] indexes the cores, games and saves found in a
//! [`CacheLayout`], and downloads missing cores (see [`crate::sync`]).

mod buildbot;
mod cache;
mod data_dir;
pub mod saves;


use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;

use crate::app::RetroApp;
use crate::app::config::Config;
use crate::retro_core::{CoreError, CoreOptions, RetroCore};
use crate::sync::SyncState;

pub use buildbot::{BuildbotTarget, TargetOs};
pub use data_dir::CacheLayout;
pub use saves::{LoadSaveOutcome, SaveFileError};

/// Name of the Nestopia game database in the system dir.
pub const NST_DATABASE: &str = "NstDatabase.xml";

/// Opens the core library at a path.
pub(crate) type CoreLoaderFn = fn(&Path, CoreOptions) -> Result<RetroCore, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("unable to create {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("unable to read {}: {source}", path.display())]
    ReadDir { path: PathBuf, source: io::Error },

    #[error("copy {} failed: {source}", path.display())]
    Copy { path: PathBuf, source: io::Error },

    #[error("core {} runs without a game, but app \"{name}\" already exists", path.display())]
    DuplicateApp { path: PathBuf, name: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Index of cached cores, games and saves.
pub struct RetroWeb {
    layout: CacheLayout,
    config: Config,
    target: BuildbotTarget,
    loader: CoreLoaderFn,
    cores: BTreeMap<PathBuf, RetroCore>,
    /// File type to the paths of every core that runs it, in load order
    type_map: HashMap<String, Vec<PathBuf>>,
    apps: BTreeMap<String, RetroApp>,
    saves: BTreeSet<String>,
    have_nst_database: bool,
    quiet_first_load: bool,
    pub(crate) sync: SyncState,
}

impl RetroWeb {
    /// Create the cache directories and an empty index.
    ///
    /// Call [`Self::list_cache_contents`] to fill it.
    pub fn new(layout: CacheLayout, config: Config) -> Result<Self, CacheError> {
        Self::with_loader(layout, config, |path, options| RetroCore::load(path, options))
    }

    pub(crate) fn with_loader(
        layout: CacheLayout,
        config: Config,
        loader: CoreLoaderFn,
    ) -> Result<Self, CacheError> {
        layout
            .create_all()
            .map_err(|(path, source)| CacheError::CreateDir { path, source })?;
        Ok(Self {
            layout,
            config,
            target: BuildbotTarget::host(),
            loader,
            cores: BTreeMap::new(),
            type_map: HashMap::new(),
            apps: BTreeMap::new(),
            saves: BTreeSet::new(),
            have_nst_database: false,
            quiet_first_load: false,
            sync: SyncState::default(),
        })
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn target(&self) -> &BuildbotTarget {
        &self.target
    }

    /// Options every core in this cache is loaded with.
    pub fn core_options(&self) -> CoreOptions {
        self.config.core_options(self.layout.core_dirs())
    }

    pub fn cores(&self) -> impl Iterator<Item = &RetroCore> {
        self.cores.values()
    }

    pub fn core(&self, path: &Path) -> Option<&RetroCore> {
        self.cores.get(path)
    }

    /// The core that declared `name`.
    pub fn core_by_name(&self, name: &str) -> Option<&RetroCore> {
        self.cores.values().find(|c| c.name() == name)
    }

    /// Paths of the cores that run `file_type`, preferred first.
    pub fn cores_for_type(&self, file_type: &str) -> &[PathBuf] {
        self.type_map.get(file_type).map_or(&[], Vec::as_slice)
    }

    pub fn apps(&self) -> &BTreeMap<String, RetroApp> {
        &self.apps
    }

    pub fn app(&self, name: &str) -> Option<&RetroApp> {
        self.apps.get(name)
    }

    /// An app together with the core that runs it.
    pub fn app_and_core_mut(&mut self, name: &str) -> Option<(&mut RetroApp, &mut RetroCore)> {
        let app = self.apps.get_mut(name)?;
        let core = self.cores.get_mut(app.core_path())?;
        Some((app, core))
    }

    /// Names of the saves in the save dir, without the `.bin` extension.
    pub fn saves(&self) -> &BTreeSet<String> {
        &self.saves
    }

    pub fn have_nst_database(&self) -> bool {
        self.have_nst_database
    }

    /// Do not warn if the next [`Self::load_save`] finds no file.
    pub fn set_quiet_first_load(&mut self, quiet: bool) {
        self.quiet_first_load = quiet;
    }
}

impl std::fmt::Debug for RetroWeb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetroWeb")
            .field("layout", &self.layout)
            .field("cores", &self.cores.keys().collect::<Vec<_>>())
            .field("apps", &self.apps.keys().collect::<Vec<_>>())
            .field("saves", &self.saves)
            .field("have_nst_database", &self.have_nst_database)
            .finish_non_exhaustive()
    }
}
