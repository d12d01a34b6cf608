//! Downloading missing cores and system files
//!
//! A sync fetches, one at a time, every wanted core that is not in the cache
//! and then the NES game database. It is a small state machine advanced by
//! [`RetroWeb::poll_sync`]:
//!
//! ```text
//! Idle -> Downloading -> Unzipping -> (next target) ... -> Idle
//! ```

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tracing::{error, info, warn};

use crate::http::{DataSink, HttpError, HttpOptions, PollStatus, RetroHttp};
use crate::library::{BuildbotTarget, CacheError, NST_DATABASE, RetroWeb};

/// Archive name inside the staging directory.
const ARCHIVE_NAME: &str = "z.zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Downloading,
    Unzipping,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("a sync is already running")]
    Running,

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("unable to create {}: {source}", path.display())]
    Create { path: PathBuf, source: io::Error },

    #[error("unable to read {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("unexpected contents: \"{0}\"")]
    UnexpectedContents(String),

    #[error("no .{0} file found")]
    NoLibrary(&'static str),

    #[error("\"{}\": extract failed: {source}", path.display())]
    Extract { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

enum SyncTarget {
    Core { name: String, staging: TempDir },
    Database { path: PathBuf },
}

/// Sync progress kept by [`RetroWeb`].
#[derive(Default)]
pub(crate) struct SyncState {
    phase: SyncPhase,
    target: Option<SyncTarget>,
    http: Option<RetroHttp>,
    status: String,
    short_name: String,
    last_error: Option<SyncError>,
    /// Cores fetched during this sync, so a core that reports an unexpected
    /// name is not downloaded again.
    fetched: BTreeSet<String>,
}

/// Extract the single core library in `archive` into `dest`.
///
/// Other entries are skipped. A second library is an error, and the first
/// one is removed again.
pub fn extract_core(
    archive: &Path,
    dest: &Path,
    target: &BuildbotTarget,
) -> Result<PathBuf, SyncError> {
    let zip_err = |source| SyncError::Archive { path: archive.to_path_buf(), source };
    let file = File::open(archive)
        .map_err(|source| SyncError::Create { path: archive.to_path_buf(), source })?;
    let mut zip = zip::ZipArchive::new(file).map_err(zip_err)?;

    let mut found: Option<PathBuf> = None;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(zip_err)?;
        let name = entry.name().to_string();
        if entry.is_dir() || !target.is_library(&name) {
            warn!("unexpected contents: \"{}\"", name);
            continue;
        }
        if let Some(first) = found.take() {
            if let Err(e) = std::fs::remove_file(&first) {
                warn!("remove {}: {}", first.display(), e);
            }
            return Err(SyncError::UnexpectedContents(name));
        }
        let Some(file_name) =
            entry.enclosed_name().and_then(|p| p.file_name().map(|n| n.to_owned()))
        else {
            warn!("unexpected contents: \"{}\"", name);
            continue;
        };

        let out_path = dest.join(file_name);
        let extract_err = |source| SyncError::Extract { path: out_path.clone(), source };
        let mut out = File::create(&out_path).map_err(extract_err)?;
        if let Err(e) = io::copy(&mut entry, &mut out).and_then(|_| out.flush()) {
            drop(out);
            let _ = std::fs::remove_file(&out_path);
            return Err(extract_err(e));
        }
        found = Some(out_path);
    }
    found.ok_or(SyncError::NoLibrary(target.lib_ext))
}

fn file_sink(path: &Path) -> Result<DataSink, SyncError> {
    let mut file = File::create(path)
        .map_err(|source| SyncError::Create { path: path.to_path_buf(), source })?;
    Ok(Box::new(move |bytes, _total| file.write_all(bytes)))
}

impl RetroWeb {
    fn http(&mut self) -> Result<&mut RetroHttp, SyncError> {
        let http = match self.sync.http.take() {
            Some(http) => http,
            None => RetroHttp::new(HttpOptions {
                user_agent: self.config().sync.user_agent.clone(),
                timeout: Duration::from_secs(self.config().sync.timeout_secs),
            })?,
        };
        Ok(self.sync.http.insert(http))
    }

    /// Wanted cores the cache does not have yet, in configured order.
    pub fn missing_cores(&self) -> Vec<String> {
        let present: BTreeSet<&str> =
            self.cores().map(|c| self.target().wanted_name(c.name())).collect();
        self.config()
            .sync
            .wanted_cores
            .iter()
            .filter(|name| !present.contains(name.as_str()) && !self.sync.fetched.contains(*name))
            .cloned()
            .collect()
    }

    /// Start downloading the next missing resource.
    ///
    /// Returns false if there is nothing to fetch.
    pub fn start_sync(&mut self) -> Result<bool, SyncError> {
        if self.sync.phase != SyncPhase::Idle {
            return Err(SyncError::Running);
        }
        self.http()?.clear_error();
        self.sync.last_error = None;
        match self.start_next() {
            Ok(started) => Ok(started),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn start_next(&mut self) -> Result<bool, SyncError> {
        let (url, target, out_path) = if let Some(name) = self.missing_cores().into_iter().next() {
            let url = self.target().core_url(&self.config().sync.buildbot_url, &name);
            let staging = tempfile::Builder::new()
                .prefix("retroweb.")
                .tempdir()
                .map_err(|source| SyncError::Create { path: std::env::temp_dir(), source })?;
            let out_path = staging.path().join(ARCHIVE_NAME);
            (url, SyncTarget::Core { name, staging }, out_path)
        } else if !self.have_nst_database() {
            let path = self.layout().system.join(NST_DATABASE);
            let url = self.config().sync.database_url.clone();
            (url, SyncTarget::Database { path: path.clone() }, path)
        } else {
            self.sync.phase = SyncPhase::Idle;
            self.sync.status = "idle".to_string();
            self.sync.fetched.clear();
            return Ok(false);
        };

        let sink = file_sink(&out_path)?;
        if let Err(e) = self.http()?.start_get(&url, sink) {
            if let SyncTarget::Database { path } = &target {
                let _ = std::fs::remove_file(path);
            }
            return Err(e.into());
        }
        let short_name = self
            .http()?
            .url_path()
            .map(|p| p.trim_start_matches('/').to_string())
            .unwrap_or_default();
        info!("sync: fetching {}", url);
        self.sync.status = format!("{:5.1}% {}", 0.0, short_name);
        self.sync.short_name = short_name;
        self.sync.target = Some(target);
        self.sync.phase = SyncPhase::Downloading;
        Ok(true)
    }

    /// Abandon the current target and return to idle.
    fn fail(&mut self, e: &SyncError) {
        error!("sync: {}", e);
        if let Some(http) = self.sync.http.as_mut() {
            http.remove_get();
        }
        if let Some(SyncTarget::Database { path }) = self.sync.target.take() {
            let _ = std::fs::remove_file(path);
        }
        self.sync.status = match e {
            SyncError::Http(HttpError::HttpStatus(code)) => format!("http/{code}"),
            other => other.to_string(),
        };
        self.sync.phase = SyncPhase::Idle;
        self.sync.fetched.clear();
    }

    /// Advance the sync. Returns the phase it is in afterwards.
    pub fn poll_sync(&mut self) -> SyncPhase {
        let result = match self.sync.phase {
            SyncPhase::Idle => return SyncPhase::Idle,
            SyncPhase::Downloading => self.poll_download(),
            SyncPhase::Unzipping => self.unzip_and_continue(),
        };
        if let Err(e) = result {
            self.fail(&e);
            self.sync.last_error = Some(e);
        }
        self.sync.phase
    }

    fn poll_download(&mut self) -> Result<(), SyncError> {
        let http = self.http()?;
        match http.poll_get() {
            PollStatus::InProgress(fraction) => {
                self.sync.status = format!("{:5.1}% {}", fraction * 100.0, self.sync.short_name);
                Ok(())
            }
            PollStatus::Done => {
                if let Some(e) = http.error().cloned() {
                    return Err(e.into());
                }
                http.remove_get();
                match &self.sync.target {
                    Some(SyncTarget::Core { .. }) => {
                        self.sync.phase = SyncPhase::Unzipping;
                        self.sync.status = "unzip".to_string();
                    }
                    _ => {
                        self.sync.target = None;
                        info!("sync: {} done", NST_DATABASE);
                        self.list_cache_contents()?;
                        self.start_next()?;
                    }
                }
                Ok(())
            }
        }
    }

    fn unzip_and_continue(&mut self) -> Result<(), SyncError> {
        let Some(SyncTarget::Core { name, staging }) = self.sync.target.take() else {
            self.sync.phase = SyncPhase::Idle;
            return Ok(());
        };
        let archive = staging.path().join(ARCHIVE_NAME);
        let core_path = extract_core(&archive, &self.layout().cores, self.target())?;
        if let Err(e) = staging.close() {
            warn!("sync: removing staging dir: {}", e);
        }
        info!("sync: core {} extracted to {}", name, core_path.display());
        self.sync.fetched.insert(name);
        self.add_to_cores(&core_path)?;
        self.list_cache_contents()?;
        self.start_next()?;
        Ok(())
    }

    /// Block until the download has news or `timeout` elapses.
    pub fn wait_sync(&mut self, timeout: Duration) -> bool {
        match (self.sync.phase, self.sync.http.as_mut()) {
            (SyncPhase::Downloading, Some(http)) => http.wait(timeout),
            (SyncPhase::Unzipping, _) => true,
            _ => false,
        }
    }

    /// Cancel the sync and clean up partial downloads.
    pub fn stop_sync(&mut self) {
        if let Some(http) = self.sync.http.as_mut() {
            http.remove_get();
        }
        if let Some(SyncTarget::Database { path }) = self.sync.target.take() {
            let _ = std::fs::remove_file(path);
        }
        self.sync.phase = SyncPhase::Idle;
        self.sync.status = "stopped".to_string();
        self.sync.fetched.clear();
    }

    pub fn is_sync_running(&self) -> bool {
        self.sync.phase != SyncPhase::Idle
    }

    pub fn sync_phase(&self) -> SyncPhase {
        self.sync.phase
    }

    /// One-line description of the sync, for display.
    pub fn sync_status(&self) -> &str {
        if self.sync.status.is_empty() { "idle" } else { &self.sync.status }
    }

    /// Why the last sync stopped early while being polled, if it did.
    pub fn last_sync_error(&self) -> Option<&SyncError> {
        self.sync.last_error.as_ref()
    }
}
