//! Launcher commands
//!
//! Each command works on a [`RetroWeb`] that was already listed, and reports
//! through `println!` and tracing.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use retrohost_core::app::config;
use retrohost_core::{CacheLayout, Config, LoadSaveOutcome, RetroWeb, SyncPhase, save_screenshot};
use serde::Serialize;

use crate::headless::HeadlessUi;

/// Open the cache the configuration points at and index it.
pub fn open_cache(config: Config) -> Result<RetroWeb> {
    let layout = CacheLayout::from_base_dirs()
        .context("Failed to find the home directory")?
        .with_overrides(&config.paths);
    let mut web = RetroWeb::new(layout, config).context("Failed to create cache directories")?;
    web.list_cache_contents().context("Failed to list cache contents")?;
    Ok(web)
}

/// Returns the screenshots directory.
pub fn screenshots_dir() -> Option<PathBuf> {
    config::config_dir().map(|dir| dir.join("screenshots"))
}

// ============================================================================
// list
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CoreSummary {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub extensions: Vec<String>,
    pub no_rom: bool,
}

#[derive(Debug, Serialize)]
pub struct AppSummary {
    pub name: String,
    pub file_type: String,
    pub core: String,
}

/// Everything `list` shows.
#[derive(Debug, Serialize)]
pub struct CacheSummary {
    pub cores: Vec<CoreSummary>,
    pub apps: Vec<AppSummary>,
    pub saves: Vec<String>,
    pub have_nst_database: bool,
}

pub fn summarize(web: &RetroWeb) -> CacheSummary {
    CacheSummary {
        cores: web
            .cores()
            .map(|c| CoreSummary {
                name: c.name().to_string(),
                version: c.version().to_string(),
                path: c.path().to_path_buf(),
                extensions: c.support().to_vec(),
                no_rom: c.no_rom(),
            })
            .collect(),
        apps: web
            .apps()
            .values()
            .map(|a| AppSummary {
                name: a.name().to_string(),
                file_type: a.file_type().to_string(),
                core: web
                    .core(a.core_path())
                    .map(|c| c.name().to_string())
                    .unwrap_or_default(),
            })
            .collect(),
        saves: web.saves().iter().cloned().collect(),
        have_nst_database: web.have_nst_database(),
    }
}

impl CacheSummary {
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Cores ({}):\n", self.cores.len()));
        for core in &self.cores {
            out.push_str(&format!(
                "  {} {} [{}]\n",
                core.name,
                core.version,
                core.extensions.join(", ")
            ));
        }
        out.push_str(&format!("Apps ({}):\n", self.apps.len()));
        for app in &self.apps {
            let kind = if app.file_type.is_empty() { "-" } else { app.file_type.as_str() };
            out.push_str(&format!("  {} ({}) on {}\n", app.name, kind, app.core));
        }
        out.push_str(&format!("Saves ({}):\n", self.saves.len()));
        for save in &self.saves {
            out.push_str(&format!("  {save}\n"));
        }
        out.push_str(&format!(
            "NES database: {}\n",
            if self.have_nst_database { "present" } else { "missing" }
        ));
        out
    }
}

pub fn list(web: &RetroWeb, json: bool) -> Result<()> {
    let summary = summarize(web);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary.to_text());
    }
    Ok(())
}

// ============================================================================
// sync
// ============================================================================

/// Download missing cores and system files, printing progress.
pub fn sync(web: &mut RetroWeb, timeout: Duration) -> Result<()> {
    if !web.start_sync()? {
        println!("Nothing to sync.");
        return Ok(());
    }
    let deadline = Instant::now() + timeout;
    let mut last_status = String::new();
    loop {
        web.wait_sync(Duration::from_millis(100));
        let phase = web.poll_sync();
        if web.sync_status() != last_status {
            last_status = web.sync_status().to_string();
            println!("{last_status}");
        }
        if phase == SyncPhase::Idle {
            break;
        }
        if Instant::now() >= deadline {
            web.stop_sync();
            bail!("Sync did not finish within {}s", timeout.as_secs());
        }
    }
    if let Some(e) = web.last_sync_error() {
        bail!("Sync failed: {e}");
    }
    println!("Sync complete.");
    Ok(())
}

// ============================================================================
// run
// ============================================================================

/// What `run` does with the game.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub frames: u64,
    /// Save to restore before the first frame
    pub load: Option<String>,
    /// Name to save as after the last frame
    pub save: Option<String>,
    /// Directory to write a screenshot of the last frame to
    pub screenshot_dir: Option<PathBuf>,
    pub audio_out: Option<PathBuf>,
}

/// Open `app` and run it.
pub fn run(web: &mut RetroWeb, app_name: &str, options: &RunOptions) -> Result<HeadlessUi> {
    open_app(web, app_name)?;
    if let Some(save) = &options.load {
        match web.load_save(Some(app_name), save)? {
            LoadSaveOutcome::Loaded => println!("Loaded save \"{save}\"."),
            LoadSaveOutcome::SwitchTo(other) => {
                bail!("Save \"{save}\" belongs to \"{other}\"; run that app instead")
            }
        }
    }

    let mut ui = HeadlessUi::default();
    {
        let (app, core) = web
            .app_and_core_mut(app_name)
            .with_context(|| format!("No app named \"{app_name}\""))?;
        for _ in 0..options.frames {
            app.next_frame(core, &mut ui)?;
        }
        tracing::info!(
            "ran {} frames of \"{}\" on core \"{}\"",
            core.frame_count(),
            app.name(),
            core.name()
        );
    }

    if let Some(save) = &options.save {
        web.save_to(app_name, save)?;
        println!("Saved \"{save}\".");
    }
    if let Some(dir) = &options.screenshot_dir {
        let frame = ui.last_frame.as_ref().context("The core produced no frame")?;
        let path = save_screenshot(&frame.as_frame(), dir, app_name)?;
        println!("Screenshot: {}", path.display());
    }
    if let Some(path) = &options.audio_out {
        ui.write_wav(path)?;
        println!("Audio: {} ({} samples)", path.display(), ui.samples.len());
    }
    Ok(ui)
}

fn open_app(web: &mut RetroWeb, app_name: &str) -> Result<()> {
    let (app, core) = web
        .app_and_core_mut(app_name)
        .with_context(|| format!("No app named \"{app_name}\""))?;
    if !app.is_open() {
        app.open(core)?;
    }
    Ok(())
}

// ============================================================================
// saves
// ============================================================================

/// Load save `name`, opening the app it belongs to.
///
/// Returns the name of the app the save was loaded into.
pub fn load_save(web: &mut RetroWeb, name: &str, app: Option<&str>) -> Result<String> {
    let mut current = app.map(str::to_string);
    if let Some(app) = &current {
        open_app(web, app)?;
    }
    match web.load_save(current.as_deref(), name)? {
        LoadSaveOutcome::Loaded => {}
        LoadSaveOutcome::SwitchTo(other) => {
            println!("Save \"{name}\" belongs to \"{other}\"; switching.");
            open_app(web, &other)?;
            match web.load_save(Some(&other), name)? {
                LoadSaveOutcome::Loaded => {}
                LoadSaveOutcome::SwitchTo(again) => {
                    bail!("Save \"{name}\" wants \"{again}\" after switching")
                }
            }
            current = Some(other);
        }
    }
    let app = current.unwrap_or_default();
    println!("Loaded save \"{name}\" into \"{app}\".");
    Ok(app)
}

pub fn rename_save(web: &mut RetroWeb, from: &str, to: &str) -> Result<()> {
    web.rename_save(from, to)?;
    println!("Renamed \"{from}\" to \"{to}\".");
    Ok(())
}

// ============================================================================
// config
// ============================================================================

/// Print the effective configuration, optionally writing the defaults out.
pub fn show_config(config: &Config, write_default: bool) -> Result<()> {
    let path = config::config_dir().map(|dir| dir.join("config.toml"));
    if write_default {
        match &path {
            Some(p) if p.exists() => println!("{} already exists; not overwritten.", p.display()),
            Some(p) => {
                config::save(&Config::default()).context("Failed to write config")?;
                println!("Wrote {}", p.display());
            }
            None => bail!("No configuration directory on this platform"),
        }
    }
    if let Some(p) = &path {
        println!("# {}", p.display());
    }
    print!("{}", config::to_toml(config).context("Failed to serialize config")?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn web(root: &Path) -> RetroWeb {
        let layout = CacheLayout::under(&root.join("cache"), &root.join("config"));
        let mut web = RetroWeb::new(layout, Config::default()).unwrap();
        web.list_cache_contents().unwrap();
        web
    }

    // ========================================================================
    // list
    // ========================================================================

    #[test]
    fn test_summary_of_empty_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let summary = summarize(&web(tmp.path()));
        assert!(summary.cores.is_empty());
        assert!(summary.apps.is_empty());
        assert!(!summary.have_nst_database);

        let text = summary.to_text();
        assert!(text.contains("Cores (0):"));
        assert!(text.contains("NES database: missing"));
    }

    #[test]
    fn test_summary_lists_saves() {
        let tmp = tempfile::tempdir().unwrap();
        let mut web = web(tmp.path());
        std::fs::write(web.layout().saves.join("slot1.bin"), b"x").unwrap();
        web.list_cache_contents().unwrap();

        let summary = summarize(&web);
        assert_eq!(summary.saves, ["slot1"]);
        assert!(summary.to_text().contains("  slot1\n"));

        let json: serde_json::Value = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["saves"][0], "slot1");
        assert_eq!(json["have_nst_database"], false);
    }

    // ========================================================================
    // errors
    // ========================================================================

    #[test]
    fn test_run_unknown_app() {
        let tmp = tempfile::tempdir().unwrap();
        let mut web = web(tmp.path());
        let err = run(&mut web, "nope", &RunOptions::default()).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_rename_unknown_save() {
        let tmp = tempfile::tempdir().unwrap();
        let mut web = web(tmp.path());
        assert!(rename_save(&mut web, "a", "b").is_err());
    }

    #[test]
    fn test_sync_with_nothing_wanted() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = CacheLayout::under(&tmp.path().join("cache"), &tmp.path().join("config"));
        let mut config = Config::default();
        config.sync.wanted_cores.clear();
        let mut web = RetroWeb::new(layout, config).unwrap();
        let database = web.layout().system.join(retrohost_core::library::NST_DATABASE);
        std::fs::write(database, b"<xml/>").unwrap();
        web.list_cache_contents().unwrap();
        sync(&mut web, Duration::from_secs(1)).unwrap();
    }
}
