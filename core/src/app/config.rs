//! Configuration management (config.toml)
//!
//! Handles loading, saving, and providing defaults for host settings.
//! Settings are stored in TOML format in the platform-specific config directory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::ffi::*;
use crate::retro_core::{CoreDirs, CoreOptions, DEFAULT_TOO_EARLY_FRAMES};

/// Host configuration.
///
/// Contains all user-configurable settings organized into sections.
/// Serialized to/from TOML format for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Directory overrides
    #[serde(default)]
    pub paths: PathsConfig,
    /// Core and database downloads
    #[serde(default)]
    pub sync: SyncConfig,
    /// Keyboard mapping
    #[serde(default)]
    pub input: InputConfig,
    /// Settings applied to every core
    #[serde(default)]
    pub core: CoreConfig,
}

/// Directory overrides. Unset entries use the platform cache/config dirs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PathsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saves: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub games: Option<PathBuf>,
    /// Extra directories scanned for games. New finds are copied into the game dir.
    #[serde(default)]
    pub extra_game_dirs: Vec<PathBuf>,
}

/// Download settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Buildbot nightly root (default: http://buildbot.libretro.com/nightly/)
    #[serde(default = "default_buildbot_url")]
    pub buildbot_url: String,
    /// NES game database download location
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Cores fetched by a sync when missing
    #[serde(default = "default_wanted_cores")]
    pub wanted_cores: Vec<String>,
    /// HTTP User-Agent (default: libretro)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Whole-transfer timeout in seconds (default: 300)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// One keyboard key driving one joypad button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBinding {
    /// RETROK key code
    pub key: usize,
    /// RETRO_DEVICE_ID_JOYPAD_* button
    pub joypad: u32,
}

/// Keyboard settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Drive the first joypad from the keyboard (default: true)
    #[serde(default = "default_true")]
    pub map_keys_to_joypad: bool,
    #[serde(default = "default_key_to_joypad")]
    pub key_to_joypad: Vec<KeyBinding>,
}

/// Per-core behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Frames during which a failed save is reported as "too early" (default: 30)
    #[serde(default = "default_too_early_frames")]
    pub too_early_frames: u64,
    /// Core variable overrides, applied when a core declares the variable
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

fn default_buildbot_url() -> String {
    "http://buildbot.libretro.com/nightly/".to_string()
}
fn default_database_url() -> String {
    "https://raw.githubusercontent.com/libretro/nestopia/master/NstDatabase.xml".to_string()
}
fn default_wanted_cores() -> Vec<String> {
    ["2048", "nestopia", "stella", "snes9x"].map(String::from).to_vec()
}
fn default_user_agent() -> String {
    "libretro".to_string()
}
fn default_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}
fn default_key_to_joypad() -> Vec<KeyBinding> {
    // RETROK codes: arrows, a, d, right shift, z, c, return
    [
        (273, RETRO_DEVICE_ID_JOYPAD_UP),
        (274, RETRO_DEVICE_ID_JOYPAD_DOWN),
        (276, RETRO_DEVICE_ID_JOYPAD_LEFT),
        (275, RETRO_DEVICE_ID_JOYPAD_RIGHT),
        (97, RETRO_DEVICE_ID_JOYPAD_Y),
        (100, RETRO_DEVICE_ID_JOYPAD_X),
        (303, RETRO_DEVICE_ID_JOYPAD_SELECT),
        (122, RETRO_DEVICE_ID_JOYPAD_B),
        (99, RETRO_DEVICE_ID_JOYPAD_A),
        (13, RETRO_DEVICE_ID_JOYPAD_START),
    ]
    .map(|(key, joypad)| KeyBinding { key, joypad })
    .to_vec()
}

fn default_too_early_frames() -> u64 {
    DEFAULT_TOO_EARLY_FRAMES
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            buildbot_url: default_buildbot_url(),
            database_url: default_database_url(),
            wanted_cores: default_wanted_cores(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            map_keys_to_joypad: default_true(),
            key_to_joypad: default_key_to_joypad(),
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            too_early_frames: default_too_early_frames(),
            variables: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Options handed to every core loaded with this configuration.
    pub fn core_options(&self, dirs: CoreDirs) -> CoreOptions {
        CoreOptions {
            dirs,
            too_early_frames: self.core.too_early_frames,
            variable_overrides: self
                .core
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            map_keys_to_joypad: self.input.map_keys_to_joypad,
            key_to_joypad: self.input.key_to_joypad.iter().map(|b| (b.key, b.joypad)).collect(),
        }
    }
}

/// Directory holding `config.toml`.
///
/// On Windows: `%APPDATA%\Retrohost\config`
/// On macOS: `~/Library/Application Support/io.retrohost.Retrohost`
/// On Linux: `~/.config/retrohost`
///
/// `None` without a home directory.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.retrohost", "", "Retrohost")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Read `config.toml`, or the defaults if it is missing or invalid.
pub fn load() -> Config {
    config_dir()
        .and_then(|dir| std::fs::read_to_string(dir.join("config.toml")).ok())
        .and_then(|content| parse(&content))
        .unwrap_or_default()
}

/// Parse a config file, logging why it was rejected.
pub fn parse(content: &str) -> Option<Config> {
    toml::from_str(content)
        .inspect_err(|e| tracing::warn!("Ignoring invalid config.toml: {}", e))
        .ok()
}

/// Render the configuration the way `config.toml` stores it.
pub fn to_toml(config: &Config) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(config)
}

/// Write `config.toml`, creating its directory first.
///
/// Does nothing on platforms without a configuration directory.
pub fn save(config: &Config) -> std::io::Result<()> {
    if let Some(dir) = config_dir() {
        std::fs::create_dir_all(&dir)?;
        let content = to_toml(config).map_err(std::io::Error::other)?;
        std::fs::write(dir.join("config.toml"), content)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // =============================================================
    // Default value tests
    // =============================================================

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.sync.buildbot_url, "http://buildbot.libretro.com/nightly/");
        assert_eq!(config.sync.wanted_cores, ["2048", "nestopia", "stella", "snes9x"]);
        assert_eq!(config.sync.user_agent, "libretro");
        assert_eq!(config.sync.timeout_secs, 300);
        assert!(config.input.map_keys_to_joypad);
        assert_eq!(config.input.key_to_joypad.len(), 10);
        assert_eq!(config.core.too_early_frames, 30);
        assert!(config.paths.cores.is_none());
    }

    // =============================================================
    // TOML serialization tests
    // =============================================================

    #[test]
    fn test_config_serialize_roundtrip() {
        let mut config = Config::default();
        config.paths.games = Some(PathBuf::from("/srv/games"));
        config.sync.wanted_cores = vec!["stella".into()];
        config.core.variables.insert("nestopia_palette".into(), "raw".into());

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_config_deserialize_empty() {
        // Empty TOML should produce defaults
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_deserialize_partial_sync() {
        let toml_str = r#"
[sync]
timeout_secs = 30
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sync.timeout_secs, 30);
        assert_eq!(config.sync.user_agent, "libretro"); // default
        assert_eq!(config.sync.wanted_cores.len(), 4); // default
    }

    #[test]
    fn test_config_deserialize_input_and_core() {
        let toml_str = r#"
[input]
map_keys_to_joypad = false
key_to_joypad = [{ key = 32, joypad = 8 }]

[core]
too_early_frames = 90

[core.variables]
snes9x_overclock = "disabled"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(!config.input.map_keys_to_joypad);
        assert_eq!(config.input.key_to_joypad, vec![KeyBinding { key: 32, joypad: 8 }]);
        assert_eq!(config.core.too_early_frames, 90);
        assert_eq!(config.core.variables["snes9x_overclock"], "disabled");
    }

    #[test]
    fn test_parse_invalid_returns_none() {
        assert!(parse("[sync]\ntimeout_secs = \"soon\"").is_none());
    }

    #[test]
    fn test_core_options_from_config() {
        let mut config = Config::default();
        config.core.variables.insert("a".into(), "b".into());
        let options = config.core_options(CoreDirs::default());
        assert_eq!(options.too_early_frames, 30);
        assert_eq!(options.variable_overrides.get("a").map(String::as_str), Some("b"));
        assert!(options.key_to_joypad.contains(&(13, RETRO_DEVICE_ID_JOYPAD_START)));
    }
}
