//! TOML-based configuration persistence for the client.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\RemDesk\config.toml`
//! - Linux:    `~/.config/remdesk/config.toml`
//! - macOS:    `~/Library/Application Support/RemDesk/config.toml`
//!
//! Example file:
//!
//! ```toml
//! [client]
//! log_level = "debug"
//!
//! [session]
//! frame_interval_ms = 500
//! connect_timeout_ms = 5000
//!
//! [[profiles]]
//! display_name = "office"
//! hostname = "10.0.0.5"
//! port = 3389
//! username = "alice"
//! protocol = "rdp"
//! ```
//!
//! Secrets never touch the file: `ConnectionConfig::secret` is skipped by
//! serde in both directions, and the binary takes it from `REMDESK_SECRET`.
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file, so a missing
//! file, a missing section, and a config written by an older version all load.

use std::path::{Path, PathBuf};
use std::time::Duration;

use remdesk_core::{ConnectionConfig, ProfileId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::connection_manager::SessionSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub session: SessionSettingsConfig,
    /// Saved connection profiles, in display order.
    #[serde(default)]
    pub profiles: Vec<ConnectionConfig>,
}

/// General client behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSettings {
    /// Schema version string – bump when breaking changes are introduced.
    #[serde(default = "default_version")]
    pub version: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Session tuning as written in the file (milliseconds).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSettingsConfig {
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    #[serde(default = "default_sink_timeout_ms")]
    pub sink_timeout_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_version() -> String {
    "1.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_frame_interval_ms() -> u64 {
    1_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_event_queue_capacity() -> usize {
    64
}
fn default_sink_timeout_ms() -> u64 {
    100
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            version: default_version(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SessionSettingsConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            event_queue_capacity: default_event_queue_capacity(),
            sink_timeout_ms: default_sink_timeout_ms(),
        }
    }
}

impl From<SessionSettingsConfig> for SessionSettings {
    fn from(cfg: SessionSettingsConfig) -> Self {
        SessionSettings {
            frame_interval: Duration::from_millis(cfg.frame_interval_ms),
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
            event_queue_capacity: cfg.event_queue_capacity,
            sink_timeout: Duration::from_millis(cfg.sink_timeout_ms),
        }
    }
}

impl AppConfig {
    /// Finds a profile by id, or by display name (case-insensitive).
    pub fn find_profile(&self, key: &str) -> Option<&ConnectionConfig> {
        if let Ok(id) = key.parse::<ProfileId>() {
            if let Some(profile) = self.profiles.iter().find(|p| p.id == id) {
                return Some(profile);
            }
        }
        self.profiles
            .iter()
            .find(|p| p.display_name.eq_ignore_ascii_case(key))
    }

    /// Inserts `profile`, replacing any profile with the same id.
    pub fn upsert_profile(&mut self, profile: ConnectionConfig) {
        match self.profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
    }

    /// Records a successful connect.  Returns `false` if no profile has `id`.
    pub fn mark_connected(&mut self, id: ProfileId, at: u64) -> bool {
        match self.profiles.iter_mut().find(|p| p.id == id) {
            Some(profile) => {
                profile.last_connected = Some(at);
                true
            }
            None => false,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to the platform config file.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(&config_file_path()?, config)
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `RemDesk`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("RemDesk"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("RemDesk")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("remdesk"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
