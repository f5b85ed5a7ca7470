//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in `koth-config.yaml`. This module
//! defines strongly-typed structs that mirror the YAML structure and a
//! loader that reads the file. Every field has a default, so a partial file
//! (or none at all) yields a working configuration.
//!
//! The `schedules` section only seeds the schedule engine on first run; once
//! the store holds a schedule, the stored copy is authoritative.

use std::path::Path;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `koth-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KothConfig {
    /// Capture timing settings.
    #[serde(default)]
    pub settings: SettingsConfig,

    /// Initial schedule settings.
    #[serde(default)]
    pub schedules: ScheduleConfig,

    /// Reward command templates.
    #[serde(default)]
    pub rewards: RewardsConfig,

    /// Announcement templates.
    #[serde(default)]
    pub messages: MessagesConfig,

    /// Persistence location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Cuboid zones served by the in-memory occupancy oracle.
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl KothConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `KOTH_DATA_FILE` overrides `storage.data_file` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.storage.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.storage.apply_env_overrides();
        Ok(config)
    }
}

/// Capture timing settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SettingsConfig {
    /// Hold time assigned to newly created contests.
    #[serde(default = "default_capture_time_seconds")]
    pub capture_time_seconds: u32,

    /// Remaining-time broadcasts fire when the countdown is a multiple of
    /// this value. Zero disables them.
    #[serde(default = "default_message_interval_seconds")]
    pub message_interval_seconds: u32,

    /// Real-time milliseconds between capture ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            capture_time_seconds: default_capture_time_seconds(),
            message_interval_seconds: default_message_interval_seconds(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Initial schedule settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScheduleConfig {
    /// Whether scheduled auto-starts are enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// IANA time zone the scheduled times are expressed in.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Daily start times, `HH:MM`.
    #[serde(default)]
    pub times: Vec<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: default_timezone(),
            times: Vec::new(),
        }
    }
}

/// Reward command templates.
///
/// `{player}` is replaced by the winner and `{koth}` by the contest name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RewardsConfig {
    /// Commands run for every winner, in order.
    #[serde(default)]
    pub commands: Vec<String>,
}

/// Announcement templates used by the daemon's announcer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessagesConfig {
    /// Prepended to every announcement.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Broadcast when a contest starts. Placeholder: `{name}`.
    #[serde(default = "default_started")]
    pub started: String,

    /// Broadcast when a contest ends. Placeholder: `{name}`.
    #[serde(default = "default_ended")]
    pub ended: String,

    /// Broadcast when a contest is won. Placeholders: `{name}`, `{player}`.
    #[serde(default = "default_captured")]
    pub captured: String,

    /// Sent to an actor that becomes the holder.
    #[serde(default = "default_start_capture")]
    pub start_capture: String,

    /// Sent to a holder that loses the zone.
    #[serde(default = "default_leave_capture")]
    pub leave_capture: String,

    /// Periodic remaining-time broadcast. Placeholders: `{name}`, `{time}`.
    #[serde(default = "default_time_remaining")]
    pub time_remaining: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            started: default_started(),
            ended: default_ended(),
            captured: default_captured(),
            start_capture: default_start_capture(),
            leave_capture: default_leave_capture(),
            time_remaining: default_time_remaining(),
        }
    }
}

/// Persistence location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// YAML file holding contests and the schedule.
    #[serde(default = "default_data_file")]
    pub data_file: String,
}

impl StorageConfig {
    /// Override the data file path with `KOTH_DATA_FILE` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("KOTH_DATA_FILE") {
            self.data_file = val;
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
        }
    }
}

/// An axis-aligned cuboid region for the in-memory oracle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ZoneConfig {
    /// Region identifier, referenced by contests.
    pub region: String,

    /// World the region lives in.
    pub world: String,

    /// One corner, `[x, y, z]`.
    pub min: [f64; 3],

    /// The opposite corner, `[x, y, z]`.
    pub max: [f64; 3],
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_capture_time_seconds() -> u32 {
    300
}

const fn default_message_interval_seconds() -> u32 {
    30
}

const fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_timezone() -> String {
    "America/Argentina/Buenos_Aires".to_owned()
}

fn default_prefix() -> String {
    "[KOTH]".to_owned()
}

fn default_started() -> String {
    "The hill {name} is open! Stand alone in the zone to capture it.".to_owned()
}

fn default_ended() -> String {
    "The hill {name} is closed.".to_owned()
}

fn default_captured() -> String {
    "{player} captured {name}!".to_owned()
}

fn default_start_capture() -> String {
    "You are capturing the hill. Stay inside!".to_owned()
}

fn default_leave_capture() -> String {
    "You lost control of the hill.".to_owned()
}

fn default_time_remaining() -> String {
    "{name}: {time} left to capture.".to_owned()
}

fn default_data_file() -> String {
    "koth-data.yaml".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_log_format() -> String {
    "pretty".to_owned()
}

const fn default_true() -> bool {
    true
}
