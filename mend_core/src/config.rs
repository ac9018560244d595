//! Configuration file support for Mend.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/mend/config.toml`.

use crate::export::ExportFormat;
use crate::scheduler::{MAX_CHECK_IN_COUNT, MAX_FOLLOW_UP_DAYS, MAX_FREQUENCY_HOURS};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub reminders: ReminderConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Reminder planning cadence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "default_check_in_interval_hours")]
    pub check_in_interval_hours: u32,

    #[serde(default = "default_check_in_count")]
    pub check_in_count: u32,

    #[serde(default = "default_follow_up_after_days")]
    pub follow_up_after_days: u32,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            check_in_interval_hours: default_check_in_interval_hours(),
            check_in_count: default_check_in_count(),
            follow_up_after_days: default_follow_up_after_days(),
        }
    }
}

/// Export defaults
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub default_format: ExportFormat,

    #[serde(default)]
    pub embed_photos: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_format: ExportFormat::default(),
            embed_photos: false,
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("mend")
}

fn default_check_in_interval_hours() -> u32 {
    24
}

fn default_check_in_count() -> u32 {
    3
}

fn default_follow_up_after_days() -> u32 {
    7
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("mend").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let reminders = &self.reminders;
        if !(1..=MAX_FREQUENCY_HOURS).contains(&reminders.check_in_interval_hours) {
            return Err(Error::Config(format!(
                "reminders.check_in_interval_hours must be between 1 and {}",
                MAX_FREQUENCY_HOURS
            )));
        }
        if reminders.check_in_count > MAX_CHECK_IN_COUNT {
            return Err(Error::Config(format!(
                "reminders.check_in_count must be at most {}",
                MAX_CHECK_IN_COUNT
            )));
        }
        if reminders.follow_up_after_days > MAX_FOLLOW_UP_DAYS {
            return Err(Error::Config(format!(
                "reminders.follow_up_after_days must be at most {}",
                MAX_FOLLOW_UP_DAYS
            )));
        }
        Ok(())
    }
}
