//! Scheduler configuration loaded from `lapse.toml`.
//!
//! Every field has a default, so a missing file or a partial file is valid.
//! `LAPSE_STORAGE_PATH` and `LAPSE_DATABASE_URL` take precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use lapse_core::Family;
use serde::{Deserialize, Serialize};

use crate::cadence::Cadence;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Cadence expression did not parse
    #[error("invalid cadence `{expr}`: {reason}")]
    InvalidCadence {
        /// Offending expression
        expr: String,
        /// What was wrong with it
        reason: String,
    },

    /// Config file unreadable
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file malformed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fire every enabled family once at boot instead of waiting a full period.
    pub run_on_startup: bool,

    /// Process expiry is wired but off unless this is set.
    pub process_cadence_enabled: bool,

    /// Offer expiry settings.
    pub offer: FamilyConfig,

    /// Process expiry settings.
    pub process: FamilyConfig,

    /// Entity store settings.
    pub storage: StorageConfig,
}

/// Settings for one entity family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyConfig {
    /// When the family's cycle fires.
    pub cadence: Cadence,
}

/// Which store backs the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory; nothing survives a restart
    Memory,
    /// JSON documents under `path`
    Json,
    /// SQLite database at `url`
    Sqlite,
}

/// Entity store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind.
    pub backend: StorageBackend,
    /// Root directory for the JSON backend.
    pub path: PathBuf,
    /// Connection string for the SQLite backend.
    pub url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Json,
            path: PathBuf::from(".lapse"),
            url: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_on_startup: false,
            process_cadence_enabled: false,
            offer: FamilyConfig {
                cadence: Cadence::DailyAt(NaiveTime::MIN),
            },
            process: FamilyConfig {
                cadence: Cadence::Every(Duration::from_secs(60)),
            },
            storage: StorageConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };

        // Environment wins over the file for connection settings.
        if let Ok(dir) = std::env::var("LAPSE_STORAGE_PATH") {
            if !dir.is_empty() {
                config.storage.path = PathBuf::from(dir);
            }
        }
        if let Ok(url) = std::env::var("LAPSE_DATABASE_URL") {
            if !url.is_empty() {
                config.storage.url = Some(url);
            }
        }

        Ok(config)
    }

    /// Parse a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Effective cadence for `family`, honouring the process flag.
    pub fn cadence_for(&self, family: Family) -> Cadence {
        match family {
            Family::Offer => self.offer.cadence,
            Family::Process if self.process_cadence_enabled => self.process.cadence,
            Family::Process => Cadence::Off,
        }
    }
}
