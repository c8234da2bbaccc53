//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [session]    # cache and write-policy settings
//! [database]   # SQLite backing store
//! [sweeps]     # background sweep timing
//! [logging]    # log file and filter
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_session::StoreConfig;

use crate::ConfigError;

/// Application name used when `[database] app_name` is not set.
pub const DEFAULT_APP_NAME: &str = "tether";

/// Default seconds between invalidation sweeps.
pub const DEFAULT_INVALIDATION_INTERVAL_SECS: u64 = 60;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Session store settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSection>,

    /// Backing database settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseSection>,

    /// Background sweep settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweeps: Option<SweepSection>,

    /// Logging settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSection>,
}

impl TetherConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, not field by field.
    pub fn merge(&mut self, other: TetherConfig) {
        if other.session.is_some() {
            self.session = other.session;
        }
        if other.database.is_some() {
            self.database = other.database;
        }
        if other.sweeps.is_some() {
            self.sweeps = other.sweeps;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// The store configuration, with defaults for anything not set.
    pub fn store_config(&self) -> StoreConfig {
        self.session
            .as_ref()
            .map(SessionSection::to_store_config)
            .unwrap_or_default()
    }

    /// Application name that scopes stored sessions.
    pub fn app_name(&self) -> &str {
        self.database
            .as_ref()
            .and_then(|d| d.app_name.as_deref())
            .unwrap_or(DEFAULT_APP_NAME)
    }

    /// Configured database path, if any.
    pub fn database_path(&self) -> Option<&PathBuf> {
        self.database.as_ref().and_then(|d| d.path.as_ref())
    }

    /// Interval between invalidation sweeps.
    pub fn invalidation_interval(&self) -> Duration {
        let secs = self
            .sweeps
            .as_ref()
            .map(|s| s.invalidation_interval_secs)
            .unwrap_or(DEFAULT_INVALIDATION_INTERVAL_SECS);
        Duration::from_secs(secs)
    }

    /// This config with every default filled in, for display.
    pub fn resolved(&self) -> TetherConfig {
        let database = self.database.clone().unwrap_or_default();
        TetherConfig {
            session: Some(SessionSection::from(&self.store_config())),
            database: Some(DatabaseSection {
                app_name: Some(self.app_name().to_string()),
                ..database
            }),
            sweeps: Some(SweepSection {
                invalidation_interval_secs: self.invalidation_interval().as_secs(),
            }),
            logging: self.logging.clone(),
        }
    }

    /// Check that the config describes a store that can run.
    pub fn validate(&self) -> crate::Result<()> {
        self.store_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.invalidation_interval().is_zero() {
            return Err(ConfigError::Invalid(
                "sweeps.invalidation_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// `[session]` section. Unset fields keep the store defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Sessions held in memory before LRU eviction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    /// Write last-access time on every access.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immediate_write: Option<bool>,
    /// Write dirty sessions from a periodic cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_based_write: Option<bool>,
    /// Seconds between time-based write cycles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_interval_secs: Option<u64>,
    /// Only sweep during the two invalidation hours.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_invalidation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalidation_hour_1: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalidation_hour_2: Option<u32>,
    /// Let other peers open the sweep gate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_invalidation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_after_passivation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimize_version_increments: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_recently_invalidated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recently_invalidated_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_all_attributes: Option<bool>,
    /// Idle timeout for new sessions in seconds (-1 never expires).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_max_inactive_secs: Option<i32>,
    /// Accept identifiers of any length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternate_id_scheme: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_length: Option<usize>,
}

impl SessionSection {
    /// Apply the set fields on top of the store defaults.
    pub fn to_store_config(&self) -> StoreConfig {
        let mut config = StoreConfig::default();
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        if let Some(enabled) = self.immediate_write {
            config.immediate_write = enabled;
        }
        if let Some(enabled) = self.time_based_write {
            config.time_based_write = enabled;
        }
        if let Some(secs) = self.write_interval_secs {
            config.write_interval = Duration::from_secs(secs);
        }
        if let Some(enabled) = self.scheduled_invalidation {
            config.scheduled_invalidation = enabled;
        }
        if let Some(hour) = self.invalidation_hour_1 {
            config.invalidation_hours.0 = hour;
        }
        if let Some(hour) = self.invalidation_hour_2 {
            config.invalidation_hours.1 = hour;
        }
        if let Some(enabled) = self.remote_invalidation {
            config.remote_invalidation = enabled;
        }
        if let Some(enabled) = self.persist_after_passivation {
            config.persist_after_passivation = enabled;
        }
        if let Some(enabled) = self.optimize_version_increments {
            config.optimize_version_increments = enabled;
        }
        if let Some(enabled) = self.check_recently_invalidated {
            config.check_recently_invalidated = enabled;
        }
        if let Some(capacity) = self.recently_invalidated_capacity {
            config.recently_invalidated_capacity = capacity;
        }
        if let Some(enabled) = self.write_all_attributes {
            config.write_all_attributes = enabled;
        }
        if let Some(secs) = self.default_max_inactive_secs {
            config.default_max_inactive_secs = secs;
        }
        if let Some(enabled) = self.alternate_id_scheme {
            config.alternate_id_scheme = enabled;
        }
        if let Some(len) = self.id_length {
            config.id_length = len;
        }
        config
    }
}

impl From<&StoreConfig> for SessionSection {
    fn from(config: &StoreConfig) -> Self {
        Self {
            capacity: Some(config.capacity),
            immediate_write: Some(config.immediate_write),
            time_based_write: Some(config.time_based_write),
            write_interval_secs: Some(config.write_interval.as_secs()),
            scheduled_invalidation: Some(config.scheduled_invalidation),
            invalidation_hour_1: Some(config.invalidation_hours.0),
            invalidation_hour_2: Some(config.invalidation_hours.1),
            remote_invalidation: Some(config.remote_invalidation),
            persist_after_passivation: Some(config.persist_after_passivation),
            optimize_version_increments: Some(config.optimize_version_increments),
            check_recently_invalidated: Some(config.check_recently_invalidated),
            recently_invalidated_capacity: Some(config.recently_invalidated_capacity),
            write_all_attributes: Some(config.write_all_attributes),
            default_max_inactive_secs: Some(config.default_max_inactive_secs),
            alternate_id_scheme: Some(config.alternate_id_scheme),
            id_length: Some(config.id_length),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Database
// ─────────────────────────────────────────────────────────────────────────────

/// How the SQLite store lays out session attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeLayout {
    #[default]
    SingleRow,
    MultiRow,
}

/// `[database]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// SQLite database file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Application name scoping the stored sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    pub layout: AttributeLayout,
    /// Minimum seconds between expiry sweeps across all peers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalidation_check_interval_secs: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Sweeps and logging
// ─────────────────────────────────────────────────────────────────────────────

/// `[sweeps]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSection {
    /// Seconds between invalidation sweeps on this peer.
    pub invalidation_interval_secs: u64,
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            invalidation_interval_secs: DEFAULT_INVALIDATION_INTERVAL_SECS,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Directory for daily-rotated JSON log files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// `tracing` filter directive used when `RUST_LOG` is not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}
