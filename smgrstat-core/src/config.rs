//! # Configuration Management
//!
//! Runtime settings for sessions and the collector.
//!
//! Settings marked *reloadable* take effect without a restart: sessions read
//! the temp tracking mode on every operation and the collector re-reads the
//! whole tree when it receives a reload signal.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub collector: CollectorConfig,
    pub tracking: TrackingConfig,
    pub lineage: LineageConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a JSON configuration document; missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Reject values outside their documented ranges
    pub fn validate(&self) -> Result<()> {
        let interval = self.collector.collection_interval_secs;
        if !(MIN_COLLECTION_INTERVAL_SECS..=MAX_COLLECTION_INTERVAL_SECS).contains(&interval) {
            return Err(Error::Configuration {
                message: format!(
                    "collection_interval_secs must be between {} and {}, got {}",
                    MIN_COLLECTION_INTERVAL_SECS, MAX_COLLECTION_INTERVAL_SECS, interval
                ),
            });
        }
        if self.collector.retention_hours > MAX_RETENTION_HOURS {
            return Err(Error::Configuration {
                message: format!(
                    "retention_hours must be at most {}, got {}",
                    MAX_RETENTION_HOURS, self.collector.retention_hours
                ),
            });
        }
        if self.collector.database.is_empty() {
            return Err(Error::Configuration {
                message: "collector database name must not be empty".to_string(),
            });
        }
        let capacity = self.lineage.queue_capacity;
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(Error::Configuration {
                message: format!("lineage queue_capacity must be a power of two, got {}", capacity),
            });
        }
        let shards = self.tracking.store_shards;
        if shards < 2 || !shards.is_power_of_two() {
            return Err(Error::Configuration {
                message: format!("store_shards must be a power of two >= 2, got {}", shards),
            });
        }
        Ok(())
    }
}

/// Smallest accepted collection interval
pub const MIN_COLLECTION_INTERVAL_SECS: u64 = 1;

/// Largest accepted collection interval
pub const MAX_COLLECTION_INTERVAL_SECS: u64 = 3600;

/// Largest accepted retention, one hundred years
pub const MAX_RETENTION_HOURS: i64 = 100 * 365 * 24;

/// Collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Database the collector connects to for catalog access
    pub database: String,
    /// Seconds between collections (1..=3600, reloadable)
    pub collection_interval_secs: u64,
    /// History rows older than this are deleted; `<= 0` keeps everything
    pub retention_hours: i64,
}

impl CollectorConfig {
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    /// Retention horizon, `None` when retention is disabled
    pub fn retention(&self) -> Option<Duration> {
        if self.retention_hours <= 0 {
            return None;
        }
        (self.retention_hours as u64).checked_mul(3600).map(Duration::from_secs)
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            database: "postgres".to_string(),
            collection_interval_secs: 60,
            retention_hours: 168, // one week
        }
    }
}

/// How I/O on temporary objects is attributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempTracking {
    /// Not tracked at all
    Off,
    /// Tracked under the object's own key
    Individual,
    /// Folded into one synthetic key per database
    Aggregate,
}

impl Default for TempTracking {
    fn default() -> Self {
        TempTracking::Aggregate
    }
}

impl FromStr for TempTracking {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(TempTracking::Off),
            "individual" => Ok(TempTracking::Individual),
            "aggregate" => Ok(TempTracking::Aggregate),
            other => Err(Error::Configuration {
                message: format!("unknown temp tracking mode: {}", other),
            }),
        }
    }
}

impl fmt::Display for TempTracking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TempTracking::Off => "off",
            TempTracking::Individual => "individual",
            TempTracking::Aggregate => "aggregate",
        })
    }
}

/// Hot-path tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Temporary object attribution (reloadable)
    pub track_temp_tables: TempTracking,
    /// Lock partitions of the shared store, power of two
    pub store_shards: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            track_temp_tables: TempTracking::Aggregate,
            store_shards: 64,
        }
    }
}

/// Lineage queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineageConfig {
    /// Ring capacity, power of two
    pub queue_capacity: usize,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self { queue_capacity: 1024 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
        }
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Log formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Configuration shared between sessions and the collector
///
/// Cloning is cheap; all clones observe the same settings.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy of the current settings
    pub fn get(&self) -> Config {
        self.inner.read().clone()
    }

    pub fn temp_tracking(&self) -> TempTracking {
        self.inner.read().tracking.track_temp_tables
    }

    /// Replace the settings after validating them
    pub fn replace(&self, config: Config) -> Result<()> {
        config.validate()?;
        *self.inner.write() = config;
        Ok(())
    }

    /// Change the temp tracking mode in place
    pub fn set_temp_tracking(&self, mode: TempTracking) {
        self.inner.write().tracking.track_temp_tables = mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.collector.database, "postgres");
        assert_eq!(config.collector.collection_interval(), Duration::from_secs(60));
        assert_eq!(config.tracking.track_temp_tables, TempTracking::Aggregate);
        assert_eq!(config.lineage.queue_capacity, 1024);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = Config::from_json_str(
            r#"{ "collector": { "collection_interval_secs": 5 }, "tracking": { "track_temp_tables": "off" } }"#,
        )
        .unwrap();
        assert_eq!(config.collector.collection_interval_secs, 5);
        assert_eq!(config.collector.database, "postgres");
        assert_eq!(config.tracking.track_temp_tables, TempTracking::Off);
    }

    #[test]
    fn test_interval_bounds() {
        let mut config = Config::default();
        config.collector.collection_interval_secs = 0;
        assert!(config.validate().is_err());
        config.collector.collection_interval_secs = 3601;
        assert!(config.validate().is_err());
        config.collector.collection_interval_secs = 3600;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retention_disabled_when_not_positive() {
        let mut collector = CollectorConfig::default();
        assert_eq!(collector.retention(), Some(Duration::from_secs(168 * 3600)));
        collector.retention_hours = 0;
        assert_eq!(collector.retention(), None);
        collector.retention_hours = -3;
        assert_eq!(collector.retention(), None);
    }

    #[test]
    fn test_shared_config_visible_to_clones() {
        let shared = SharedConfig::default();
        let other = shared.clone();
        other.set_temp_tracking(TempTracking::Individual);
        assert_eq!(shared.temp_tracking(), TempTracking::Individual);

        let mut bad = Config::default();
        bad.lineage.queue_capacity = 1000;
        assert!(shared.replace(bad).is_err());
    }

    #[test]
    fn test_temp_tracking_parse() {
        assert_eq!("Aggregate".parse::<TempTracking>().unwrap(), TempTracking::Aggregate);
        assert!("sometimes".parse::<TempTracking>().is_err());
    }
}
