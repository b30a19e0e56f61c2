//! Runtime configuration.
//!
//! Settings come from three layers, later layers winning: built-in
//! defaults, an optional TOML file, then environment variables.
//!
//! ```toml
//! [evaluator]
//! ttl_seconds = 900
//! device_offline_seconds = 1200
//! still_interval_seconds = 600
//! tick_interval_seconds = 60
//!
//! [range]
//! tx_power = -59
//! path_loss_n = 2.0
//! threshold_m = 3.0
//!
//! [storage]
//! path = "beacons.db"
//!
//! [retry]
//! max_attempts = 3
//! backoff_ms = 400
//!
//! [snapshot]
//! capacity = 1024
//! ttl_seconds = 900
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::Thresholds;
use crate::ingest::{RangeModel, SnapshotCache};
use crate::store::RetryPolicy;

pub mod error;

pub use error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeaconwardConfig {
    #[serde(default)]
    pub evaluator: EvaluatorConfig,

    #[serde(default)]
    pub range: RangeConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// Evaluator timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Beacon silence after which it is presumed out of range
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Device silence after which it is demoted to offline
    #[serde(default = "default_device_offline_seconds")]
    pub device_offline_seconds: u64,

    /// Minimum spacing between heartbeats
    #[serde(default = "default_still_interval_seconds")]
    pub still_interval_seconds: u64,

    /// Period of the evaluator task
    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
}

/// RSSI to distance model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeConfig {
    /// Expected RSSI at one metre
    #[serde(default = "default_tx_power")]
    pub tx_power: i32,

    /// Path loss exponent
    #[serde(default = "default_path_loss_n")]
    pub path_loss_n: f64,

    /// Distance at or below which a beacon is in range
    #[serde(default = "default_threshold_m")]
    pub threshold_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

/// Transient storage fault retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Linear backoff step; attempt `n` waits `n * backoff_ms`
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

/// Live snapshot cache bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_capacity")]
    pub capacity: usize,

    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

// Default value functions
fn default_ttl_seconds() -> u64 {
    900
}

fn default_device_offline_seconds() -> u64 {
    1200
}

fn default_still_interval_seconds() -> u64 {
    600
}

fn default_tick_interval_seconds() -> u64 {
    60
}

fn default_tx_power() -> i32 {
    -59
}

fn default_path_loss_n() -> f64 {
    2.0
}

fn default_threshold_m() -> f64 {
    3.0
}

fn default_db_path() -> PathBuf {
    PathBuf::from("beacons.db")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    400
}

fn default_snapshot_capacity() -> usize {
    1024
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            device_offline_seconds: default_device_offline_seconds(),
            still_interval_seconds: default_still_interval_seconds(),
            tick_interval_seconds: default_tick_interval_seconds(),
        }
    }
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            tx_power: default_tx_power(),
            path_loss_n: default_path_loss_n(),
            threshold_m: default_threshold_m(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            capacity: default_snapshot_capacity(),
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

impl BeaconwardConfig {
    /// Parse configuration from TOML text. Missing keys take defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load configuration with precedence: env vars > config file > defaults.
    ///
    /// The result is validated before it is returned.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let eval = &mut self.evaluator;
        override_from(&lookup, "TTL_SECONDS", &mut eval.ttl_seconds)?;
        override_from(
            &lookup,
            "DEVICE_OFFLINE_SECONDS",
            &mut eval.device_offline_seconds,
        )?;
        override_from(
            &lookup,
            "STILL_INTERVAL_SECONDS",
            &mut eval.still_interval_seconds,
        )?;
        override_from(
            &lookup,
            "TICK_INTERVAL_SECONDS",
            &mut eval.tick_interval_seconds,
        )?;

        override_from(&lookup, "TX_POWER", &mut self.range.tx_power)?;
        override_from(&lookup, "PATH_LOSS_N", &mut self.range.path_loss_n)?;
        override_from(&lookup, "DISTANCE_THRESHOLD_M", &mut self.range.threshold_m)?;

        if let Some(path) = lookup("SQLITE_DB_PATH").filter(|p| !p.trim().is_empty()) {
            self.storage.path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Reject settings the evaluator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let eval = &self.evaluator;
        let durations = [
            ("evaluator.ttl_seconds", eval.ttl_seconds),
            ("evaluator.device_offline_seconds", eval.device_offline_seconds),
            ("evaluator.still_interval_seconds", eval.still_interval_seconds),
            ("evaluator.tick_interval_seconds", eval.tick_interval_seconds),
            ("snapshot.ttl_seconds", self.snapshot.ttl_seconds),
        ];
        if let Some((field, _)) = durations.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::ZeroDuration(*field));
        }
        if let Some((field, value)) = durations
            .iter()
            .find(|(_, secs)| *secs > MAX_DURATION_SECS)
        {
            return Err(ConfigError::OutOfRange {
                field: *field,
                reason: format!("{value} s exceeds the limit of {MAX_DURATION_SECS} s"),
            });
        }

        if !(self.range.path_loss_n.is_finite() && self.range.path_loss_n > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "range.path_loss_n",
                reason: format!("{} is not a positive number", self.range.path_loss_n),
            });
        }
        if !(self.range.threshold_m.is_finite() && self.range.threshold_m > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "range.threshold_m",
                reason: format!("{} is not a positive distance", self.range.threshold_m),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                field: "retry.max_attempts",
                reason: "at least one attempt is required".to_string(),
            });
        }
        if self.snapshot.capacity == 0 {
            return Err(ConfigError::OutOfRange {
                field: "snapshot.capacity",
                reason: "the cache must hold at least one entry".to_string(),
            });
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds::from_secs(
            secs(self.evaluator.ttl_seconds),
            secs(self.evaluator.device_offline_seconds),
            secs(self.evaluator.still_interval_seconds),
        )
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.evaluator.tick_interval_seconds)
    }

    pub fn range_model(&self) -> RangeModel {
        RangeModel {
            tx_power: self.range.tx_power,
            path_loss_n: self.range.path_loss_n,
            threshold_m: self.range.threshold_m,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            std::time::Duration::from_millis(self.retry.backoff_ms),
        )
    }

    pub fn snapshot_cache(&self) -> SnapshotCache {
        SnapshotCache::new(
            self.snapshot.capacity,
            chrono::Duration::seconds(secs(self.snapshot.ttl_seconds)),
        )
    }
}

/// Longest duration chrono can represent, in whole seconds.
const MAX_DURATION_SECS: u64 = i64::MAX as u64 / 1000;

fn secs(value: u64) -> i64 {
    // Clamped so settings built without `validate` still convert.
    i64::try_from(value.min(MAX_DURATION_SECS)).unwrap_or(i64::MAX / 1000)
}

fn override_from<F, T>(lookup: &F, var: &'static str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(var) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => return Err(ConfigError::InvalidEnv { var, value: raw }),
        }
    }
    Ok(())
}
