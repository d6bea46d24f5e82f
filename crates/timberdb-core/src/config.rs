//! Configuration management.
//!
//! Supports a YAML/TOML config file, `TIMBERDB_`-prefixed environment
//! variable overrides, defaults, and validation. The engine on/off switch is
//! an explicit option here rather than an ambient environment gate.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Root configuration for a TimberDB engine instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimberConfig {
    /// Master switch; when `false` the engine rejects all operations.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub compression: CompressionConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub retention: RetentionConfig,
}

fn default_enabled() -> bool {
    true
}

impl Default for TimberConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            compression: CompressionConfig::default(),
            monitoring: MonitoringConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl TimberConfig {
    /// Load configuration with precedence:
    /// 1. Environment variables (highest)
    /// 2. Config file named by `TIMBERDB_CONFIG`
    /// 3. `./config/timberdb.{yaml,toml}`
    /// 4. Hardcoded defaults (lowest)
    ///
    /// Example override: `TIMBERDB_COMPRESSION__ALGORITHM=gzip`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a source fails to parse or validation
    /// rejects the merged result.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Ok(config_path) = std::env::var("TIMBERDB_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder
            .add_source(File::with_name("./config/timberdb").required(false))
            .add_source(
                Environment::with_prefix("TIMBERDB")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: TimberConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: TimberConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` naming the offending option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.max_inflight_appends == 0 {
            return Err(ConfigError::Message(
                "storage.max_inflight_appends must be > 0".to_string(),
            ));
        }

        self.compression.validate()?;

        let thresholds = &self.monitoring.alert_thresholds;
        if !(0.0..=1.0).contains(&thresholds.max_error_rate) {
            return Err(ConfigError::Message(
                "monitoring.alert_thresholds.max_error_rate must be within [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&thresholds.min_success_rate) {
            return Err(ConfigError::Message(
                "monitoring.alert_thresholds.min_success_rate must be within [0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}

/// Backing-store configuration for WAL records and catalog metadata.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding the WAL log and catalog snapshot.
    pub path: String,

    /// Logical namespace within the store; becomes the WAL file stem.
    pub namespace: String,

    /// fsync on every append (default: true). Disabling trades crash
    /// durability for throughput.
    pub sync_on_write: bool,

    /// Upper bound on concurrent appends before the store reports `Busy`.
    pub max_inflight_appends: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./timberdb".to_string(),
            namespace: "wal".to_string(),
            sync_on_write: true,
            max_inflight_appends: 64,
        }
    }
}

/// Materialization cache tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Soft cap on cached materialized states (entry count).
    pub max_entries: u64,

    /// TTL for cached query/materialization results.
    pub query_ttl_secs: u64,

    /// TTL for cached branch chain resolutions.
    pub branch_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            query_ttl_secs: 60,
            branch_ttl_secs: 300,
        }
    }
}

impl CacheConfig {
    /// Query-result TTL as a `Duration`.
    #[must_use]
    pub fn query_ttl(&self) -> Duration {
        Duration::from_secs(self.query_ttl_secs)
    }

    /// Branch-resolution TTL as a `Duration`.
    #[must_use]
    pub fn branch_ttl(&self) -> Duration {
        Duration::from_secs(self.branch_ttl_secs)
    }
}

/// Payload compression configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompressionConfig {
    /// One of `none`, `gzip`, `zstd`, `snappy`.
    pub algorithm: String,

    /// Payloads below this many bytes are stored uncompressed.
    pub min_size: usize,

    /// Algorithm-specific level (zstd: 1-21, gzip: 0-9; ignored by snappy).
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: "zstd".to_string(),
            min_size: 1024,
            level: 3,
        }
    }
}

impl CompressionConfig {
    /// Validate the algorithm name and level range.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` on an unknown algorithm or bad level.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.algorithm.as_str() {
            "none" | "snappy" => Ok(()),
            "gzip" => {
                if (0..=9).contains(&self.level) {
                    Ok(())
                } else {
                    Err(ConfigError::Message(format!(
                        "compression.level {} invalid for gzip (0-9)",
                        self.level
                    )))
                }
            }
            "zstd" => {
                if (1..=21).contains(&self.level) {
                    Ok(())
                } else {
                    Err(ConfigError::Message(format!(
                        "compression.level {} invalid for zstd (1-21)",
                        self.level
                    )))
                }
            }
            other => Err(ConfigError::Message(format!(
                "unknown compression.algorithm `{other}`"
            ))),
        }
    }
}

/// Health-probe cadence and alert thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Seconds between internal health probes.
    pub health_check_interval_secs: u64,

    #[serde(default)]
    pub alert_thresholds: AlertThresholds,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 30,
            alert_thresholds: AlertThresholds::default(),
        }
    }
}

impl MonitoringConfig {
    /// Probe cadence as a `Duration`.
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

/// Thresholds that flip the health report to degraded.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertThresholds {
    /// Maximum tolerated error fraction across operation classes.
    pub max_error_rate: f64,

    /// Maximum tolerated p99-equivalent latency in milliseconds.
    pub max_latency_ms: u64,

    /// Minimum tolerated success fraction.
    pub min_success_rate: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_error_rate: 0.05,
            max_latency_ms: 1_000,
            min_success_rate: 0.95,
        }
    }
}

/// Soft-delete retention policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Seconds between a branch's soft delete and GC eligibility.
    pub branch_retention_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            branch_retention_secs: 7 * 24 * 3600,
        }
    }
}

impl RetentionConfig {
    /// Retention window as a `Duration`.
    #[must_use]
    pub fn branch_retention(&self) -> Duration {
        Duration::from_secs(self.branch_retention_secs)
    }
}
