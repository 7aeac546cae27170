//! # Configuration Management Module
//!
//! Tool-side configuration: how to reach the tracker, how long to wait for it,
//! where the local settings cache lives and how logging is set up. This is not
//! the tracker's own settings document (see [`crate::settings`]).
//!
//! ## Configuration Structure
//!
//! - [`DeviceConfig`] - serial port and HTTP endpoint
//! - [`SyncConfig`] - reply deadline and post-write status polling
//! - [`CacheConfig`] - local cache directory and write debounce
//! - [`SchemaConfig`] - beacon count policy
//! - [`PacketsConfig`] - received packet monitor
//! - [`LoggingConfig`] - log level and optional file sink
//!
//! ## Usage
//!
//! ```rust,no_run
//! use trackerconf::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("trackerconf.toml").await?;
//!     let config = Config::load("trackerconf.toml").await?;
//!     println!("Serial port: {}", config.device.port);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [device]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! url = "http://192.168.4.1"
//! write_path = "/"
//!
//! [sync]
//! reply_timeout_ms = 5000
//! status_initial_delay_ms = 2000
//! status_attempt_timeout_ms = 2000
//! status_max_attempts = 30
//! status_backoff_ms = 250
//! status_backoff_max_ms = 2000
//!
//! [cache]
//! dir = "./cache"
//! debounce_ms = 1000
//!
//! [schema]
//! min_beacons = 1
//! max_beacons = 3
//!
//! [packets]
//! poll_interval_secs = 15
//!
//! [logging]
//! level = "info"
//! file = "trackerconf.log"
//! ```
//!
//! Every section except `[device]` may be omitted and falls back to defaults.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::settings::schema::{Schema, DEFAULT_MAX_BEACONS, DEFAULT_MIN_BEACONS};
use crate::sync::SyncOptions;

pub const DEFAULT_CONFIG_PATH: &str = "trackerconf.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub packets: PacketsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    pub url: String,
    /// Path the admin form is posted to.
    #[serde(default = "default_write_path")]
    pub write_path: String,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_write_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub reply_timeout_ms: u64,
    pub status_initial_delay_ms: u64,
    pub status_attempt_timeout_ms: u64,
    pub status_max_attempts: u32,
    pub status_backoff_ms: u64,
    pub status_backoff_max_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 5000,
            status_initial_delay_ms: 2000,
            status_attempt_timeout_ms: 2000,
            status_max_attempts: 30,
            status_backoff_ms: 250,
            status_backoff_max_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: String,
    /// Quiet period before an edit is written to the cache.
    pub debounce_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: "./cache".to_string(),
            debounce_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Set to 0 to accept a settings document without beacons.
    pub min_beacons: usize,
    pub max_beacons: usize,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            min_beacons: DEFAULT_MIN_BEACONS,
            max_beacons: DEFAULT_MAX_BEACONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketsConfig {
    pub poll_interval_secs: u64,
}

impl Default for PacketsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub async fn load_or_default(path: &str) -> Result<Self> {
        match fs::metadata(path).await {
            Ok(_) => Self::load(path).await,
            Err(_) => Ok(Config::default()),
        }
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema.max_beacons == 0 {
            return Err(anyhow!("schema.max_beacons must be at least 1"));
        }
        if self.schema.min_beacons > self.schema.max_beacons {
            return Err(anyhow!(
                "schema.min_beacons ({}) exceeds schema.max_beacons ({})",
                self.schema.min_beacons,
                self.schema.max_beacons
            ));
        }
        if self.sync.status_max_attempts == 0 {
            return Err(anyhow!("sync.status_max_attempts must be at least 1"));
        }
        if self.sync.reply_timeout_ms == 0 {
            return Err(anyhow!("sync.reply_timeout_ms must be greater than 0"));
        }
        if self.packets.poll_interval_secs == 0 {
            return Err(anyhow!("packets.poll_interval_secs must be greater than 0"));
        }
        Ok(())
    }

    pub fn schema(&self) -> Schema {
        Schema {
            min_beacons: self.schema.min_beacons,
            max_beacons: self.schema.max_beacons,
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        let s = &self.sync;
        SyncOptions {
            reply_timeout: Duration::from_millis(s.reply_timeout_ms),
            status_initial_delay: Duration::from_millis(s.status_initial_delay_ms),
            status_attempt_timeout: Duration::from_millis(s.status_attempt_timeout_ms),
            status_max_attempts: s.status_max_attempts,
            status_backoff: Duration::from_millis(s.status_backoff_ms),
            status_backoff_max: Duration::from_millis(s.status_backoff_max_ms),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.cache.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.packets.poll_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device: DeviceConfig {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: default_baud_rate(),
                url: "http://192.168.4.1".to_string(),
                write_path: default_write_path(),
            },
            sync: SyncConfig::default(),
            cache: CacheConfig::default(),
            schema: SchemaConfig::default(),
            packets: PacketsConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("trackerconf.log".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync_options(), SyncOptions::default());
        assert_eq!(config.schema(), Schema::default());
    }

    #[test]
    fn test_minimal_file_fills_sections() {
        let config: Config = toml::from_str(
            r#"
            [device]
            port = "COM3"
            url = "http://10.0.0.7"
            "#,
        )
        .unwrap();
        assert_eq!(config.device.baud_rate, 115_200);
        assert_eq!(config.device.write_path, "/");
        assert_eq!(config.cache.debounce_ms, 1000);
        assert_eq!(config.schema.min_beacons, 1);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_section_keeps_other_fields() {
        let config: Config = toml::from_str(
            r#"
            [device]
            port = "/dev/ttyACM0"
            url = "http://192.168.4.1"

            [schema]
            min_beacons = 0

            [sync]
            status_max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.schema().min_beacons, 0);
        assert_eq!(config.schema().max_beacons, 3);
        let opts = config.sync_options();
        assert_eq!(opts.status_max_attempts, 5);
        assert_eq!(opts.reply_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_rejects_nonsense() {
        let mut config = Config::default();
        config.schema.max_beacons = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.schema.min_beacons = 4;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.status_max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_create_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trackerconf.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.device.port, "/dev/ttyUSB0");
        assert_eq!(loaded.logging.file.as_deref(), Some("trackerconf.log"));
    }

    #[tokio::test]
    async fn test_missing_file_falls_back() {
        let config = Config::load_or_default("/definitely/not/here.toml")
            .await
            .unwrap();
        assert_eq!(config.device.url, "http://192.168.4.1");
    }
}
