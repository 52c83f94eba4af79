//! Configuration types for the bus substrate

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PvrbusError, Result};
use crate::retry::RetryConfig;

/// Default configuration file, looked up in the working directory
pub const CONFIG_FILE: &str = "pvrbus.toml";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PvrbusConfig {
    /// Bus addressing
    #[serde(default)]
    pub bus: BusConfig,

    /// Recorder settings
    #[serde(default)]
    pub logger: LoggerConfig,

    /// Replayer settings
    #[serde(default)]
    pub replay: ReplayConfig,
}

/// Bus socket addressing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Host the proxy runs on
    pub host: String,

    /// Request/reply port (used by the simulation server)
    pub rep_port: u16,

    /// Port publishers connect to
    pub pub_port: u16,

    /// Port subscribers connect to
    pub sub_port: u16,

    /// Per-socket queue depth; messages beyond it are dropped
    pub high_water_mark: usize,

    /// Backoff while the proxy is unreachable
    pub connect_retry: RetryConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            rep_port: 40100,
            pub_port: 40101,
            sub_port: 40102,
            high_water_mark: 10_000,
            connect_retry: RetryConfig::default(),
        }
    }
}

impl BusConfig {
    /// Address publishers connect to
    pub fn pub_addr(&self) -> String {
        format!("{}:{}", self.host, self.pub_port)
    }

    /// Address subscribers connect to
    pub fn sub_addr(&self) -> String {
        format!("{}:{}", self.host, self.sub_port)
    }

    /// Override the three ports, as passed on a daemon's command line
    pub fn with_ports(mut self, rep_port: u16, pub_port: u16, sub_port: u16) -> Self {
        self.rep_port = rep_port;
        self.pub_port = pub_port;
        self.sub_port = sub_port;
        self
    }
}

/// Recorder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Directory holding one folder per session
    pub log_root: PathBuf,

    /// Entries per shard before rotating
    pub max_entries: u64,

    /// Bytes per shard before rotating
    pub max_bytes: u64,

    /// Index of the first shard in a session
    pub start_shard: u64,

    /// Shard file extension
    pub extension: String,

    /// Non-blocking receives per drain cycle
    pub drain_batch: usize,

    /// Pause between drain cycles
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Interval between status messages
    #[serde(with = "humantime_serde")]
    pub status_interval: Duration,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_root: PathBuf::from("pvrlogs"),
            max_entries: 1_000_000_000_000_000,
            max_bytes: 1_000_000,
            start_shard: 0,
            extension: "pvrlog".to_string(),
            drain_batch: 1000,
            poll_interval: Duration::from_millis(1),
            status_interval: Duration::from_secs(1),
        }
    }
}

/// Replayer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Directory holding one folder per session
    pub log_root: PathBuf,

    /// Shard file extension
    pub extension: String,

    /// Topic prefixes never re-emitted
    pub excluded_prefixes: Vec<String>,

    /// Interval between status messages
    #[serde(with = "humantime_serde")]
    pub status_interval: Duration,

    /// Non-blocking receives per command drain
    pub drain_batch: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            log_root: PathBuf::from("pvrlogs"),
            extension: "pvrlog".to_string(),
            excluded_prefixes: crate::topics::DEFAULT_REPLAY_EXCLUDED
                .iter()
                .map(|p| p.to_string())
                .collect(),
            status_interval: Duration::from_secs(1),
            drain_batch: 1000,
        }
    }
}

impl PvrbusConfig {
    /// Layered configuration source.
    ///
    /// Layers, lowest priority first:
    /// 1. Defaults
    /// 2. `pvrbus.toml` in the working directory
    /// 3. The file named by `PVRBUS_CONFIG_PATH`
    /// 4. `PVRBUS_*` environment variables (`__` separates nesting levels)
    ///
    /// Other crates extract their own sections from the same figment.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(PvrbusConfig::default()))
            .merge(Toml::file(CONFIG_FILE));

        if let Ok(path) = std::env::var("PVRBUS_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed("PVRBUS_").split("__"))
    }

    /// Load configuration from file and environment variables.
    ///
    /// The legacy `LOG_DIR` variable overrides both log roots.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(PvrbusConfig::default()))
            .merge(Toml::file(path.as_ref()));
        Self::from_figment(figment)
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: PvrbusConfig = figment.extract().map_err(|e| {
            PvrbusError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        if let Ok(log_dir) = std::env::var("LOG_DIR") {
            config.logger.log_root = PathBuf::from(&log_dir);
            config.replay.log_root = PathBuf::from(log_dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.bus.high_water_mark == 0 {
            return Err(PvrbusError::Configuration(
                "bus.high_water_mark must be at least 1".to_string(),
            ));
        }
        if self.logger.max_entries == 0 || self.logger.max_bytes == 0 {
            return Err(PvrbusError::Configuration(
                "logger shard limits must be positive".to_string(),
            ));
        }
        if self.logger.extension.is_empty() || self.replay.extension.is_empty() {
            return Err(PvrbusError::Configuration(
                "shard extension must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_daemon_ports() {
        let config = PvrbusConfig::default();
        assert_eq!(config.bus.rep_port, 40100);
        assert_eq!(config.bus.pub_port, 40101);
        assert_eq!(config.bus.sub_port, 40102);
        assert_eq!(config.bus.pub_addr(), "localhost:40101");
        assert_eq!(config.replay.excluded_prefixes, vec!["/loggerd/", "/replayd/"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_overrides_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[bus]
pub_port = 5001
high_water_mark = 16

[logger]
max_bytes = 2048
status_interval = "250ms"
"#
        )
        .unwrap();

        let config = PvrbusConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bus.pub_port, 5001);
        assert_eq!(config.bus.sub_port, 40102);
        assert_eq!(config.bus.high_water_mark, 16);
        assert_eq!(config.logger.max_bytes, 2048);
        assert_eq!(config.logger.status_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_high_water_mark_rejected() {
        let mut config = PvrbusConfig::default();
        config.bus.high_water_mark = 0;
        assert!(matches!(
            config.validate(),
            Err(PvrbusError::Configuration(_))
        ));
    }
}
