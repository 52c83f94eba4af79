//! Process table and supervision settings

use figment::Figment;
use figment::providers::{Format, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use pvrbus_core::config::PvrbusConfig;
use pvrbus_core::retry::RetryConfig;

use crate::error::{Result, SupervisorError};

/// One entry of the static process table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Name used in logs and heartbeats
    pub name: String,

    /// Executable; the running binary when unset
    #[serde(default)]
    pub program: Option<PathBuf>,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Seconds without a heartbeat before the process is restarted;
    /// negative disables the watchdog
    #[serde(default = "disabled_watchdog")]
    pub watchdog_secs: f64,
}

fn disabled_watchdog() -> f64 {
    -1.0
}

impl ProcessSpec {
    /// Run `program` with `args`, watchdog disabled
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            name: name.into(),
            program: Some(program.into()),
            args: args.iter().map(|a| a.to_string()).collect(),
            watchdog_secs: disabled_watchdog(),
        }
    }

    /// Run a subcommand of the running binary, watchdog disabled
    pub fn daemon(subcommand: &str) -> Self {
        Self {
            name: subcommand.to_string(),
            program: None,
            args: vec![subcommand.to_string()],
            watchdog_secs: disabled_watchdog(),
        }
    }

    /// Set the watchdog timeout
    pub fn with_watchdog(mut self, timeout: Duration) -> Self {
        self.watchdog_secs = timeout.as_secs_f64();
        self
    }

    /// Watchdog timeout, `None` when disabled or not a valid duration
    pub fn watchdog(&self) -> Option<Duration> {
        if self.watchdog_secs < 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(self.watchdog_secs).ok()
    }
}

/// Daemons kept alive when no table is configured
pub fn default_table() -> Vec<ProcessSpec> {
    ["proxyd", "loggerd", "replayd", "timed"]
        .into_iter()
        .map(ProcessSpec::daemon)
        .collect()
}

/// Supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Pause between liveness checks
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,

    /// Time a child gets to exit after SIGTERM before it is killed
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,

    /// Children exiting sooner than this are restarted with backoff
    #[serde(with = "humantime_serde")]
    pub min_uptime: Duration,

    /// Restart delays for children that keep failing
    pub restart: RetryConfig,

    /// The process table
    pub processes: Vec<ProcessSpec>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
            min_uptime: Duration::from_secs(1),
            restart: RetryConfig::restart(),
            processes: default_table(),
        }
    }
}

impl SupervisorConfig {
    /// Load the `supervisor` section of the shared configuration
    pub fn load() -> Result<Self> {
        Self::from_figment(&PvrbusConfig::figment())
    }

    /// Load the `supervisor` section, with `path` layered over the usual sources
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_figment(&PvrbusConfig::figment().merge(Toml::file(path.as_ref())))
    }

    /// Extract the `supervisor` section from `figment`
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: SupervisorConfig = figment
            .focus("supervisor")
            .extract()
            .map_err(|e| SupervisorError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for spec in &self.processes {
            if spec.name.is_empty() {
                return Err(SupervisorError::Configuration(
                    "process name must not be empty".to_string(),
                ));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(SupervisorError::Configuration(format!(
                    "duplicate process name {}",
                    spec.name
                )));
            }
            if spec.watchdog_secs.is_nan()
                || (spec.watchdog_secs >= 0.0 && spec.watchdog().is_none())
            {
                return Err(SupervisorError::Configuration(format!(
                    "watchdog_secs of {} is not a valid timeout",
                    spec.name
                )));
            }
        }
        if self.check_interval.is_zero() {
            return Err(SupervisorError::Configuration(
                "check_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let names: Vec<_> = default_table().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["proxyd", "loggerd", "replayd", "timed"]);
        assert!(default_table().iter().all(|p| p.watchdog().is_none()));
    }

    #[test]
    fn test_section_overrides_table() {
        let figment = Figment::new().merge(Toml::string(
            r#"
            [supervisor]
            check_interval = "250ms"

            [[supervisor.processes]]
            name = "printd"
            args = ["printd"]
            watchdog_secs = 2.0
            "#,
        ));
        let config = SupervisorConfig::from_figment(&figment).unwrap();
        assert_eq!(config.check_interval, Duration::from_millis(250));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.processes.len(), 1);
        assert_eq!(config.processes[0].watchdog(), Some(Duration::from_secs(2)));
        assert_eq!(config.processes[0].program, None);
    }

    #[test]
    fn test_missing_section_uses_defaults() {
        let config = SupervisorConfig::from_figment(&Figment::new()).unwrap();
        assert_eq!(config.processes, default_table());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let config = SupervisorConfig {
            processes: vec![ProcessSpec::daemon("timed"), ProcessSpec::daemon("timed")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unrepresentable_watchdog_rejected() {
        for value in ["inf", "nan", "1e30"] {
            let figment = Figment::new().merge(Toml::string(&format!(
                r#"
                [[supervisor.processes]]
                name = "printd"
                watchdog_secs = {value}
                "#
            )));
            assert!(
                matches!(
                    SupervisorConfig::from_figment(&figment),
                    Err(SupervisorError::Configuration(_))
                ),
                "{value} accepted"
            );
        }

        let mut spec = ProcessSpec::daemon("printd");
        spec.watchdog_secs = f64::INFINITY;
        assert_eq!(spec.watchdog(), None);
        spec.watchdog_secs = f64::NEG_INFINITY;
        assert_eq!(spec.watchdog(), None);
    }
}
