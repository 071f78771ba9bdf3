/// Configuration for the OpeniTools control context.
///
/// Loaded from an optional TOML file; every section and field has a
/// default, so an empty or missing file is a valid configuration. The
/// binary applies CLI overrides on top and calls [`AppConfig::validate`]
/// before anything starts.
use anyhow::{Context, Result};
use openitools_core::native::InfoKind;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("monitor.poll_interval_ms must be between 50 and 60000, got {0}")]
    InvalidPollInterval(u64),

    #[error("control.max_messages_per_tick must be at least 1, got {0}")]
    InvalidMessageBudget(usize),

    #[error("workers.threads must be between 2 and 16, got {0}")]
    InvalidWorkerThreads(usize),

    #[error("info.kinds must name at least one kind")]
    NoInfoKinds,

    #[error("logging.level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub control: ControlConfig,
    pub workers: WorkerConfig,
    pub info: InfoConfig,
    pub logging: LoggingConfig,
}

/// Connection event polling.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
}

/// Control-context message draining.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// Upper bound on messages applied per tick, so a backlog cannot
    /// starve the caller's own loop.
    pub max_messages_per_tick: usize,
}

/// Background worker pool for info fetches, listings and downloads.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub threads: usize,
}

/// Which metadata endpoints a refresh queries.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct InfoConfig {
    pub kinds: Vec<InfoKind>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error.
    pub level: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_messages_per_tick: 256,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get().clamp(2, 4),
        }
    }
}

impl Default for InfoConfig {
    fn default() -> Self {
        Self {
            kinds: vec![InfoKind::Device],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {e}"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let poll = self.monitor.poll_interval_ms;
        if !(50..=60_000).contains(&poll) {
            return Err(ConfigError::InvalidPollInterval(poll));
        }

        if self.control.max_messages_per_tick == 0 {
            return Err(ConfigError::InvalidMessageBudget(0));
        }

        let threads = self.workers.threads;
        if !(2..=16).contains(&threads) {
            return Err(ConfigError::InvalidWorkerThreads(threads));
        }

        if self.info.kinds.is_empty() {
            return Err(ConfigError::NoInfoKinds);
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.poll_interval_ms)
    }

    /// The configured level, falling back to `INFO` if unparseable.
    pub fn log_level(&self) -> tracing::Level {
        self.logging
            .level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert_eq!(config.monitor.poll_interval_ms, 1_000);
        assert_eq!(config.control.max_messages_per_tick, 256);
        assert!((2..=4).contains(&config.workers.threads));
        assert_eq!(config.info.kinds, vec![InfoKind::Device]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [monitor]
            poll_interval_ms = 250

            [info]
            kinds = ["device", "battery"]
            "#,
        )
        .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.info.kinds, vec![InfoKind::Device, InfoKind::Battery]);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn unknown_info_kind_is_rejected() {
        assert!(AppConfig::from_toml("[info]\nkinds = [\"radio\"]").is_err());
    }

    #[test]
    fn out_of_range_values_fail_validation() {
        let mut config = AppConfig::default();
        config.monitor.poll_interval_ms = 10;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPollInterval(10)));

        let mut config = AppConfig::default();
        config.workers.threads = 1;
        assert_eq!(config.validate(), Err(ConfigError::InvalidWorkerThreads(1)));

        let mut config = AppConfig::default();
        config.control.max_messages_per_tick = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMessageBudget(0)));

        let mut config = AppConfig::default();
        config.info.kinds.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoInfoKinds));

        let mut config = AppConfig::default();
        config.logging.level = "loud".into();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("loud".into()))
        );
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        let mut config = AppConfig::default();
        config.logging.level = "DEBUG".into();
        assert_eq!(config.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = AppConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn file_on_disk_is_parsed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("openitools.toml");
        std::fs::write(&path, "[workers]\nthreads = 8\n").unwrap();
        assert_eq!(AppConfig::load(&path).unwrap().workers.threads, 8);
    }
}
