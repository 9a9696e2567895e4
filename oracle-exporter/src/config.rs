//! Configuration for the Oracle exporter.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::http::check_metrics_path;
use crate::metric::is_valid_metric_name;
use crate::probe::ProbeSpec;
use crate::probes::{ARCHIVELOG, BUILTIN_PROBES, RESOURCE_LIMIT, SESSIONS, TABLESPACES};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// HTTP endpoint settings.
    #[serde(default)]
    pub web: WebConfig,

    /// Database connection limits. Credentials come from the environment.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Metric naming.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Built-in probe toggles.
    #[serde(default)]
    pub collect: CollectConfig,

    /// Scrape outcome policy.
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// Additional probes described in the config file.
    #[serde(default)]
    pub custom_probes: Vec<ProbeSpec>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Address to listen on (default: "0.0.0.0:9167").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:9167".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// Database timeouts. Zero disables a timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_query_timeout() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.connect_timeout_secs)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.query_timeout_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Metric naming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prefix of every metric name (default: "oracle").
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "oracle".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
        }
    }
}

/// Which built-in probes run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectConfig {
    #[serde(default = "enabled")]
    pub sessions: bool,

    #[serde(default = "enabled")]
    pub tablespaces: bool,

    #[serde(default)]
    pub archivelog: bool,

    #[serde(default)]
    pub resource_limit: bool,
}

fn enabled() -> bool {
    true
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            sessions: true,
            tablespaces: true,
            archivelog: false,
            resource_limit: false,
        }
    }
}

impl CollectConfig {
    /// Whether the named built-in probe is enabled. Unknown names are not.
    pub fn is_enabled(&self, probe: &str) -> bool {
        match probe {
            SESSIONS => self.sessions,
            TABLESPACES => self.tablespaces,
            ARCHIVELOG => self.archivelog,
            RESOURCE_LIMIT => self.resource_limit,
            _ => false,
        }
    }
}

/// Scrape outcome policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Count a scrape as failed when any probe fails (default: true).
    /// When false, a scrape succeeds whenever the database is up.
    #[serde(default = "enabled")]
    pub fail_on_probe_error: bool,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            fail_on_probe_error: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.web.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.web.listen
            )));
        }

        check_metrics_path(&self.web.path).map_err(ConfigError::Validation)?;

        if !is_valid_metric_name(&self.metrics.namespace) {
            return Err(ConfigError::Validation(format!(
                "Invalid metric namespace: {:?}",
                self.metrics.namespace
            )));
        }

        let mut names: HashSet<&str> = BUILTIN_PROBES.into_iter().collect();
        for probe in &self.custom_probes {
            probe.validate().map_err(ConfigError::Validation)?;
            if !names.insert(probe.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate probe name: {}",
                    probe.name
                )));
            }
        }

        Ok(())
    }
}
