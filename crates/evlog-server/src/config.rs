//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Watermark monitor settings.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Long-poll endpoint settings.
    #[serde(default)]
    pub long_poll: LongPollConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Which database holds the logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbBackend {
    /// Embedded SQLite file; notifications are published in-process.
    #[default]
    Sqlite,
    /// External Postgres whose triggers publish notifications.
    Postgres,
}

impl std::str::FromStr for DbBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(ConfigError::InvalidValue {
                key: "database.backend",
                value: other.to_string(),
            }),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: DbBackend,

    /// Path to the SQLite database file (`sqlite` backend).
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Connection string (`postgres` backend).
    #[serde(default)]
    pub url: Option<String>,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Watermark monitor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Pause between attempts after a transient record fetch failure.
    #[serde(default = "default_fetch_retry_ms")]
    pub fetch_retry_ms: u64,

    /// Pause before reopening a notification subscription that failed to open.
    #[serde(default = "default_connect_retry_ms")]
    pub connect_retry_ms: u64,
}

impl MonitorConfig {
    /// Fetch retry delay as a `Duration`.
    pub fn fetch_retry(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_ms)
    }

    /// Connect retry delay as a `Duration`.
    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }
}

/// Long-poll configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LongPollConfig {
    /// Seconds a long-poll may wait before answering `204 No Content`.
    /// `0` waits until the threshold is reached.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl LongPollConfig {
    /// The configured timeout, or `None` for unbounded waits.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "evlog_monitor=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "evlog.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_fetch_retry_ms() -> u64 {
    100
}

fn default_connect_retry_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DbBackend::default(),
            path: default_db_path(),
            url: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            fetch_retry_ms: default_fetch_retry_ms(),
            connect_retry_ms: default_connect_retry_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A setting has a value outside its allowed set.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Dotted config key.
        key: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `EVLOG_HOST` overrides `server.host`
/// - `EVLOG_PORT` overrides `server.port`
/// - `EVLOG_DB_BACKEND` overrides `database.backend`
/// - `EVLOG_DB_PATH` overrides `database.path`
/// - `EVLOG_DATABASE_URL` overrides `database.url`
/// - `EVLOG_LONG_POLL_TIMEOUT_SECS` overrides `long_poll.timeout_secs`
/// - `EVLOG_LOG_LEVEL` overrides `logging.level`
/// - `EVLOG_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if `EVLOG_DB_BACKEND` names an unknown backend.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(config, |key| std::env::var(key).ok())
}

fn apply_overrides(
    mut config: Config,
    var: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    if let Some(host) = var("EVLOG_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("EVLOG_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(backend) = var("EVLOG_DB_BACKEND") {
        config.database.backend = backend.parse()?;
    }
    if let Some(db_path) = var("EVLOG_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(url) = var("EVLOG_DATABASE_URL") {
        config.database.url = Some(url);
    }
    if let Some(timeout) = var("EVLOG_LONG_POLL_TIMEOUT_SECS") {
        if let Ok(parsed) = timeout.parse() {
            config.long_poll.timeout_secs = parsed;
        }
    }
    if let Some(level) = var("EVLOG_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("EVLOG_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}
