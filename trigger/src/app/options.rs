//! Application configuration options
//!
//! Everything is read from the environment once at startup. Missing required
//! settings are collected and reported together so a misconfigured
//! deployment fails before it binds a socket.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::backup::command::{BackupCommand, DEFAULT_BACKUP_BIN};
use crate::backup::runner::NotifyFailurePolicy;
use crate::errors::ServiceError;
use crate::logs::{LogFormat, LogLevel};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Device identifier passed to the backup tool
    pub device_uuid: String,

    /// Backup destination directory
    pub backup_path: PathBuf,

    /// Backup executable
    pub backup_bin: PathBuf,

    /// Status API configuration
    pub hass: HassOptions,

    /// Where "already backed up today" is read from
    pub guard: GuardMode,

    /// Directory for run logs and the service log
    pub log_dir: PathBuf,

    /// Log level
    pub log_level: LogLevel,

    /// Stdout log format
    pub log_format: LogFormat,

    /// Kill the backup after this long
    pub backup_timeout: Option<Duration>,

    /// Caller-visible outcome when the status update fails
    pub notify_failure: NotifyFailurePolicy,

    /// Server configuration
    pub server: ServerOptions,

    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,
}

/// Home Assistant connection
#[derive(Debug, Clone)]
pub struct HassOptions {
    /// Base URL, e.g. `http://homeassistant.local:8123`
    pub base_url: String,

    /// Entity holding the last backup date
    pub entity_id: String,

    /// Long-lived access token
    pub api_key: SecretString,
}

/// Guard strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardMode {
    /// Query the status entity
    StatusApi,

    /// Read a marker file in the given state directory
    MarkerFile { state_dir: PathBuf },
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

const REQUIRED: [&str; 5] = [
    "DEVICE_UUID",
    "BACKUP_PATH",
    "HASS_BACKUP_ENTITY",
    "HASS_URL",
    "HASS_API_KEY",
];

impl AppOptions {
    /// Load options from the process environment
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load options through `lookup`; empty values count as missing
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let guard_mode = get("GUARD_MODE").unwrap_or_else(|| "api".to_string());
        let mut missing: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .filter(|&key| get(key).is_none())
            .collect();

        let guard = match guard_mode.to_lowercase().as_str() {
            "api" => GuardMode::StatusApi,
            "file" => match get("STATE_DIR") {
                Some(dir) => GuardMode::MarkerFile {
                    state_dir: PathBuf::from(dir),
                },
                None => {
                    missing.push("STATE_DIR");
                    GuardMode::MarkerFile {
                        state_dir: PathBuf::new(),
                    }
                }
            },
            other => {
                return Err(ServiceError::ConfigError(format!(
                    "Invalid GUARD_MODE \"{}\", expected \"api\" or \"file\"",
                    other
                )))
            }
        };

        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(|k| format!("\"{}\"", k)).collect();
            return Err(ServiceError::ConfigError(format!(
                "Missing setting (env var) for {}",
                names.join(", ")
            )));
        }

        let required = |key: &str| get(key).unwrap_or_default();

        let base_url = required("HASS_URL");
        Url::parse(&base_url)
            .map_err(|e| ServiceError::ConfigError(format!("Invalid HASS_URL \"{}\": {}", base_url, e)))?;

        let server = ServerOptions {
            host: get("HOST").unwrap_or_else(|| ServerOptions::default().host),
            port: parse_or("PORT", get("PORT"), ServerOptions::default().port)?,
        };

        let backup_timeout = match get("BACKUP_TIMEOUT_SECS") {
            Some(value) => Some(Duration::from_secs(parse("BACKUP_TIMEOUT_SECS", &value)?)),
            None => None,
        };

        Ok(Self {
            device_uuid: required("DEVICE_UUID"),
            backup_path: PathBuf::from(required("BACKUP_PATH")),
            backup_bin: PathBuf::from(
                get("BACKUP_BIN_PATH").unwrap_or_else(|| DEFAULT_BACKUP_BIN.to_string()),
            ),
            hass: HassOptions {
                base_url,
                entity_id: required("HASS_BACKUP_ENTITY"),
                api_key: SecretString::from(required("HASS_API_KEY")),
            },
            guard,
            log_dir: PathBuf::from(get("LOG_PATH").unwrap_or_else(|| ".".to_string())),
            log_level: parse_or("LOG_LEVEL", get("LOG_LEVEL"), LogLevel::Info)?,
            log_format: parse_or("LOG_FORMAT", get("LOG_FORMAT"), LogFormat::Text)?,
            backup_timeout,
            notify_failure: parse_or(
                "NOTIFY_FAILURE_POLICY",
                get("NOTIFY_FAILURE_POLICY"),
                NotifyFailurePolicy::Ignore,
            )?,
            server,
            lifecycle: LifecycleOptions::default(),
        })
    }

    /// The fixed backup command line
    pub fn backup_command(&self) -> BackupCommand {
        BackupCommand::new(&self.backup_bin, &self.backup_path, &self.device_uuid)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ServiceError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ServiceError::ConfigError(format!("Invalid {} \"{}\": {}", key, value, e)))
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T, ServiceError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(value) => parse(key, &value),
        None => Ok(default),
    }
}
