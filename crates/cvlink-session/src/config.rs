//! TOML-based configuration for the session crate.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\CVLink\config.toml`
//! - Linux:    `~/.config/cvlink/config.toml`
//! - macOS:    `~/Library/Application Support/CVLink/config.toml`
//!
//! Fields annotated with `#[serde(default = "some_fn")]` fall back to the
//! return value of `some_fn()` when absent from the file, so the
//! application works on first run (before a config file exists) and when
//! upgrading from an older file that is missing newer fields.
//!
//! Example:
//!
//! ```toml
//! [connection]
//! command_station_host = "192.168.0.200"
//! command_station_port = 5550
//! feedback_host = "192.168.0.200"
//! feedback_port = 5551
//!
//! [session]
//! verify_timeout_ms = 1500
//! status_poll_interval_ms = 2000
//! log_level = "info"
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::driver::SessionOptions;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A host/port pair does not form a valid socket address.
    #[error("invalid {which} address {host}:{port}")]
    BadAddress {
        which: &'static str,
        host: String,
        port: u16,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Addresses of the two TCP endpoints the session connects to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// IP address of the command-station LAN gateway (programming channel).
    #[serde(default = "default_host")]
    pub command_station_host: String,
    /// TCP port of the command-station gateway.
    #[serde(default = "default_command_station_port")]
    pub command_station_port: u16,
    /// IP address of the RS-bus feedback receiver (status channel).
    #[serde(default = "default_host")]
    pub feedback_host: String,
    /// TCP port of the feedback receiver.
    #[serde(default = "default_feedback_port")]
    pub feedback_port: u16,
}

/// Session behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Bounded wait for a verify reply, in milliseconds.
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,
    /// Interval between idle command-station status polls, in
    /// milliseconds.
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`,
    /// `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host() -> String {
    "192.168.0.200".to_string()
}
fn default_command_station_port() -> u16 {
    5550
}
fn default_feedback_port() -> u16 {
    5551
}
fn default_verify_timeout_ms() -> u64 {
    1500
}
fn default_status_poll_interval_ms() -> u64 {
    2000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            command_station_host: default_host(),
            command_station_port: default_command_station_port(),
            feedback_host: default_host(),
            feedback_port: default_feedback_port(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verify_timeout_ms: default_verify_timeout_ms(),
            status_poll_interval_ms: default_status_poll_interval_ms(),
            log_level: default_log_level(),
        }
    }
}

impl ConnectionConfig {
    /// Resolves the programming-channel socket address.
    ///
    /// # Errors
    ///
    /// [`ConfigError::BadAddress`] when the host does not parse.
    pub fn command_station_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr(
            "command station",
            &self.command_station_host,
            self.command_station_port,
        )
    }

    /// Resolves the status/feedback-channel socket address.
    ///
    /// # Errors
    ///
    /// [`ConfigError::BadAddress`] when the host does not parse.
    pub fn feedback_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("feedback", &self.feedback_host, self.feedback_port)
    }
}

impl SessionConfig {
    /// Converts the file representation into driver options.
    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            verify_timeout: Duration::from_millis(self.verify_timeout_ms),
            status_poll_interval: Duration::from_millis(self.status_poll_interval_ms),
        }
    }
}

fn parse_addr(which: &'static str, host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    format!("{host}:{port}")
        .parse()
        .map_err(|_| ConfigError::BadAddress {
            which,
            host: host.to_string(),
            port,
        })
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config
/// base directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory
/// cannot be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from disk, returning `AppConfig::default()` if the
/// file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = config_file_path()?;

    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to disk, creating the config directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory including the app folder.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("CVLink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("cvlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("CVLink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
