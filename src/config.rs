//! Configuration module for the geofix control channel.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.
//!
//! The listener itself only consumes a small key/value `Settings` object
//! (`listen_port`, `listen_ip`, `foreground_service`, `oom_adj`), the same
//! shape a preferences store would hand over.

use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

pub const LISTEN_PORT: &str = "listen_port";
pub const LISTEN_IP: &str = "listen_ip";
pub const FOREGROUND_SERVICE: &str = "foreground_service";
pub const OOM_ADJ: &str = "oom_adj";

/// Interface name meaning "every address on this host".
pub const ALL_INTERFACES: &str = "ALL";

/// Command-line arguments for the control channel
#[derive(Parser, Debug)]
#[command(name = "geofix")]
#[command(author = "geofix authors")]
#[command(version = "0.1.0")]
#[command(about = "Line-oriented TCP control channel for mock location fixes", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port to listen on (0-65535)
    #[arg(short = 'p', long)]
    pub port: Option<String>,

    /// Interface to listen on, or ALL for every address
    #[arg(short = 'i', long)]
    pub interface: Option<String>,

    /// Keep the process in foreground mode while the listener runs
    #[arg(long)]
    pub foreground_service: bool,

    /// Lower the process OOM score while the listener runs
    #[arg(long)]
    pub oom_adj: bool,

    /// Per-connection receive buffer size in bytes
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    /// Free-form key/value settings
    #[serde(default)]
    pub settings: BTreeMap<String, toml::Value>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Event loop tuning
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Per-connection receive buffer capacity
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Readiness events handled per poll
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_buffer_size() -> usize {
    2048 // fix and NMEA sentences stay well under 100 bytes
}

fn default_event_capacity() -> usize {
    128
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Key/value settings consumed by the lifecycle controller.
///
/// Values are kept as strings; typed accessors fall back to the caller's
/// default when a key is missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.values.get(key).map(String::as_str).unwrap_or(default)
    }

    /// Read a boolean; unparsable values are logged and replaced by `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key).map(|v| v.trim()) {
            None => default,
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
            Some(v) => {
                warn!(key, value = v, default, "Invalid boolean setting");
                default
            }
        }
    }

    fn from_toml(table: BTreeMap<String, toml::Value>) -> Self {
        let values = table
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    toml::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect();
        Self { values }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    pub runtime: RuntimeConfig,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, LoadError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> Result<Self, LoadError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| LoadError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents).map_err(|e| LoadError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let mut settings = Settings::from_toml(toml_config.settings);
        if let Some(port) = cli.port {
            settings.set(LISTEN_PORT, port);
        }
        if let Some(interface) = cli.interface {
            settings.set(LISTEN_IP, interface);
        }
        if cli.foreground_service {
            settings.set(FOREGROUND_SERVICE, "true");
        }
        if cli.oom_adj {
            settings.set(OOM_ADJ, "true");
        }

        let mut runtime = toml_config.runtime;
        if let Some(buffer_size) = cli.buffer_size {
            runtime.buffer_size = buffer_size;
        }
        if runtime.buffer_size == 0 {
            return Err(LoadError::Invalid("buffer_size must be greater than zero"));
        }
        if runtime.event_capacity == 0 {
            return Err(LoadError::Invalid("event_capacity must be greater than zero"));
        }

        Ok(Config {
            settings,
            runtime,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert!(config.settings.is_empty());
        assert_eq!(config.runtime.buffer_size, 2048);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [settings]
            listen_port = 6000
            listen_ip = "wlan0"
            foreground_service = true

            [runtime]
            buffer_size = 512

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        let settings = Settings::from_toml(config.settings);
        assert_eq!(settings.get_str(LISTEN_PORT, "5554"), "6000");
        assert_eq!(settings.get_str(LISTEN_IP, ALL_INTERFACES), "wlan0");
        assert!(settings.get_bool(FOREGROUND_SERVICE, false));
        assert!(!settings.get_bool(OOM_ADJ, false));
        assert_eq!(config.runtime.buffer_size, 512);
        assert_eq!(config.runtime.event_capacity, 128);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_settings_bool_fallback() {
        let settings = Settings::new().with(OOM_ADJ, "maybe");
        assert!(settings.get_bool(OOM_ADJ, true));
        assert!(!settings.get_bool(OOM_ADJ, false));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[settings]\nlisten_port = \"7000\"\nlisten_ip = \"eth0\"\n\n[logging]\nlevel = \"warn\""
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let cli = CliArgs::parse_from(["geofix", "--config", &path, "--port", "7100", "--oom-adj"]);
        let config = Config::from_args(cli).unwrap();

        assert_eq!(config.settings.get_str(LISTEN_PORT, "5554"), "7100");
        assert_eq!(config.settings.get_str(LISTEN_IP, ALL_INTERFACES), "eth0");
        assert!(config.settings.get_bool(OOM_ADJ, false));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs::parse_from(["geofix", "--config", "/nonexistent/geofix.toml"]);
        assert!(matches!(Config::from_args(cli), Err(LoadError::FileRead(..))));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let cli = CliArgs::parse_from(["geofix", "--buffer-size", "0"]);
        assert!(matches!(Config::from_args(cli), Err(LoadError::Invalid(_))));
    }
}
