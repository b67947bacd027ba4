//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/heartbeat/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/heartbeat/` (~/.config/heartbeat/)
//! - Data: `$XDG_DATA_HOME/heartbeat/` (~/.local/share/heartbeat/)
//! - State/Logs: `$XDG_STATE_HOME/heartbeat/` (~/.local/state/heartbeat/)

use crate::error::{Error, Result};
use crate::types::UserSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Logging/recall backend configuration (optional)
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Session and capture settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Defaults for the persisted user settings
    #[serde(default)]
    pub user: UserSettings,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Logging/recall backend configuration
///
/// When enabled, every committed exchange is forwarded to the daily-log
/// endpoint and RECALL directives are answered by the recall endpoint.
/// Delivery is best-effort: nothing is retried.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    /// Enable/disable the backend integration
    #[serde(default)]
    pub enabled: bool,

    /// Backend base URL (e.g., `http://localhost:3001`)
    pub server_url: Option<String>,

    /// Path of the daily logging endpoint
    #[serde(default = "default_daily_log_path")]
    pub daily_log_path: String,

    /// Path of the recall endpoint
    #[serde(default = "default_recall_path")]
    pub recall_path: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_collector_timeout")]
    pub timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: None,
            daily_log_path: default_daily_log_path(),
            recall_path: default_recall_path(),
            timeout_secs: default_collector_timeout(),
        }
    }
}

impl CollectorConfig {
    /// Check if the backend is properly configured and enabled
    pub fn is_ready(&self) -> bool {
        self.enabled && self.server_url.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        match &self.server_url {
            None => Err(Error::Config(
                "collector.server_url is required when collector is enabled".to_string(),
            )),
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => Err(
                Error::Config(format!("collector.server_url must be an http(s) URL: {}", url)),
            ),
            Some(_) if self.timeout_secs == 0 => Err(Error::Config(
                "collector.timeout_secs must be greater than 0".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }
}

fn default_daily_log_path() -> String {
    "/eddie/dailyLogger".to_string()
}

fn default_recall_path() -> String {
    "/eddie/stacker/simple-recall".to_string()
}

fn default_collector_timeout() -> u64 {
    30
}

/// Session and capture settings
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Maximum number of exchanges kept in a session's rolling window
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,

    /// Number of exchanges held back before they graduate into the window
    #[serde(default = "default_processing_buffer")]
    pub processing_buffer: usize,

    /// Version stamped into capture metadata
    #[serde(default = "default_extension_version")]
    pub extension_version: String,

    /// Browser name stamped into capture metadata
    #[serde(default = "default_browser_name")]
    pub browser_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rolling_window: default_rolling_window(),
            processing_buffer: default_processing_buffer(),
            extension_version: default_extension_version(),
            browser_name: default_browser_name(),
        }
    }
}

fn default_rolling_window() -> usize {
    3
}

fn default_processing_buffer() -> usize {
    1
}

fn default_extension_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_browser_name() -> String {
    "Unknown".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.collector.validate()?;
        if config.session.rolling_window == 0 || config.session.processing_buffer == 0 {
            return Err(Error::Config(
                "session.rolling_window and session.processing_buffer must be at least 1"
                    .to_string(),
            ));
        }

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/heartbeat/config.toml` (~/.config/heartbeat/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("heartbeat").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/heartbeat/` (~/.local/share/heartbeat/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("heartbeat")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/heartbeat/` (~/.local/state/heartbeat/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("heartbeat")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/heartbeat/heartbeat.db` (~/.local/share/heartbeat/heartbeat.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("heartbeat.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.session.rolling_window, 3);
        assert_eq!(config.session.processing_buffer, 1);
        assert_eq!(config.user.nickname, "User");
        assert!(!config.collector.is_ready());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[logging]
level = "debug"

[session]
rolling_window = 5
browser_name = "Chrome"

[user]
preferred_time_zone = "Europe/Berlin"
nickname = "Ada"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.session.rolling_window, 5);
        assert_eq!(config.session.processing_buffer, 1);
        assert_eq!(config.session.browser_name, "Chrome");
        assert_eq!(config.user.preferred_time_zone, "Europe/Berlin");
        assert_eq!(config.user.nickname, "Ada");
    }

    #[test]
    fn test_collector_config_defaults() {
        let config = CollectorConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.daily_log_path, "/eddie/dailyLogger");
        assert_eq!(config.recall_path, "/eddie/stacker/simple-recall");
        assert_eq!(config.timeout_secs, 30);
        assert!(!config.is_ready());
    }

    #[test]
    fn test_collector_config_validation() {
        // Disabled config is always valid
        let config = CollectorConfig::default();
        assert!(config.validate().is_ok());

        // Enabled without a server should fail
        let config = CollectorConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            enabled: true,
            server_url: Some("localhost:3001".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            enabled: true,
            server_url: Some("http://localhost:3001".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.is_ready());
    }

    #[test]
    fn test_load_from_rejects_empty_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session]\nrolling_window = 0\n").unwrap();

        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_paths_are_namespaced() {
        assert!(Config::config_path().ends_with("heartbeat/config.toml"));
        assert!(Config::database_path().ends_with("heartbeat/heartbeat.db"));
        assert!(Config::state_dir().ends_with("heartbeat"));
    }
}
