//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/pulsewise/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/pulsewise/` (~/.config/pulsewise/)
//! - Data: `$XDG_DATA_HOME/pulsewise/` (~/.local/share/pulsewise/)
//! - State/Logs: `$XDG_STATE_HOME/pulsewise/` (~/.local/state/pulsewise/)

use crate::error::{Error, Result};
use crate::types::Cadence;
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

    /// Scheduling defaults for new agent instances
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Risk and sentiment thresholds used by the summarizer
    #[serde(default)]
    pub risk: RiskConfig,

    /// Dashboard aggregation settings
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Store tuning
    #[serde(default)]
    pub store: StoreConfig,
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

/// Defaults applied when an instance is created without explicit schedule fields.
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// IANA timezone name, e.g. "Europe/Berlin"
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Cadence used by the CLI when `--cadence` is omitted
    #[serde(default = "default_cadence")]
    pub default_cadence: Cadence,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            default_cadence: default_cadence(),
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_cadence() -> Cadence {
    Cadence::Weekly
}

/// Thresholds for the lexical sentiment and risk heuristics.
#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    /// Sentiment score below which an escalation-enabled template escalates
    #[serde(default = "default_negative_threshold")]
    pub negative_threshold: f64,

    /// Half-width of the neutral band around zero
    #[serde(default = "default_sentiment_band")]
    pub sentiment_band: f64,

    /// Additional distress phrases, matched case-insensitively
    #[serde(default)]
    pub extra_distress_terms: Vec<String>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            negative_threshold: default_negative_threshold(),
            sentiment_band: default_sentiment_band(),
            extra_distress_terms: vec![],
        }
    }
}

fn default_negative_threshold() -> f64 {
    -0.5
}

fn default_sentiment_band() -> f64 {
    0.2
}

/// Dashboard aggregation configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// Number of tags reported in `top_tags`
    #[serde(default = "default_top_tags")]
    pub top_tags: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            top_tags: default_top_tags(),
        }
    }
}

fn default_top_tags() -> usize {
    5
}

/// SQLite store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// How long a writer waits on a locked database before failing
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Default page size for message pagination
    #[serde(default = "default_page_size")]
    pub message_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout(),
            message_page_size: default_page_size(),
        }
    }
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_page_size() -> usize {
    50
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

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self
            .scheduler
            .default_timezone
            .parse::<chrono_tz::Tz>()
            .is_err()
        {
            return Err(Error::Config(format!(
                "scheduler.default_timezone is not a known timezone: {}",
                self.scheduler.default_timezone
            )));
        }
        if !(-1.0..=0.0).contains(&self.risk.negative_threshold) {
            return Err(Error::Config(
                "risk.negative_threshold must be between -1.0 and 0.0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.risk.sentiment_band) {
            return Err(Error::Config(
                "risk.sentiment_band must be in [0.0, 1.0)".to_string(),
            ));
        }
        if self
            .risk
            .extra_distress_terms
            .iter()
            .any(|term| term.trim().is_empty())
        {
            return Err(Error::Config(
                "risk.extra_distress_terms must not contain blank entries".to_string(),
            ));
        }
        if self.store.message_page_size == 0 {
            return Err(Error::Config(
                "store.message_page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/pulsewise/config.toml` (~/.config/pulsewise/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("pulsewise").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("pulsewise")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("pulsewise")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/pulsewise/data.db` (~/.local/share/pulsewise/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scheduler.default_timezone, "UTC");
        assert_eq!(config.scheduler.default_cadence, Cadence::Weekly);
        assert_eq!(config.risk.negative_threshold, -0.5);
        assert_eq!(config.analytics.top_tags, 5);
        assert_eq!(config.store.busy_timeout_ms, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[logging]
level = "debug"

[scheduler]
default_timezone = "America/New_York"
default_cadence = "biweekly"

[risk]
negative_threshold = -0.4
extra_distress_terms = ["quit tomorrow"]

[analytics]
top_tags = 3
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.scheduler.default_timezone, "America/New_York");
        assert_eq!(config.scheduler.default_cadence, Cadence::Biweekly);
        assert_eq!(config.risk.negative_threshold, -0.4);
        assert_eq!(config.risk.sentiment_band, 0.2);
        assert_eq!(config.risk.extra_distress_terms, vec!["quit tomorrow"]);
        assert_eq!(config.analytics.top_tags, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_unknown_timezone() {
        let mut config = Config::default();
        config.scheduler.default_timezone = "Mars/Olympus_Mons".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_positive_threshold() {
        let mut config = Config::default();
        config.risk.negative_threshold = 0.3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_blank_distress_term() {
        let toml = r#"
[risk]
extra_distress_terms = ["quit tomorrow", "  "]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[risk]\nextra_distress_terms = [\"\"]\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store]\nmessage_page_size = 10\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.store.message_page_size, 10);
    }
}
