use clap::Parser;
use lib_tracker::TransportConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_CONFIG_FILE: &str = "server_tracker.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Live flight tracker fed by a WebSocket ping stream", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TRACKER_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TRACKER_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TRACKER_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TRACKER_WS_URL", help = "WebSocket URL of the ping feed.")]
    pub ws_url: Option<String>,

    #[clap(long, env = "TRACKER_RECONNECT_INTERVAL_MS", help = "Fixed delay in milliseconds between reconnect attempts.")]
    pub reconnect_interval_ms: Option<u64>,

    #[clap(long, env = "TRACKER_MAX_RECONNECT_ATTEMPTS", help = "Consecutive reconnect attempts before giving up.")]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "TRACKER_STATUS_INTERVAL_MS", help = "Interval in milliseconds for sampling the connection status.")]
    pub status_interval_ms: Option<u64>,

    #[clap(long, env = "TRACKER_EVICTION_INTERVAL_SECONDS", help = "Interval in seconds between stale flight sweeps.")]
    pub eviction_interval_seconds: Option<u64>,
}

impl Config {
    pub fn defaults() -> Config {
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ws_url: Some("ws://localhost:8080/map-updates".to_string()),
            reconnect_interval_ms: Some(5000),
            max_reconnect_attempts: Some(3),
            status_interval_ms: Some(1000),
            eviction_interval_seconds: Some(60),
            ..Default::default()
        }
    }

    // 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            ws_url: other.ws_url.or(self.ws_url),
            reconnect_interval_ms: other.reconnect_interval_ms.or(self.reconnect_interval_ms),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            status_interval_ms: other.status_interval_ms.or(self.status_interval_ms),
            eviction_interval_seconds: other.eviction_interval_seconds.or(self.eviction_interval_seconds),
        }
    }

    /// Layers the JSON file at `path` over `self`. A missing or unreadable
    /// file leaves `self` as it is.
    fn merge_file(self, path: &Path) -> Config {
        if !path.exists() {
            log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
            return self;
        }
        match fs::read_to_string(path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => self.merge(file_config),
                Err(e) => {
                    log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                    self
                }
            },
            Err(e) => {
                log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
                self
            }
        }
    }
}

/// Defaults, then the config file, then environment and CLI.
pub fn resolve(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    Config::defaults().merge_file(&config_file_path).merge(cli)
}

pub fn load_config() -> Config {
    // clap reads both the CLI and the TRACKER_* environment variables.
    resolve(Config::parse())
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid WebSocket URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unknown log level: {0}")]
    InvalidLogLevel(String),

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Fully resolved and validated runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub ws_url: Url,
    pub reconnect_delay: Duration,
    pub max_retries: u32,
    pub status_interval: Duration,
    pub eviction_interval: Duration,
    pub log_dir: PathBuf,
    pub log_level: log::LevelFilter,
}

impl TrackerSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let raw_url = config.ws_url.clone().ok_or(ConfigError::Missing("wsUrl"))?;
        let ws_url = Url::parse(&raw_url).map_err(|e| ConfigError::InvalidUrl {
            url: raw_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(ws_url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl {
                url: raw_url,
                reason: format!("unsupported scheme '{}'", ws_url.scheme()),
            });
        }

        let reconnect_ms = config
            .reconnect_interval_ms
            .ok_or(ConfigError::Missing("reconnectIntervalMs"))?;
        let max_retries = config
            .max_reconnect_attempts
            .ok_or(ConfigError::Missing("maxReconnectAttempts"))?;

        let status_ms = config.status_interval_ms.ok_or(ConfigError::Missing("statusIntervalMs"))?;
        if status_ms == 0 {
            return Err(ConfigError::ZeroInterval("statusIntervalMs"));
        }
        let eviction_secs = config
            .eviction_interval_seconds
            .ok_or(ConfigError::Missing("evictionIntervalSeconds"))?;
        if eviction_secs == 0 {
            return Err(ConfigError::ZeroInterval("evictionIntervalSeconds"));
        }

        let log_dir = config.log_dir.clone().ok_or(ConfigError::Missing("logDir"))?;
        let log_level = parse_level(config.log_level.as_deref().unwrap_or("info"))?;

        Ok(TrackerSettings {
            ws_url,
            reconnect_delay: Duration::from_millis(reconnect_ms),
            max_retries,
            status_interval: Duration::from_millis(status_ms),
            eviction_interval: Duration::from_secs(eviction_secs),
            log_dir,
            log_level,
        })
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig::new(self.ws_url.as_str(), self.reconnect_delay, self.max_retries)
    }
}

fn parse_level(level: &str) -> Result<log::LevelFilter, ConfigError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(log::LevelFilter::Trace),
        "debug" => Ok(log::LevelFilter::Debug),
        "info" => Ok(log::LevelFilter::Info),
        "warn" | "warning" => Ok(log::LevelFilter::Warn),
        "error" | "fatal" => Ok(log::LevelFilter::Error),
        "off" => Ok(log::LevelFilter::Off),
        _ => Err(ConfigError::InvalidLogLevel(level.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_resolve_to_valid_settings() {
        let settings = TrackerSettings::from_config(&Config::defaults()).unwrap();
        assert_eq!(settings.ws_url.as_str(), "ws://localhost:8080/map-updates");
        assert_eq!(settings.reconnect_delay, Duration::from_millis(5000));
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.status_interval, Duration::from_secs(1));
        assert_eq!(settings.eviction_interval, Duration::from_secs(60));
        assert_eq!(settings.log_level, log::LevelFilter::Info);
    }

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"wsUrl": "wss://feed.example.com/pings", "maxReconnectAttempts": 7, "logLevel": "debug"}}"#
        )
        .unwrap();

        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            max_reconnect_attempts: Some(1),
            ..Default::default()
        };
        let config = resolve(cli);

        assert_eq!(config.ws_url.as_deref(), Some("wss://feed.example.com/pings"));
        assert_eq!(config.max_reconnect_attempts, Some(1));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.reconnect_interval_ms, Some(5000));
    }

    #[test]
    fn malformed_file_is_ignored() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let mut expected = Config::defaults();
        expected.config_path = Some(file.path().to_path_buf());
        assert_eq!(resolve(cli), expected);
    }

    #[test]
    fn rejects_non_websocket_urls() {
        let mut config = Config::defaults();
        config.ws_url = Some("http://localhost:8080/map-updates".to_string());
        assert!(matches!(
            TrackerSettings::from_config(&config),
            Err(ConfigError::InvalidUrl { .. })
        ));

        config.ws_url = Some("not a url".to_string());
        assert!(matches!(
            TrackerSettings::from_config(&config),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn rejects_zero_intervals_and_unknown_levels() {
        let mut config = Config::defaults();
        config.eviction_interval_seconds = Some(0);
        assert_eq!(
            TrackerSettings::from_config(&config),
            Err(ConfigError::ZeroInterval("evictionIntervalSeconds"))
        );

        let mut config = Config::defaults();
        config.log_level = Some("loud".to_string());
        assert_eq!(
            TrackerSettings::from_config(&config),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );
    }

    #[test]
    fn cli_flags_parse() {
        let cli = Config::try_parse_from([
            "server_tracker",
            "--ws-url",
            "ws://127.0.0.1:9000/feed",
            "--reconnect-interval-ms",
            "250",
        ])
        .unwrap();
        assert_eq!(cli.ws_url.as_deref(), Some("ws://127.0.0.1:9000/feed"));
        assert_eq!(cli.reconnect_interval_ms, Some(250));
    }
}
