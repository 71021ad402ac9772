//! Configuration loading and validation.
//!
//! Values come from an optional TOML file, then environment variables, then
//! built-in defaults.

use crate::archive::ArchiverConfig;
use crate::error::{ConfigError, Result};
use crate::trigger::TriggerConfig;

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const ENV_DATA_DIR: &str = "ARCHIVER_DATA_DIR";
const ENV_SLACK_TOKEN: &str = "SLACK_BOT_TOKEN";
const ENV_API_BIND: &str = "ARCHIVER_API_BIND";
const ENV_CHANNELS: &str = "ARCHIVER_CHANNELS";

const MAX_PAGE_SIZE: u16 = 1000;

/// Archiver configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the archive database.
    pub data_dir: PathBuf,

    /// Slack bot token. Only required by commands that talk to Slack.
    pub slack_bot_token: Option<String>,

    /// Channel ids registered when the service starts.
    pub channels: Vec<String>,

    /// Directory for the rolling log file. Logs go to stderr only when unset.
    pub log_dir: Option<PathBuf>,

    pub archive: ArchiverConfig,

    pub trigger: TriggerConfig,

    pub api: ApiConfig,
}

/// Query API settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind: SocketAddr,
    /// Where export files are written.
    pub export_dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    data_dir: Option<PathBuf>,
    slack_bot_token: Option<String>,
    #[serde(default)]
    channels: Vec<String>,
    log_dir: Option<PathBuf>,
    #[serde(default)]
    archive: TomlArchiveConfig,
    #[serde(default)]
    trigger: TomlTriggerConfig,
    #[serde(default)]
    api: TomlApiConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlArchiveConfig {
    page_size: Option<u16>,
    max_pages_per_run: Option<u32>,
    rate_limit_wait_secs: Option<u64>,
    max_rate_limit_waits: Option<u32>,
    max_retries: Option<u32>,
    retry_backoff_secs: Option<u64>,
    max_retry_backoff_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlTriggerConfig {
    interval_secs: Option<u64>,
    run_on_start: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlApiConfig {
    bind: Option<String>,
    export_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables and defaults.
    pub fn load() -> Result<Self> {
        Self::build(TomlConfig::default(), |key| std::env::var(key).ok())
    }

    /// Load from a TOML file; environment variables still take precedence.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Load {
            path: path.display().to_string(),
            source: Arc::new(error),
        })?;
        let raw: TomlConfig = toml::from_str(&content).map_err(|error| ConfigError::Parse {
            path: path.display().to_string(),
            source: error,
        })?;

        Self::build(raw, |key| std::env::var(key).ok())
    }

    fn build(raw: TomlConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = ArchiverConfig::default();
        let archive = ArchiverConfig {
            page_size: raw.archive.page_size.unwrap_or(defaults.page_size),
            max_pages_per_run: raw
                .archive
                .max_pages_per_run
                .unwrap_or(defaults.max_pages_per_run),
            rate_limit_wait: raw
                .archive
                .rate_limit_wait_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_wait),
            max_rate_limit_waits: raw
                .archive
                .max_rate_limit_waits
                .unwrap_or(defaults.max_rate_limit_waits),
            max_retries: raw.archive.max_retries.unwrap_or(defaults.max_retries),
            retry_backoff: raw
                .archive
                .retry_backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_backoff),
            max_retry_backoff: raw
                .archive
                .max_retry_backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_retry_backoff),
        };

        let trigger_defaults = TriggerConfig::default();
        let trigger = TriggerConfig {
            interval: raw
                .trigger
                .interval_secs
                .map(Duration::from_secs)
                .unwrap_or(trigger_defaults.interval),
            run_on_start: raw
                .trigger
                .run_on_start
                .unwrap_or(trigger_defaults.run_on_start),
        };

        let data_dir = env(ENV_DATA_DIR)
            .map(PathBuf::from)
            .or(raw.data_dir)
            .unwrap_or_else(default_data_dir);

        let bind_value = env(ENV_API_BIND)
            .or(raw.api.bind)
            .unwrap_or_else(|| "127.0.0.1:5000".to_string());
        let bind: SocketAddr = bind_value.parse().map_err(|_| {
            ConfigError::Invalid(format!("api bind address '{bind_value}' is not host:port"))
        })?;

        let export_dir = raw
            .api
            .export_dir
            .unwrap_or_else(|| data_dir.join("exports"));

        let mut channels = raw.channels;
        if let Some(value) = env(ENV_CHANNELS) {
            channels = value
                .split(',')
                .map(str::trim)
                .filter(|channel| !channel.is_empty())
                .map(str::to_string)
                .collect();
        }

        let slack_bot_token = env(ENV_SLACK_TOKEN)
            .or(raw.slack_bot_token)
            .filter(|token| !token.trim().is_empty());

        let config = Self {
            data_dir,
            slack_bot_token,
            channels,
            log_dir: raw.log_dir,
            archive,
            trigger,
            api: ApiConfig { bind, export_dir },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.archive.page_size == 0 || self.archive.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "archive.page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.archive.page_size
            ))
            .into());
        }
        if self.archive.max_pages_per_run == 0 {
            return Err(
                ConfigError::Invalid("archive.max_pages_per_run must be positive".into()).into(),
            );
        }
        if self.trigger.interval.is_zero() {
            return Err(
                ConfigError::Invalid("trigger.interval_secs must be positive".into()).into(),
            );
        }
        Ok(())
    }

    /// The Slack token, or an error naming where to set it.
    pub fn slack_bot_token(&self) -> Result<&str> {
        self.slack_bot_token.as_deref().ok_or_else(|| {
            ConfigError::MissingKey(format!("slack_bot_token (or {ENV_SLACK_TOKEN})")).into()
        })
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("channel-archiver"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::build(TomlConfig::default(), no_env).expect("defaults are valid");

        assert_eq!(config.archive.page_size, 50);
        assert_eq!(config.archive.max_pages_per_run, 20);
        assert_eq!(config.trigger.interval, Duration::from_secs(3600));
        assert!(config.trigger.run_on_start);
        assert_eq!(config.api.bind.port(), 5000);
        assert_eq!(config.api.export_dir, config.data_dir.join("exports"));
        assert!(config.slack_bot_token.is_none());
    }

    #[test]
    fn parses_toml_sections() {
        let raw: TomlConfig = toml::from_str(
            r#"
            data_dir = "/var/lib/archiver"
            slack_bot_token = "xoxb-file"
            channels = ["C0842M4F0AW"]

            [archive]
            page_size = 100
            rate_limit_wait_secs = 30

            [trigger]
            interval_secs = 600
            run_on_start = false

            [api]
            bind = "0.0.0.0:8080"
            "#,
        )
        .expect("toml should parse");

        let config = Config::build(raw, no_env).expect("config is valid");

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/archiver"));
        assert_eq!(config.slack_bot_token().expect("token"), "xoxb-file");
        assert_eq!(config.channels, vec!["C0842M4F0AW".to_string()]);
        assert_eq!(config.archive.page_size, 100);
        assert_eq!(config.archive.rate_limit_wait, Duration::from_secs(30));
        assert_eq!(config.trigger.interval, Duration::from_secs(600));
        assert!(!config.trigger.run_on_start);
        assert_eq!(config.api.bind.port(), 8080);
    }

    #[test]
    fn environment_overrides_file() {
        let raw: TomlConfig = toml::from_str(
            r#"
            slack_bot_token = "xoxb-file"
            channels = ["C1"]
            "#,
        )
        .expect("toml should parse");
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_SLACK_TOKEN, "xoxb-env"),
            (ENV_CHANNELS, "C2, C3,"),
        ]);

        let config = Config::build(raw, |key| env.get(key).map(|value| value.to_string()))
            .expect("config is valid");

        assert_eq!(config.slack_bot_token().expect("token"), "xoxb-env");
        assert_eq!(config.channels, vec!["C2".to_string(), "C3".to_string()]);
    }

    #[test]
    fn rejects_out_of_range_page_size() {
        let raw: TomlConfig = toml::from_str("[archive]\npage_size = 0\n").expect("toml");
        let error = Config::build(raw, no_env).expect_err("page size 0 is invalid");
        assert!(matches!(error, Error::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_token_is_reported_by_name() {
        let config = Config::build(TomlConfig::default(), no_env).expect("defaults are valid");
        let error = config.slack_bot_token().expect_err("no token configured");
        assert!(error.to_string().contains(ENV_SLACK_TOKEN));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: std::result::Result<TomlConfig, _> = toml::from_str("page_sise = 10\n");
        assert!(result.is_err());
    }
}
