//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// What a poll task does once a feed has failed `failure_threshold` times in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Tell every subscribed chat and keep polling.
    #[default]
    Notify,
    /// Tell every subscribed chat and remove their subscriptions.
    Unsubscribe,
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "notify" => Ok(Self::Notify),
            "unsubscribe" => Ok(Self::Unsubscribe),
            other => Err(ConfigError::InvalidValue {
                key: "RSS_FAILURE_POLICY".into(),
                message: format!("expected 'notify' or 'unsubscribe', got '{other}'"),
            }),
        }
    }
}

/// Poll engine configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between two fetches of the same feed.
    pub interval: Duration,
    /// How long a feed is left alone after it answered HTTP 429.
    pub rate_limit_wait: Duration,
    /// Consecutive failures before the failure policy kicks in.
    pub failure_threshold: u32,
    pub failure_policy: FailurePolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            rate_limit_wait: Duration::from_secs(300), // 5 minutes
            failure_threshold: 5,
            failure_policy: FailurePolicy::Notify,
        }
    }
}

/// Whole-process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: SecretString,
    /// Telegram usernames or numeric ids allowed to talk to the bot (`*` = everyone).
    pub allowed_users: Vec<String>,
    pub db_path: PathBuf,
    pub log_level: String,
    /// Directory for rolling log files; stdout only when unset.
    pub log_dir: Option<PathBuf>,
    pub poller: PollerConfig,
}

impl BotConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var("BOT_TOKEN")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("BOT_TOKEN".into()))?;

        let allowed_users = parse_list(
            &std::env::var("TELEGRAM_ALLOWED_USERS").unwrap_or_else(|_| "*".to_string()),
        );

        let db_path = std::env::var("DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/feedgram.db"));

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_dir = std::env::var("LOG_DIR").ok().map(PathBuf::from);

        let defaults = PollerConfig::default();
        let poller = PollerConfig {
            interval: env_secs("RSS_INTERVAL", defaults.interval)?,
            rate_limit_wait: env_secs("RSS_429_TIMEOUT", defaults.rate_limit_wait)?,
            failure_threshold: env_parse("RSS_FAILURE_THRESHOLD", defaults.failure_threshold)?,
            failure_policy: match std::env::var("RSS_FAILURE_POLICY") {
                Ok(s) => s.parse()?,
                Err(_) => defaults.failure_policy,
            },
        };

        if poller.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "RSS_INTERVAL".into(),
                message: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            allowed_users,
            db_path,
            log_level,
            log_dir,
            poller,
        })
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}
