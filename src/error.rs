//! Error types for feedgram.

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Key-value store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Chat channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Rate limited on channel {name}")]
    RateLimited { name: String },
}

/// Feed fetch and parse errors.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),

    #[error("Feed request failed: {0}")]
    Request(String),

    #[error("Feed server returned HTTP {status}")]
    Http { status: u16 },

    #[error("Feed too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("Failed to parse feed: {0}")]
    Parse(String),
}

impl FeedError {
    /// Whether the feed server asked us to slow down (HTTP 429).
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Http { status: 429 })
    }
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_429_counts_as_rate_limited() {
        assert!(FeedError::Http { status: 429 }.is_rate_limited());
        assert!(!FeedError::Http { status: 500 }.is_rate_limited());
        assert!(!FeedError::Request("timeout".into()).is_rate_limited());
    }

    #[test]
    fn store_error_converts_into_top_level() {
        let err: Error = StoreError::Query("boom".into()).into();
        assert_eq!(err.to_string(), "Store error: Query failed: boom");
    }
}
