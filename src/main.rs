use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use feedgram::channels::TelegramChannel;
use feedgram::chats::ChatHandler;
use feedgram::config::BotConfig;
use feedgram::feed::{FeedParser, HttpFeedParser};
use feedgram::poller::PollScheduler;
use feedgram::store::LibSqlStore;
use feedgram::subscription::SubscriptionRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BotConfig::from_env().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config);

    eprintln!("📰 feedgram v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!(
        "   Poll interval: {}s, failure policy: {:?} after {} failures",
        config.poller.interval.as_secs(),
        config.poller.failure_policy,
        config.poller.failure_threshold
    );
    eprintln!(
        "   Allowed users: {}\n",
        if config.allowed_users.iter().any(|u| u == "*") {
            "everyone".to_string()
        } else if config.allowed_users.is_empty() {
            "none (deny all)".to_string()
        } else {
            config.allowed_users.join(", ")
        }
    );

    let (registry, telegram, feeds) = connect(&config)
        .await
        .context("Startup failed")?;

    let scheduler = PollScheduler::attach(
        config.poller.clone(),
        &registry,
        Arc::clone(&feeds),
        telegram.clone(),
    )
    .await;
    scheduler
        .load_all(&registry)
        .await
        .context("Failed to load stored subscriptions")?;

    let handler = Arc::new(ChatHandler::new(
        Arc::clone(&registry),
        feeds,
        telegram.clone(),
    ));

    let mut messages = telegram.start().await?;

    loop {
        tokio::select! {
            next = messages.next() => {
                let Some(message) = next else {
                    tracing::warn!("Telegram message stream ended");
                    break;
                };
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    handler.handle_message(&message).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

/// Open the store, verify the bot token and build the feed client.
async fn connect(
    config: &BotConfig,
) -> feedgram::Result<(Arc<SubscriptionRegistry>, Arc<TelegramChannel>, Arc<dyn FeedParser>)> {
    let store = Arc::new(LibSqlStore::new_local(&config.db_path).await?);
    let registry = Arc::new(SubscriptionRegistry::new(store));

    let telegram = Arc::new(TelegramChannel::new(
        config.bot_token.clone(),
        config.allowed_users.clone(),
    ));
    telegram.health_check().await?;

    let feeds: Arc<dyn FeedParser> = Arc::new(HttpFeedParser::new()?);

    Ok((registry, telegram, feeds))
}

/// Log to stdout, and additionally to a daily rolling file when `LOG_DIR` is set.
///
/// `RUST_LOG` takes precedence over `LOG_LEVEL`.
fn init_tracing(config: &BotConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let stdout = tracing_subscriber::fmt::layer().with_target(false);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "feedgram.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .init();
            None
        }
    }
}
