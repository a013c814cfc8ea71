//! Shared fixtures: scripted feeds, a recording transport, a store that can
//! be told to fail, and a fully wired bot without Telegram.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use feedgram::channels::{ChatTransport, IncomingMessage, OutgoingMessage};
use feedgram::chats::ChatHandler;
use feedgram::config::PollerConfig;
use feedgram::error::{ChannelError, FeedError, StoreError};
use feedgram::feed::{Feed, FeedItem, FeedParser};
use feedgram::poller::{PollOutcome, PollScheduler};
use feedgram::store::{KeyValueStore, LibSqlStore};
use feedgram::subscription::SubscriptionRegistry;

pub const FEED_URL: &str = "https://example.com/feed";

// ── Feeds ───────────────────────────────────────────────────────────

/// What a scripted URL answers.
#[derive(Debug, Clone)]
pub enum Reply {
    Feed(Feed),
    Status(u16),
    Unreachable,
}

/// Feed parser answering from a per-URL script.
///
/// One-shot replies are consumed first, then the standing reply is used.
/// Unknown URLs are unreachable.
#[derive(Default)]
pub struct StubFeeds {
    standing: Mutex<HashMap<String, Reply>>,
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl StubFeeds {
    pub fn set(&self, url: &str, reply: Reply) {
        self.standing.lock().unwrap().insert(url.to_string(), reply);
    }

    pub fn push(&self, url: &str, reply: Reply) {
        self.queued
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl FeedParser for StubFeeds {
    async fn fetch(&self, url: &Url) -> Result<Feed, FeedError> {
        let key = url.as_str().to_string();
        *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        let reply = queued.or_else(|| self.standing.lock().unwrap().get(&key).cloned());

        match reply {
            Some(Reply::Feed(feed)) => Ok(feed),
            Some(Reply::Status(status)) => Err(FeedError::Http { status }),
            Some(Reply::Unreachable) | None => Err(FeedError::Request(format!("{key} unreachable"))),
        }
    }
}

/// Ten sample items; two of them mention "poll".
pub fn sample_items() -> Vec<FeedItem> {
    [
        ("Breaking News Update", "Get the latest breaking news and updates from around the world."),
        ("Election Poll Results", "A detailed analysis of the recent election poll results and trends."),
        ("Tech Innovations", "Explore the latest in technology and innovations shaping our future."),
        ("Daily News Highlights", "Top news stories and highlights from today's global headlines."),
        ("Breaking Insights", "Breaking insights and expert opinions on current events."),
        ("Local Election News", "Coverage of local elections, including breaking updates and insights."),
        ("Market Trends", "An in-depth look at market trends and economic developments."),
        ("Poll Analysis Report", "Comprehensive poll analysis and what it means for the next election."),
        ("Entertainment Buzz", "Catch up on the latest entertainment buzz and celebrity news."),
        ("Weather Forecast", "Breaking weather news and forecasts for your area and beyond."),
    ]
    .into_iter()
    .map(|(title, description)| item(title, description))
    .collect()
}

pub fn item(title: &str, description: &str) -> FeedItem {
    let slug = title.to_lowercase().replace(' ', "-");
    let link = format!("https://example.com/{slug}");
    FeedItem::new(link.clone(), title)
        .with_description(description)
        .with_link(link)
}

pub fn feed(items: Vec<FeedItem>) -> Feed {
    Feed {
        title: "Example News".into(),
        items,
    }
}

// ── Transport ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutgoingMessage>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat_id: i64) -> Vec<OutgoingMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.chat_id == chat_id)
            .collect()
    }

    pub fn last_text(&self, chat_id: i64) -> Option<String> {
        self.sent_to(chat_id).last().map(|m| m.text.clone())
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send(&self, message: OutgoingMessage) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// In-memory store whose writes can be switched to fail.
pub struct FlakyStore {
    inner: LibSqlStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub async fn new() -> Self {
        Self {
            inner: LibSqlStore::new_memory().await.unwrap(),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Query("write rejected".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.exists(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys(prefix).await
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.set_add(key, members).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.inner.set_members(key).await
    }
}

// ── Wired bot ───────────────────────────────────────────────────────

pub struct Bot {
    pub store: Arc<FlakyStore>,
    pub registry: Arc<SubscriptionRegistry>,
    pub scheduler: Arc<PollScheduler>,
    pub handler: ChatHandler,
    pub feeds: Arc<StubFeeds>,
    pub transport: Arc<RecordingTransport>,
}

/// Poller config whose timers never fire during a test.
pub fn manual_config() -> PollerConfig {
    PollerConfig {
        interval: Duration::from_secs(3600),
        ..Default::default()
    }
}

impl Bot {
    pub async fn new() -> Self {
        Self::with_config(manual_config()).await
    }

    pub async fn with_config(config: PollerConfig) -> Self {
        let store = Arc::new(FlakyStore::new().await);
        let registry = Arc::new(SubscriptionRegistry::new(store.clone()));
        let feeds = Arc::new(StubFeeds::default());
        let transport = Arc::new(RecordingTransport::default());

        let scheduler =
            PollScheduler::attach(config, &registry, feeds.clone(), transport.clone()).await;
        let handler = ChatHandler::new(registry.clone(), feeds.clone(), transport.clone());

        Self {
            store,
            registry,
            scheduler,
            handler,
            feeds,
            transport,
        }
    }

    /// Send `text` from `chat_id` and return the bot's last reply to that chat.
    pub async fn say(&self, chat_id: i64, text: &str) -> String {
        self.handler
            .handle_message(&IncomingMessage::new(chat_id, text))
            .await;
        self.transport.last_text(chat_id).unwrap_or_default()
    }

    /// Run one fetch cycle of the task polling `url`.
    pub async fn poll(&self, url: &str) -> PollOutcome {
        let url = Url::parse(url).unwrap();
        let task = self
            .scheduler
            .task(&url)
            .await
            .expect("no poll task for url");
        task.poll_once().await
    }
}
