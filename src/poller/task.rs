//! Poll task — one periodic fetch loop per distinct feed URL.
//!
//! All subscriptions of a URL share a task, so a feed is fetched once per
//! interval no matter how many chats follow it. The task state lock is never
//! held across a fetch, a store call, a send or a registry call.

use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::channels::ChatTransport;
use crate::config::{FailurePolicy, PollerConfig};
use crate::error::FeedError;
use crate::feed::{Feed, FeedParser};
use crate::poller::delivery;
use crate::store::KeyValueStore;
use crate::subscription::{Subscription, SubscriptionRegistry};

/// Collaborators shared by every poll task.
pub struct PollContext {
    pub config: PollerConfig,
    pub store: Arc<dyn KeyValueStore>,
    pub feeds: Arc<dyn FeedParser>,
    pub transport: Arc<dyn ChatTransport>,
    /// Used by [`FailurePolicy::Unsubscribe`]. Weak, the registry owns the scheduler.
    pub registry: Weak<SubscriptionRegistry>,
}

/// Result of a single [`PollTask::poll_once`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Cancelled or no subscriptions left; nothing fetched.
    Inactive,
    /// Still inside the rate-limit wait.
    Backoff,
    /// The previous cycle has not finished yet.
    Busy,
    /// Fetched, but every subscription went away in the meantime.
    Discarded,
    /// Fetched and processed.
    Fetched { items: usize, delivered: usize },
    /// The feed answered HTTP 429.
    RateLimited,
    /// Any other fetch failure; `failures` is the current streak.
    Failed { failures: u32 },
}

#[derive(Debug, Default)]
struct TaskState {
    subscriptions: Vec<Subscription>,
    in_flight: bool,
    failures: u32,
    backoff_until: Option<Instant>,
}

pub struct PollTask {
    url: Url,
    ctx: Arc<PollContext>,
    state: Mutex<TaskState>,
    cancel: watch::Sender<bool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PollTask {
    /// Create a task for `url` with its first subscription. Not started.
    pub fn new(url: Url, first: Subscription, ctx: Arc<PollContext>) -> Arc<Self> {
        let (cancel, _) = watch::channel(false);
        Arc::new(Self {
            url,
            ctx,
            state: Mutex::new(TaskState {
                subscriptions: vec![first],
                ..Default::default()
            }),
            cancel,
            handle: std::sync::Mutex::new(None),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Spawn the timer loop. The first fetch happens one interval from now.
    pub fn start(self: &Arc<Self>) {
        let task = Arc::clone(self);
        let handle = tokio::spawn(task.run());
        if let Ok(mut slot) = self.handle.lock() {
            *slot = Some(handle);
        }
    }

    async fn run(self: Arc<Self>) {
        let mut cancel_rx = self.cancel.subscribe();
        let mut ticker = tokio::time::interval(self.ctx.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip immediate first tick
        ticker.tick().await;

        info!(
            url = %self.url,
            interval_secs = self.ctx.config.interval.as_secs(),
            "Poll task started"
        );

        loop {
            if *cancel_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                changed = cancel_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(url = %self.url, "Poll task stopped");
    }

    /// Stop the timer loop. An in-flight cycle finishes but delivers nothing.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Wait for the timer loop to exit. Returns immediately if never started.
    pub async fn join(&self) {
        let handle = self.handle.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(url = %self.url, error = %e, "Poll task ended abnormally");
            }
        }
    }

    /// Attach another subscription. Duplicate ids are ignored.
    pub async fn add_subscription(&self, subscription: Subscription) {
        let mut state = self.state.lock().await;
        if !state.subscriptions.iter().any(|s| s.id == subscription.id) {
            state.subscriptions.push(subscription);
        }
    }

    /// Detach a subscription; returns how many remain.
    pub async fn remove_subscription(&self, id: Uuid) -> usize {
        let mut state = self.state.lock().await;
        state.subscriptions.retain(|s| s.id != id);
        state.subscriptions.len()
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.state.lock().await.subscriptions.clone()
    }

    /// Current consecutive-failure streak.
    pub async fn failures(&self) -> u32 {
        self.state.lock().await.failures
    }

    pub async fn backoff_until(&self) -> Option<Instant> {
        self.state.lock().await.backoff_until
    }

    async fn has_subscription(&self, id: Uuid) -> bool {
        self.state
            .lock()
            .await
            .subscriptions
            .iter()
            .any(|s| s.id == id)
    }

    /// Run one fetch cycle now. The timer loop calls this on every tick.
    pub async fn poll_once(&self) -> PollOutcome {
        {
            let mut state = self.state.lock().await;
            if self.is_cancelled() || state.subscriptions.is_empty() {
                return PollOutcome::Inactive;
            }
            if let Some(until) = state.backoff_until {
                if Instant::now() < until {
                    debug!(url = %self.url, "Rate-limit wait active, skipping fetch");
                    return PollOutcome::Backoff;
                }
                state.backoff_until = None;
            }
            if state.in_flight {
                debug!(url = %self.url, "Previous fetch still running, skipping tick");
                return PollOutcome::Busy;
            }
            state.in_flight = true;
        }

        let outcome = match self.ctx.feeds.fetch(&self.url).await {
            Ok(feed) => self.on_success(feed).await,
            Err(e) => self.on_failure(e).await,
        };

        self.state.lock().await.in_flight = false;
        outcome
    }

    async fn on_success(&self, feed: Feed) -> PollOutcome {
        let subscriptions = {
            let mut state = self.state.lock().await;
            state.failures = 0;
            state.subscriptions.clone()
        };

        if self.is_cancelled() || subscriptions.is_empty() {
            debug!(url = %self.url, "Discarding fetch result, no subscribers left");
            return PollOutcome::Discarded;
        }

        let mut delivered = 0;
        for subscription in &subscriptions {
            if self.is_cancelled() || !self.has_subscription(subscription.id).await {
                continue;
            }

            match delivery::deliver_new_items(
                self.ctx.store.as_ref(),
                self.ctx.transport.as_ref(),
                subscription,
                &feed.items,
            )
            .await
            {
                Ok(report) => delivered += report.delivered,
                Err(e) => warn!(
                    url = %self.url,
                    subscription_id = %subscription.id,
                    error = %e,
                    "Failed to process feed items"
                ),
            }
        }

        debug!(url = %self.url, items = feed.items.len(), delivered, "Feed polled");
        PollOutcome::Fetched {
            items: feed.items.len(),
            delivered,
        }
    }

    async fn on_failure(&self, error: FeedError) -> PollOutcome {
        let threshold = self.ctx.config.failure_threshold;

        let (failures, to_notify) = {
            let mut state = self.state.lock().await;

            if error.is_rate_limited() {
                state.backoff_until = Some(Instant::now() + self.ctx.config.rate_limit_wait);
                warn!(
                    url = %self.url,
                    wait_secs = self.ctx.config.rate_limit_wait.as_secs(),
                    "Feed rate limited, pausing"
                );
                return PollOutcome::RateLimited;
            }

            state.failures = state.failures.saturating_add(1);
            // Only the crossing fetch escalates, once per streak.
            let to_notify = if state.failures == threshold {
                state.subscriptions.clone()
            } else {
                Vec::new()
            };
            (state.failures, to_notify)
        };

        warn!(url = %self.url, failures, error = %error, "Feed fetch failed");

        if !to_notify.is_empty() {
            self.escalate(&to_notify, failures).await;
        }

        PollOutcome::Failed { failures }
    }

    async fn escalate(&self, subscriptions: &[Subscription], failures: u32) {
        let policy = self.ctx.config.failure_policy;
        let mut text = format!(
            "Could not fetch feed from {} for {failures} times, please check if the fetch source is valid",
            self.url
        );
        if policy == FailurePolicy::Unsubscribe {
            text.push_str("\n\nThe subscription has been removed.");
        }

        for subscription in subscriptions {
            if let Err(e) = self
                .ctx
                .transport
                .send_message(subscription.chat_id, &text, None)
                .await
            {
                warn!(
                    chat_id = subscription.chat_id,
                    error = %e,
                    "Failed to send failure notice"
                );
            }

            if policy != FailurePolicy::Unsubscribe {
                continue;
            }

            let Some(registry) = self.ctx.registry.upgrade() else {
                warn!(url = %self.url, "Registry gone, cannot remove failing subscription");
                continue;
            };
            match registry.remove(subscription).await {
                Ok(()) => info!(
                    subscription_id = %subscription.id,
                    url = %self.url,
                    "Removed subscription after repeated fetch failures"
                ),
                Err(e) => warn!(
                    subscription_id = %subscription.id,
                    error = %e,
                    "Failed to remove failing subscription"
                ),
            }
        }
    }
}

impl std::fmt::Debug for PollTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollTask")
            .field("url", &self.url.as_str())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::channels::OutgoingMessage;
    use crate::error::ChannelError;
    use crate::feed::FeedItem;
    use crate::store::LibSqlStore;

    /// Replays scripted fetch results; an empty script yields an empty feed.
    #[derive(Default)]
    struct ScriptedFeeds {
        script: StdMutex<VecDeque<Result<Feed, u16>>>,
        calls: StdMutex<usize>,
    }

    impl ScriptedFeeds {
        fn push(&self, result: Result<Feed, u16>) {
            self.script.lock().unwrap().push_back(result);
        }
    }

    #[async_trait]
    impl FeedParser for ScriptedFeeds {
        async fn fetch(&self, _url: &Url) -> Result<Feed, FeedError> {
            *self.calls.lock().unwrap() += 1;
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(feed)) => Ok(feed),
                Some(Err(status)) => Err(FeedError::Http { status }),
                None => Ok(Feed::default()),
            }
        }
    }

    #[derive(Default)]
    struct Outbox {
        sent: StdMutex<Vec<OutgoingMessage>>,
    }

    #[async_trait]
    impl ChatTransport for Outbox {
        async fn send(&self, message: OutgoingMessage) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    struct Harness {
        task: Arc<PollTask>,
        feeds: Arc<ScriptedFeeds>,
        outbox: Arc<Outbox>,
    }

    async fn harness(config: PollerConfig) -> Harness {
        let store: Arc<dyn KeyValueStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let feeds = Arc::new(ScriptedFeeds::default());
        let outbox = Arc::new(Outbox::default());
        let ctx = Arc::new(PollContext {
            config,
            store,
            feeds: feeds.clone(),
            transport: outbox.clone(),
            registry: Weak::new(),
        });
        let url = Url::parse("https://example.com/feed").unwrap();
        let sub = Subscription::new(10, url.clone(), "");
        Harness {
            task: PollTask::new(url, sub, ctx),
            feeds,
            outbox,
        }
    }

    /// Holds every fetch open until the test releases it.
    #[derive(Default)]
    struct GatedFeeds {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl FeedParser for GatedFeeds {
        async fn fetch(&self, _url: &Url) -> Result<Feed, FeedError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(feed(&["a", "b"]))
        }
    }

    async fn gated_task() -> (Arc<PollTask>, Arc<GatedFeeds>, Arc<dyn KeyValueStore>) {
        let store: Arc<dyn KeyValueStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let feeds = Arc::new(GatedFeeds::default());
        let ctx = Arc::new(PollContext {
            config: PollerConfig::default(),
            store: store.clone(),
            feeds: feeds.clone(),
            transport: Arc::new(Outbox::default()),
            registry: Weak::new(),
        });
        let url = Url::parse("https://example.com/feed").unwrap();
        let sub = Subscription::new(10, url.clone(), "");
        (PollTask::new(url, sub, ctx), feeds, store)
    }

    fn feed(ids: &[&str]) -> Feed {
        Feed {
            title: "Example".into(),
            items: ids.iter().map(|id| FeedItem::new(*id, format!("Item {id}"))).collect(),
        }
    }

    #[tokio::test]
    async fn bootstrap_then_delivers_only_new_items() {
        let h = harness(PollerConfig::default()).await;
        h.feeds.push(Ok(feed(&["a", "b"])));
        h.feeds.push(Ok(feed(&["a", "b", "c"])));

        assert_eq!(
            h.task.poll_once().await,
            PollOutcome::Fetched { items: 2, delivered: 0 }
        );
        assert_eq!(
            h.task.poll_once().await,
            PollOutcome::Fetched { items: 3, delivered: 1 }
        );

        let sent = h.outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("Item c"));
    }

    #[tokio::test]
    async fn rate_limit_pauses_without_counting_failure() {
        let h = harness(PollerConfig::default()).await;
        h.feeds.push(Err(429));

        assert_eq!(h.task.poll_once().await, PollOutcome::RateLimited);
        assert_eq!(h.task.failures().await, 0);
        assert!(h.task.backoff_until().await.is_some());

        assert_eq!(h.task.poll_once().await, PollOutcome::Backoff);
        assert_eq!(*h.feeds.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn rate_limit_wait_expires() {
        let config = PollerConfig {
            rate_limit_wait: Duration::ZERO,
            ..Default::default()
        };
        let h = harness(config).await;
        h.feeds.push(Err(429));

        assert_eq!(h.task.poll_once().await, PollOutcome::RateLimited);
        assert!(matches!(h.task.poll_once().await, PollOutcome::Fetched { .. }));
        assert!(h.task.backoff_until().await.is_none());
    }

    #[tokio::test]
    async fn notifies_once_when_threshold_reached() {
        let config = PollerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let h = harness(config).await;
        for _ in 0..4 {
            h.feeds.push(Err(500));
        }

        for expected in 1..=4 {
            assert_eq!(
                h.task.poll_once().await,
                PollOutcome::Failed { failures: expected }
            );
        }

        let sent = h.outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, 10);
        assert!(sent[0].text.starts_with("Could not fetch feed from https://example.com/feed"));
    }

    #[tokio::test]
    async fn success_resets_failure_streak() {
        let h = harness(PollerConfig::default()).await;
        h.feeds.push(Err(500));
        h.feeds.push(Err(503));
        h.task.poll_once().await;
        h.task.poll_once().await;
        assert_eq!(h.task.failures().await, 2);

        h.task.poll_once().await;
        assert_eq!(h.task.failures().await, 0);
    }

    #[tokio::test]
    async fn cancelled_task_does_not_fetch() {
        let h = harness(PollerConfig::default()).await;
        h.task.cancel();

        assert_eq!(h.task.poll_once().await, PollOutcome::Inactive);
        assert_eq!(*h.feeds.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_subscription_ids_are_ignored() {
        let h = harness(PollerConfig::default()).await;
        let existing = h.task.subscriptions().await[0].clone();
        h.task.add_subscription(existing.clone()).await;
        assert_eq!(h.task.subscriptions().await.len(), 1);

        assert_eq!(h.task.remove_subscription(existing.id).await, 0);
    }

    #[tokio::test]
    async fn overlapping_poll_is_skipped_while_fetch_runs() {
        let (task, gate, _store) = gated_task().await;

        let first = tokio::spawn({
            let task = task.clone();
            async move { task.poll_once().await }
        });
        gate.started.notified().await;

        assert_eq!(task.poll_once().await, PollOutcome::Busy);

        gate.release.notify_one();
        assert_eq!(
            first.await.unwrap(),
            PollOutcome::Fetched { items: 2, delivered: 0 }
        );
    }

    #[tokio::test]
    async fn result_is_discarded_when_last_subscription_leaves_mid_fetch() {
        let (task, gate, store) = gated_task().await;
        let sub = task.subscriptions().await[0].clone();

        let first = tokio::spawn({
            let task = task.clone();
            async move { task.poll_once().await }
        });
        gate.started.notified().await;

        assert_eq!(task.remove_subscription(sub.id).await, 0);
        task.cancel();
        gate.release.notify_one();

        assert_eq!(first.await.unwrap(), PollOutcome::Discarded);
        assert!(!store.exists(&sub.first_fetch_key()).await.unwrap());
        assert!(store.set_members(&sub.seen_items_key()).await.unwrap().is_empty());
        assert_eq!(task.poll_once().await, PollOutcome::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_skips_first_tick_and_stops_on_cancel() {
        let config = PollerConfig {
            interval: Duration::from_secs(60),
            ..Default::default()
        };
        let h = harness(config).await;
        h.task.start();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(*h.feeds.calls.lock().unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(*h.feeds.calls.lock().unwrap(), 1);

        h.task.cancel();
        h.task.join().await;
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(*h.feeds.calls.lock().unwrap(), 1);
    }
}
