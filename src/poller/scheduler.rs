//! Poll scheduler — keeps exactly one [`PollTask`] per subscribed feed URL.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::channels::ChatTransport;
use crate::config::PollerConfig;
use crate::error::StoreError;
use crate::feed::FeedParser;
use crate::poller::task::{PollContext, PollTask};
use crate::subscription::{Subscription, SubscriptionListener, SubscriptionRegistry};

/// Owns the URL → task map.
///
/// Lock order is map first, then task state; tasks never touch the map.
pub struct PollScheduler {
    ctx: Arc<PollContext>,
    tasks: RwLock<HashMap<String, Arc<PollTask>>>,
}

impl PollScheduler {
    pub fn new(
        config: PollerConfig,
        registry: &Arc<SubscriptionRegistry>,
        feeds: Arc<dyn FeedParser>,
        transport: Arc<dyn ChatTransport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx: Arc::new(PollContext {
                config,
                store: Arc::clone(registry.store()),
                feeds,
                transport,
                registry: Arc::downgrade(registry),
            }),
            tasks: RwLock::new(HashMap::new()),
        })
    }

    /// Create a scheduler and register it with the registry, so later
    /// adds and removes reach it.
    pub async fn attach(
        config: PollerConfig,
        registry: &Arc<SubscriptionRegistry>,
        feeds: Arc<dyn FeedParser>,
        transport: Arc<dyn ChatTransport>,
    ) -> Arc<Self> {
        let scheduler = Self::new(config, registry, feeds, transport);
        registry.add_listener(scheduler.clone()).await;
        scheduler
    }

    /// Start polling for every subscription already in the store.
    pub async fn load_all(&self, registry: &SubscriptionRegistry) -> Result<usize, StoreError> {
        let subscriptions = registry.all().await?;
        let count = subscriptions.len();
        for subscription in subscriptions {
            self.add_subscription(subscription).await;
        }

        info!(
            subscriptions = count,
            tasks = self.task_count().await,
            "Loaded stored subscriptions"
        );
        Ok(count)
    }

    /// Attach a subscription to the task of its URL, starting one if needed.
    pub async fn add_subscription(&self, subscription: Subscription) {
        let mut tasks = self.tasks.write().await;
        let key = subscription.url.as_str().to_string();

        if let Some(task) = tasks.get(&key) {
            debug!(url = %key, subscription_id = %subscription.id, "Joining existing poll task");
            task.add_subscription(subscription).await;
            return;
        }

        let task = PollTask::new(subscription.url.clone(), subscription, Arc::clone(&self.ctx));
        task.start();
        tasks.insert(key, task);
    }

    /// Detach a subscription; the task is cancelled with its last subscription.
    pub async fn remove_subscription(&self, subscription: &Subscription) {
        let mut tasks = self.tasks.write().await;
        let key = subscription.url.as_str();

        let Some(task) = tasks.get(key) else {
            return;
        };

        if task.remove_subscription(subscription.id).await == 0 {
            task.cancel();
            tasks.remove(key);
            debug!(url = %key, "Last subscription gone, poll task cancelled");
        }
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// The running task for `url`, if any.
    pub async fn task(&self, url: &Url) -> Option<Arc<PollTask>> {
        self.tasks.read().await.get(url.as_str()).cloned()
    }

    /// Subscriptions currently attached to the task for `url`.
    pub async fn subscriptions_for(&self, url: &Url) -> Vec<Subscription> {
        match self.task(url).await {
            Some(task) => task.subscriptions().await,
            None => Vec::new(),
        }
    }

    /// Cancel every task and wait for their loops to exit.
    pub async fn shutdown(&self) {
        let tasks: Vec<Arc<PollTask>> = self.tasks.write().await.drain().map(|(_, t)| t).collect();
        for task in &tasks {
            task.cancel();
        }
        for task in &tasks {
            task.join().await;
        }
        info!(tasks = tasks.len(), "Poll scheduler stopped");
    }
}

#[async_trait]
impl SubscriptionListener for PollScheduler {
    async fn on_subscription_added(&self, subscription: &Subscription) {
        self.add_subscription(subscription.clone()).await;
    }

    async fn on_subscription_removed(&self, subscription: &Subscription) {
        self.remove_subscription(subscription).await;
    }
}
