//! Subscription registry — in-process authority over subscription lifecycle.
//!
//! Records are persisted through the [`KeyValueStore`] and cached
//! read-through. Every successful add/remove is pushed to the registered
//! [`SubscriptionListener`]s (the poll scheduler in production).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::store::{KeyValueStore, keys};
use crate::subscription::Subscription;

/// Observer for subscription lifecycle events.
///
/// Called after the store mutation succeeded, on the caller's task.
#[async_trait]
pub trait SubscriptionListener: Send + Sync {
    async fn on_subscription_added(&self, subscription: &Subscription);

    async fn on_subscription_removed(&self, subscription: &Subscription);
}

pub struct SubscriptionRegistry {
    store: Arc<dyn KeyValueStore>,
    /// Read-through cache keyed by record key.
    cache: RwLock<HashMap<String, Subscription>>,
    listeners: RwLock<Vec<Arc<dyn SubscriptionListener>>>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Register a listener for add/remove events.
    pub async fn add_listener(&self, listener: Arc<dyn SubscriptionListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Persist a subscription and announce it. Returns the record key.
    pub async fn add(&self, subscription: Subscription) -> Result<String, StoreError> {
        let key = subscription.record_key();
        let json = serde_json::to_string(&subscription)?;

        self.store.set(&key, &json).await?;
        self.cache
            .write()
            .await
            .insert(key.clone(), subscription.clone());

        info!(
            subscription_id = %subscription.id,
            chat_id = subscription.chat_id,
            url = %subscription.url,
            "Subscription added"
        );

        for listener in self.listeners.read().await.iter() {
            listener.on_subscription_added(&subscription).await;
        }

        Ok(key)
    }

    /// Delete a subscription, announce the removal, then drop its seen-item
    /// set and first-fetch marker.
    pub async fn remove(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let key = subscription.record_key();
        self.store.delete(&key).await?;
        self.cache.write().await.remove(&key);

        info!(
            subscription_id = %subscription.id,
            chat_id = subscription.chat_id,
            url = %subscription.url,
            "Subscription removed"
        );

        for listener in self.listeners.read().await.iter() {
            listener.on_subscription_removed(subscription).await;
        }

        // The record is gone; leftover markers only cost space.
        for aux in [subscription.first_fetch_key(), subscription.seen_items_key()] {
            if let Err(e) = self.store.delete(&aux).await {
                warn!(key = %aux, error = %e, "Failed to delete subscription marker");
            }
        }

        Ok(())
    }

    /// Every stored subscription.
    pub async fn all(&self) -> Result<Vec<Subscription>, StoreError> {
        self.load(&keys::all_subscriptions_prefix()).await
    }

    /// Subscriptions of one chat, oldest first.
    pub async fn for_chat(&self, chat_id: i64) -> Result<Vec<Subscription>, StoreError> {
        self.load(&keys::chat_subscriptions_prefix(chat_id)).await
    }

    async fn load(&self, prefix: &str) -> Result<Vec<Subscription>, StoreError> {
        let record_keys = self.store.keys(prefix).await?;
        let mut output = Vec::with_capacity(record_keys.len());

        for key in record_keys {
            if let Some(cached) = self.cache.read().await.get(&key) {
                output.push(cached.clone());
                continue;
            }

            let Some(json) = self.store.get(&key).await? else {
                // Deleted between listing and reading.
                continue;
            };
            let subscription: Subscription = serde_json::from_str(&json)?;

            debug!(key = %key, "Subscription cached");
            self.cache
                .write()
                .await
                .insert(key, subscription.clone());
            output.push(subscription);
        }

        output.sort_by(|a, b| {
            a.creation_date
                .cmp(&b.creation_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(output)
    }
}
