//! Subscription record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::store::keys;

/// A chat's registered interest in a feed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub chat_id: i64,
    pub url: Url,
    /// Comma-separated OR terms; empty means "everything".
    pub search_pattern: String,
    pub creation_date: DateTime<Utc>,
}

impl Subscription {
    pub fn new(chat_id: i64, url: Url, search_pattern: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chat_id,
            url,
            search_pattern: search_pattern.into(),
            creation_date: Utc::now(),
        }
    }

    pub fn record_key(&self) -> String {
        keys::subscription(self.chat_id, self.id)
    }

    pub fn seen_items_key(&self) -> String {
        keys::seen_items(self.chat_id, self.id)
    }

    pub fn first_fetch_key(&self) -> String {
        keys::first_fetch(self.chat_id, self.id)
    }

    /// Pattern terms, trimmed. An empty term is kept and matches any item.
    pub fn pattern_terms(&self) -> Vec<&str> {
        if self.search_pattern.is_empty() {
            return Vec::new();
        }
        self.search_pattern.split(',').map(str::trim).collect()
    }
}

impl std::fmt::Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let date = self.creation_date.format("%m-%d-%Y %H:%M:%S");
        if self.search_pattern.is_empty() {
            write!(f, "{} without pattern, added {date}", self.url)
        } else {
            write!(
                f,
                "{} with pattern {}, added {date}",
                self.url, self.search_pattern
            )
        }
    }
}
