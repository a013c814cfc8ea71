//! Feed abstraction — fetch a URL and get back structured items.

pub mod http;

use async_trait::async_trait;
use url::Url;

use crate::error::FeedError;

pub use http::HttpFeedParser;

/// A single entry of a fetched feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    /// Stable identifier (GUID / Atom id). Used for de-duplication.
    pub id: String,
    pub title: String,
    pub description: String,
    pub link: String,
}

impl FeedItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            link: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = link.into();
        self
    }

    /// Identifier used for de-duplication; falls back to link, then title,
    /// for feeds that omit GUIDs.
    pub fn dedup_key(&self) -> &str {
        [&self.id, &self.link, &self.title]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// A fetched and parsed feed, items in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    pub title: String,
    pub items: Vec<FeedItem>,
}

/// Fetches and parses feeds.
#[async_trait]
pub trait FeedParser: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Feed, FeedError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_prefers_id_then_link_then_title() {
        let item = FeedItem::new("guid-1", "Title").with_link("https://a/1");
        assert_eq!(item.dedup_key(), "guid-1");

        let item = FeedItem::new("", "Title").with_link("https://a/1");
        assert_eq!(item.dedup_key(), "https://a/1");

        let item = FeedItem::new("", "Title");
        assert_eq!(item.dedup_key(), "Title");

        assert_eq!(FeedItem::new("", "").dedup_key(), "");
    }
}
