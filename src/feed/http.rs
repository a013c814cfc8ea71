//! HTTP feed parser — reqwest for transport, feed-rs for RSS/Atom/JSON Feed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::FeedError;
use crate::feed::{Feed, FeedItem, FeedParser};

/// Connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Total timeout in seconds.
const TOTAL_TIMEOUT_SECS: u64 = 30;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Maximum accepted feed body (5 MiB).
pub const MAX_FEED_SIZE: u64 = 5 * 1024 * 1024;

const USER_AGENT: &str = concat!("feedgram/", env!("CARGO_PKG_VERSION"));

/// Feed parser that downloads feeds over HTTP(S).
pub struct HttpFeedParser {
    client: Client,
}

impl HttpFeedParser {
    pub fn new() -> Result<Self, FeedError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(TOTAL_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FeedError::Request(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FeedParser for HttpFeedParser {
    async fn fetch(&self, url: &Url) -> Result<Feed, FeedError> {
        validate_url(url)?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FeedError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Http {
                status: status.as_u16(),
            });
        }

        if let Some(size) = response.content_length() {
            if size > MAX_FEED_SIZE {
                return Err(FeedError::TooLarge {
                    size,
                    max: MAX_FEED_SIZE,
                });
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FeedError::Request(format!("failed to read response: {e}")))?;

        if bytes.len() as u64 > MAX_FEED_SIZE {
            return Err(FeedError::TooLarge {
                size: bytes.len() as u64,
                max: MAX_FEED_SIZE,
            });
        }

        let feed = parse_feed(&bytes)?;
        debug!(url = %url, items = feed.items.len(), "Feed fetched");
        Ok(feed)
    }
}

/// Only absolute http(s) URLs with a host are fetchable.
pub fn validate_url(url: &Url) -> Result<(), FeedError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FeedError::InvalidUrl(format!(
                "unsupported URL scheme: {scheme}"
            )));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(FeedError::InvalidUrl("URL has no host".into()));
    }

    Ok(())
}

/// Parse feed bytes into a [`Feed`].
pub fn parse_feed(bytes: &[u8]) -> Result<Feed, FeedError> {
    let parsed = feed_rs::parser::parse(bytes).map_err(|e| FeedError::Parse(e.to_string()))?;

    let title = parsed.title.map(|t| t.content).unwrap_or_default();

    let items = parsed
        .entries
        .into_iter()
        .map(|entry| {
            let title = entry.title.map(|t| t.content).unwrap_or_default();
            let description = entry
                .summary
                .map(|t| t.content)
                .or(entry.content.and_then(|c| c.body))
                .unwrap_or_default();
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();

            FeedItem::new(entry.id, title)
                .with_description(description)
                .with_link(link)
        })
        .collect();

    Ok(Feed { title, items })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example News</title>
    <link>https://example.com</link>
    <description>Example</description>
    <item>
      <guid>item-1</guid>
      <title>Election Poll Results</title>
      <link>https://example.com/poll</link>
      <description>Analysis of the poll</description>
    </item>
    <item>
      <guid>item-2</guid>
      <title>Weather</title>
      <link>https://example.com/weather</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rss_items_in_order() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(feed.title, "Example News");
        assert_eq!(feed.items.len(), 2);

        assert_eq!(feed.items[0].id, "item-1");
        assert_eq!(feed.items[0].title, "Election Poll Results");
        assert_eq!(feed.items[0].link, "https://example.com/poll");
        assert_eq!(feed.items[0].description, "Analysis of the poll");

        assert_eq!(feed.items[1].id, "item-2");
        assert!(feed.items[1].description.is_empty());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_feed(b"definitely not a feed").unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)));
    }

    #[test]
    fn rejects_non_http_schemes() {
        let url = Url::parse("ftp://example.com/feed").unwrap();
        assert!(matches!(validate_url(&url), Err(FeedError::InvalidUrl(_))));

        let url = Url::parse("https://example.com/feed").unwrap();
        assert!(validate_url(&url).is_ok());
    }

    #[test]
    fn parser_builds() {
        assert!(HttpFeedParser::new().is_ok());
    }
}
