//! Delivery filter — per subscription, per fetch: dedup, bootstrap, pattern match, send.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, trace, warn};

use crate::channels::telegram::TELEGRAM_MAX_MESSAGE_LENGTH;
use crate::channels::{ChatTransport, OutgoingMessage, ParseMode};
use crate::error::StoreError;
use crate::feed::FeedItem;
use crate::store::KeyValueStore;
use crate::subscription::Subscription;

/// Longest description (in chars) put into a chat message.
const MAX_DESCRIPTION_CHARS: usize = 3000;

/// Longest title (in chars) put into a chat message.
const MAX_TITLE_CHARS: usize = 256;

/// Room for markup and separators around title, description and link.
const RENDER_OVERHEAD_CHARS: usize = 16;

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// What happened to one subscription during one fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryReport {
    /// Items not seen before this cycle.
    pub new_items: usize,
    /// Items actually sent to the chat.
    pub delivered: usize,
    /// First fetch of the subscription: new items recorded, nothing sent.
    pub bootstrap: bool,
}

/// Record unseen items of `items` for `subscription` and send the matching ones.
///
/// Identifiers are persisted before anything is sent, so a failed send
/// never leads to a duplicate on the next cycle.
pub async fn deliver_new_items(
    store: &dyn KeyValueStore,
    transport: &dyn ChatTransport,
    subscription: &Subscription,
    items: &[FeedItem],
) -> Result<DeliveryReport, StoreError> {
    let seen: HashSet<String> = store
        .set_members(&subscription.seen_items_key())
        .await?
        .into_iter()
        .collect();

    let mut fresh_ids = HashSet::new();
    let new_items: Vec<&FeedItem> = items
        .iter()
        .filter(|item| {
            let key = item.dedup_key();
            !seen.contains(key) && fresh_ids.insert(key.to_string())
        })
        .collect();

    let mut report = DeliveryReport {
        new_items: new_items.len(),
        ..Default::default()
    };

    if !new_items.is_empty() {
        let ids: Vec<String> = new_items
            .iter()
            .map(|item| item.dedup_key().to_string())
            .collect();
        store.set_add(&subscription.seen_items_key(), &ids).await?;
    }

    let marker = subscription.first_fetch_key();
    if !store.exists(&marker).await? {
        store.set(&marker, "1").await?;
        report.bootstrap = true;
        debug!(
            subscription_id = %subscription.id,
            recorded = report.new_items,
            "First fetch, items recorded without delivery"
        );
        return Ok(report);
    }

    for item in new_items {
        if !matches_pattern(item, subscription) {
            continue;
        }

        let text = render_item(item);
        trace!(chat_id = subscription.chat_id, "{text}");

        let message = OutgoingMessage::new(subscription.chat_id, text).with_parse_mode(ParseMode::Html);
        match transport.send(message).await {
            Ok(()) => report.delivered += 1,
            Err(e) => warn!(
                subscription_id = %subscription.id,
                chat_id = subscription.chat_id,
                item = %item.dedup_key(),
                error = %e,
                "Failed to deliver feed item"
            ),
        }
    }

    Ok(report)
}

/// Whether `item` passes the subscription's search pattern.
///
/// Any term found case-insensitively in title, description or link is a match.
/// An empty pattern, or any empty term (`"News,"`), matches everything.
pub fn matches_pattern(item: &FeedItem, subscription: &Subscription) -> bool {
    let terms = subscription.pattern_terms();
    if terms.is_empty() {
        return true;
    }

    let haystacks = [
        item.title.to_lowercase(),
        item.description.to_lowercase(),
        item.link.to_lowercase(),
    ];

    terms.iter().any(|term| {
        let term = term.to_lowercase();
        haystacks.iter().any(|h| h.contains(&term))
    })
}

/// Render an item as Telegram HTML: bold title, description, link.
///
/// Title and description are shortened so the message fits Telegram's limit.
pub fn render_item(item: &FeedItem) -> String {
    let title = truncate(item.title.trim(), MAX_TITLE_CHARS);
    let link = item.link.trim();
    let description_budget = TELEGRAM_MAX_MESSAGE_LENGTH
        .saturating_sub(title.chars().count() + link.chars().count() + RENDER_OVERHEAD_CHARS)
        .min(MAX_DESCRIPTION_CHARS);

    let mut parts = Vec::new();

    if !title.is_empty() {
        parts.push(format!("<b>{}</b>\n", escape_html(&title)));
    }

    let description = plain_text(&item.description);
    if !description.is_empty() && description_budget > 0 {
        parts.push(escape_html(&truncate(&description, description_budget)));
    }

    if !link.is_empty() {
        parts.push(format!("\n{}", escape_html(link)));
    }

    parts.join("\n")
}

/// Strip tags and decode the common entities of an HTML fragment.
fn plain_text(html: &str) -> String {
    let stripped = HTML_TAG.replace_all(html, "");
    stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}…", &s[..end]),
        None => s.to_string(),
    }
}
