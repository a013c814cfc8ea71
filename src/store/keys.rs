//! Key layout for everything feedgram persists.

use uuid::Uuid;

const SUBSCRIPTION: &str = "subscription";
const SEEN_ITEMS: &str = "guids";
const FIRST_FETCH: &str = "post-fetch";

/// JSON subscription record.
pub fn subscription(chat_id: i64, id: Uuid) -> String {
    format!("{SUBSCRIPTION}:{chat_id}:{id}")
}

/// Set of item identifiers already processed for a subscription.
pub fn seen_items(chat_id: i64, id: Uuid) -> String {
    format!("{SEEN_ITEMS}:{chat_id}:{id}")
}

/// Marker written once the bootstrap fetch of a subscription is done.
pub fn first_fetch(chat_id: i64, id: Uuid) -> String {
    format!("{FIRST_FETCH}:{chat_id}:{id}")
}

/// Prefix matching every subscription record.
pub fn all_subscriptions_prefix() -> String {
    format!("{SUBSCRIPTION}:")
}

/// Prefix matching the subscription records of one chat.
pub fn chat_subscriptions_prefix(chat_id: i64) -> String {
    format!("{SUBSCRIPTION}:{chat_id}:")
}
