//! `/subscribe` wizard steps.

use tracing::{info, warn};
use url::Url;

use crate::channels::ReplyKeyboard;
use crate::chats::context::{SubscribeStep, Wizard};
use crate::chats::handler::ChatHandler;
use crate::feed::{Feed, http::validate_url};
use crate::subscription::Subscription;

const PATTERN_PROMPT: &str = "Enter the pattern (e. g. 'polls' to only receive items with title, url or description containing 'polls')\n\nYou can add multiple words separated by a comma.";

impl ChatHandler {
    pub(crate) async fn continue_subscribe(
        &self,
        chat_id: i64,
        step: SubscribeStep,
        text: &str,
    ) -> Wizard {
        match step {
            SubscribeStep::AskUrl => self.receive_url(chat_id, text).await,
            SubscribeStep::AskAddPattern { url, feed } => {
                if text.trim().eq_ignore_ascii_case("yes") {
                    self.ask_pattern(chat_id, url, feed).await
                } else {
                    let retry = SubscribeStep::AskAddPattern {
                        url: url.clone(),
                        feed: feed.clone(),
                    };
                    self.finalize(chat_id, url, feed, String::new(), retry).await
                }
            }
            SubscribeStep::EnterPattern {
                url,
                feed,
                suggestions,
            } => {
                let pattern = pick_suggestion(&suggestions, text)
                    .unwrap_or_else(|| text.trim().to_string());
                let retry = SubscribeStep::EnterPattern {
                    url: url.clone(),
                    feed: feed.clone(),
                    suggestions,
                };
                self.finalize(chat_id, url, feed, pattern, retry).await
            }
        }
    }

    async fn receive_url(&self, chat_id: i64, text: &str) -> Wizard {
        let ask_again = Wizard::Subscribing(SubscribeStep::AskUrl);

        let url = match Url::parse(text.trim()) {
            Ok(url) if validate_url(&url).is_ok() => url,
            _ => {
                self.reply(chat_id, "Please enter a valid url", None).await;
                return ask_again;
            }
        };

        let feed = match self.feeds.fetch(&url).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!(chat_id, url = %url, error = %e, "Feed validation failed");
                self.reply(
                    chat_id,
                    "Could not receive data from feed, please enter a valid url",
                    None,
                )
                .await;
                return ask_again;
            }
        };

        self.reply(
            chat_id,
            "Do you want to add a search pattern?",
            Some(ReplyKeyboard::grid(["Yes", "No"], 2)),
        )
        .await;

        Wizard::Subscribing(SubscribeStep::AskAddPattern { url, feed })
    }

    async fn ask_pattern(&self, chat_id: i64, url: Url, feed: Feed) -> Wizard {
        let suggestions = self.pattern_suggestions(chat_id).await;

        if suggestions.is_empty() {
            self.reply(chat_id, PATTERN_PROMPT, None).await;
        } else {
            let mut text = format!(
                "{PATTERN_PROMPT}\n\nYou can enter the number of one of the existing pattern:\n"
            );
            for (i, pattern) in suggestions.iter().enumerate() {
                text.push_str(&format!("\n{i} - {pattern}"));
            }
            self.reply_chunked(
                chat_id,
                &text,
                Some(ReplyKeyboard::numbered(suggestions.len())),
            )
            .await;
        }

        Wizard::Subscribing(SubscribeStep::EnterPattern {
            url,
            feed,
            suggestions,
        })
    }

    /// Distinct non-empty patterns of the chat, in subscription order.
    async fn pattern_suggestions(&self, chat_id: i64) -> Vec<String> {
        let subscriptions = match self.registry.for_chat(chat_id).await {
            Ok(subs) => subs,
            Err(e) => {
                warn!(chat_id, error = %e, "Failed to load pattern suggestions");
                return Vec::new();
            }
        };

        let mut patterns: Vec<String> = Vec::new();
        for subscription in subscriptions {
            let pattern = subscription.search_pattern;
            if !pattern.is_empty() && !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
        patterns
    }

    /// Persist the subscription. On failure the chat stays on `retry`.
    async fn finalize(
        &self,
        chat_id: i64,
        url: Url,
        feed: Feed,
        pattern: String,
        retry: SubscribeStep,
    ) -> Wizard {
        let subscription = Subscription::new(chat_id, url, pattern);

        if let Err(e) = self.registry.add(subscription.clone()).await {
            warn!(chat_id, url = %subscription.url, error = %e, "Failed to add subscription");
            self.reply(chat_id, "Subscription could not be added.", None)
                .await;
            return Wizard::Subscribing(retry);
        }

        info!(chat_id, url = %subscription.url, "Chat subscribed");
        self.reply(
            chat_id,
            &format!("Subscribed to {} ({})", subscription.url, feed.title),
            None,
        )
        .await;
        Wizard::Idle
    }
}

/// Resolve `text` as an index into `suggestions`.
fn pick_suggestion(suggestions: &[String], text: &str) -> Option<String> {
    let index: usize = text.trim().parse().ok()?;
    suggestions.get(index).cloned()
}
