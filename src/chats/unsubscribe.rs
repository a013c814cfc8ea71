//! `/unsubscribe` wizard.

use tracing::{info, warn};

use crate::channels::ReplyKeyboard;
use crate::chats::context::Wizard;
use crate::chats::handler::{ChatHandler, NO_SUBSCRIPTIONS};
use crate::subscription::Subscription;

impl ChatHandler {
    /// Snapshot the chat's subscriptions and offer them for removal.
    pub(crate) async fn start_unsubscribe(&self, chat_id: i64) -> Wizard {
        let options = match self.registry.for_chat(chat_id).await {
            Ok(subs) => subs,
            Err(e) => {
                warn!(chat_id, error = %e, "Failed to load subscriptions");
                self.reply(chat_id, "Your subscriptions could not be loaded.", None)
                    .await;
                return Wizard::Idle;
            }
        };

        if options.is_empty() {
            self.reply(chat_id, NO_SUBSCRIPTIONS, None).await;
            return Wizard::Idle;
        }

        self.send_options(
            chat_id,
            "Enter or select the number you want to unsubscribe:\n",
            &options,
        )
        .await;
        Wizard::Unsubscribing { options }
    }

    pub(crate) async fn continue_unsubscribe(
        &self,
        chat_id: i64,
        options: Vec<Subscription>,
        text: &str,
    ) -> Wizard {
        let Some(selected) = select_option(&options, text).cloned() else {
            self.send_options(chat_id, "Please enter a valid option:\n", &options)
                .await;
            return Wizard::Unsubscribing { options };
        };

        if let Err(e) = self.registry.remove(&selected).await {
            warn!(chat_id, subscription_id = %selected.id, error = %e, "Failed to remove subscription");
            self.reply(chat_id, "Subscription could not be removed.", None)
                .await;
            return Wizard::Unsubscribing { options };
        }

        info!(chat_id, url = %selected.url, "Chat unsubscribed");
        self.reply(chat_id, &format!("Unsubscribed from {}", selected.url), None)
            .await;
        Wizard::Idle
    }

    async fn send_options(&self, chat_id: i64, header: &str, options: &[Subscription]) {
        let mut text = header.to_string();
        for (i, subscription) in options.iter().enumerate() {
            text.push_str(&format!("\n{i} - {}", subscription.url));
        }
        self.reply_chunked(chat_id, &text, Some(ReplyKeyboard::numbered(options.len())))
            .await;
    }
}

/// Match `text` as an index, or exactly against a subscription URL.
fn select_option<'a>(options: &'a [Subscription], text: &str) -> Option<&'a Subscription> {
    let text = text.trim();
    if let Ok(index) = text.parse::<usize>() {
        return options.get(index);
    }
    options.iter().find(|s| s.url.as_str() == text)
}
