//! Chat handler — routes every inbound message through its chat's wizard.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::channels::{ChatTransport, IncomingMessage, ReplyKeyboard};
use crate::chats::command::Command;
use crate::chats::context::{ChatAction, ChatContext, SubscribeStep, Wizard};
use crate::feed::FeedParser;
use crate::subscription::SubscriptionRegistry;

/// Chunk size for long listings.
pub(crate) const MAX_CHUNK: usize = 4000;

pub(crate) const NO_SUBSCRIPTIONS: &str =
    "You have not added any subscription. Subscribe with /subscribe";

const IDLE_HINT: &str = "Enter a command to start an action (e.g. /subscribe)";

/// Drives the per-chat conversation state machines.
pub struct ChatHandler {
    pub(crate) registry: Arc<SubscriptionRegistry>,
    pub(crate) feeds: Arc<dyn FeedParser>,
    pub(crate) transport: Arc<dyn ChatTransport>,
    contexts: RwLock<HashMap<i64, Arc<Mutex<ChatContext>>>>,
}

impl ChatHandler {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        feeds: Arc<dyn FeedParser>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            registry,
            feeds,
            transport,
            contexts: RwLock::new(HashMap::new()),
        }
    }

    /// Context of `chat_id`, created idle on first use.
    async fn context(&self, chat_id: i64) -> Arc<Mutex<ChatContext>> {
        if let Some(ctx) = self.contexts.read().await.get(&chat_id) {
            return Arc::clone(ctx);
        }

        let mut contexts = self.contexts.write().await;
        Arc::clone(
            contexts
                .entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(ChatContext::new(chat_id)))),
        )
    }

    /// Current wizard of a chat.
    pub async fn current_action(&self, chat_id: i64) -> ChatAction {
        self.context(chat_id).await.lock().await.action()
    }

    /// Handle one inbound message. Messages of the same chat are serialized.
    pub async fn handle_message(&self, message: &IncomingMessage) {
        let ctx = self.context(message.chat_id).await;
        let mut ctx = ctx.lock().await;

        let wizard = std::mem::take(&mut ctx.wizard);
        let previous = wizard.action();
        let next = match Command::parse(&message.text) {
            Some(command) => {
                debug!(chat_id = message.chat_id, command = ?command, "Command received");
                self.run_command(message, command).await
            }
            None => self.continue_wizard(message.chat_id, wizard, &message.text).await,
        };

        if previous != next.action() {
            debug!(
                chat_id = message.chat_id,
                from = %previous,
                to = %next.action(),
                "Chat action changed"
            );
        }
        ctx.wizard = next;
    }

    async fn run_command(&self, message: &IncomingMessage, command: Command) -> Wizard {
        let chat_id = message.chat_id;
        match command {
            Command::Start => {
                let name = message.username.as_deref().unwrap_or("there");
                let text = format!(
                    "Hello {name}\n\n\
                     /subscribe = Subscribe to a new feed\n\
                     /unsubscribe = Unsubscribe from a feed\n\
                     /subscriptions = Get active subscriptions\n\
                     /cancel = Cancel the current action"
                );
                self.reply(chat_id, &text, None).await;
                Wizard::Idle
            }
            Command::Cancel => {
                self.reply(chat_id, "Previous action canceled", None).await;
                Wizard::Idle
            }
            Command::Subscribe => {
                self.reply(chat_id, "Enter a url", None).await;
                Wizard::Subscribing(SubscribeStep::AskUrl)
            }
            Command::Unsubscribe => self.start_unsubscribe(chat_id).await,
            Command::Subscriptions => {
                self.list_subscriptions(chat_id).await;
                Wizard::Idle
            }
        }
    }

    async fn continue_wizard(&self, chat_id: i64, wizard: Wizard, text: &str) -> Wizard {
        match wizard {
            Wizard::Idle => {
                self.reply(chat_id, IDLE_HINT, None).await;
                Wizard::Idle
            }
            Wizard::Subscribing(step) => self.continue_subscribe(chat_id, step, text).await,
            Wizard::Unsubscribing { options } => {
                self.continue_unsubscribe(chat_id, options, text).await
            }
        }
    }

    async fn list_subscriptions(&self, chat_id: i64) {
        let subscriptions = match self.registry.for_chat(chat_id).await {
            Ok(subs) => subs,
            Err(e) => {
                warn!(chat_id, error = %e, "Failed to load subscriptions");
                self.reply(chat_id, "Your subscriptions could not be loaded.", None)
                    .await;
                return;
            }
        };

        if subscriptions.is_empty() {
            self.reply(chat_id, NO_SUBSCRIPTIONS, None).await;
            return;
        }

        let mut text = String::from("Your subscriptions:\n");
        for subscription in &subscriptions {
            text.push_str(&format!("\n{subscription}"));
        }
        self.reply_chunked(chat_id, &text, None).await;
    }

    /// Send a reply; failures are logged and otherwise ignored.
    pub(crate) async fn reply(&self, chat_id: i64, text: &str, keyboard: Option<ReplyKeyboard>) {
        if let Err(e) = self.transport.send_message(chat_id, text, keyboard).await {
            warn!(chat_id, error = %e, "Failed to send reply");
        }
    }

    pub(crate) async fn reply_chunked(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<ReplyKeyboard>,
    ) {
        if let Err(e) = self
            .transport
            .send_chunked_message(chat_id, text, MAX_CHUNK, keyboard)
            .await
        {
            warn!(chat_id, error = %e, "Failed to send reply");
        }
    }
}
