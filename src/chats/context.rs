//! Per-chat conversation state.

use url::Url;

use crate::feed::Feed;
use crate::subscription::Subscription;

/// Which wizard a chat is in. Derived from [`Wizard`], never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    None,
    Subscribing,
    Unsubscribing,
}

impl std::fmt::Display for ChatAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Subscribing => "subscribing",
            Self::Unsubscribing => "unsubscribing",
        };
        write!(f, "{s}")
    }
}

/// Steps of the `/subscribe` wizard, each carrying what was gathered so far.
///
/// Progresses AskUrl → AskAddPattern → EnterPattern (optional) → done.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeStep {
    AskUrl,
    AskAddPattern {
        url: Url,
        feed: Feed,
    },
    EnterPattern {
        url: Url,
        feed: Feed,
        suggestions: Vec<String>,
    },
}

/// The active wizard of a chat.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Wizard {
    #[default]
    Idle,
    Subscribing(SubscribeStep),
    /// Options are the chat's subscriptions when the wizard started.
    Unsubscribing { options: Vec<Subscription> },
}

impl Wizard {
    pub fn action(&self) -> ChatAction {
        match self {
            Self::Idle => ChatAction::None,
            Self::Subscribing(_) => ChatAction::Subscribing,
            Self::Unsubscribing { .. } => ChatAction::Unsubscribing,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatContext {
    pub chat_id: i64,
    pub wizard: Wizard,
}

impl ChatContext {
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            wizard: Wizard::Idle,
        }
    }

    pub fn action(&self) -> ChatAction {
        self.wizard.action()
    }
}
