//! Conversation state machine: per-chat wizards for managing subscriptions.

pub mod command;
pub mod context;
pub mod handler;
mod subscribe;
mod unsubscribe;

pub use command::Command;
pub use context::{ChatAction, ChatContext, SubscribeStep, Wizard};
pub use handler::ChatHandler;
