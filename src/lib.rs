//! feedgram — Telegram bot that delivers RSS/Atom feed items to chats.

pub mod channels;
pub mod chats;
pub mod config;
pub mod error;
pub mod feed;
pub mod poller;
pub mod store;
pub mod subscription;

pub use error::{Error, Result};
