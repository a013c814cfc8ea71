//! Telegram channel — long-polls the Bot API for updates and sends replies.
//!
//! Native Rust Telegram Bot API implementation on top of reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};

use crate::channels::{ChatTransport, IncomingMessage, MessageStream, OutgoingMessage, ParseMode};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
pub const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates, in seconds.
const LONG_POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed getUpdates call.
const POLL_ERROR_DELAY: Duration = Duration::from_secs(5);

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    allowed_users: Vec<String>,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.bot_token, method)
    }

    /// Check if a username is in the allowed list.
    pub fn is_user_allowed(&self, username: &str) -> bool {
        self.allowed_users.iter().any(|u| u == "*" || u == username)
    }

    /// Start long-polling. Messages from users outside the allowlist are dropped.
    pub async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": LONG_POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_ERROR_DELAY).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(POLL_ERROR_DELAY).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(serde_json::Value::as_array)
                else {
                    continue;
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = uid + 1;
                    }

                    let Some(incoming) = parse_update(update) else {
                        continue;
                    };

                    let is_allowed = {
                        let user_id = incoming.user_id.map(|id| id.to_string());
                        let identities = incoming
                            .username
                            .as_deref()
                            .into_iter()
                            .chain(user_id.as_deref());
                        check_user_allowed(&allowed_users, identities)
                    };

                    if !is_allowed {
                        tracing::warn!(
                            chat_id = incoming.chat_id,
                            username = incoming.username.as_deref().unwrap_or("unknown"),
                            "Telegram: ignoring message from unauthorized user"
                        );
                        continue;
                    }

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    pub async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn post_message(&self, body: &serde_json::Value) -> Result<reqwest::Response, ChannelError> {
        self.client
            .post(self.api_url("sendMessage"))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ChatTransport for TelegramChannel {
    /// HTML messages that Telegram refuses to parse are retried as plain text.
    async fn send(&self, message: OutgoingMessage) -> Result<(), ChannelError> {
        let resp = self.post_message(&message_body(&message)).await?;
        let status = resp.status();

        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ChannelError::RateLimited {
                name: "telegram".into(),
            });
        }

        let err = resp.text().await.unwrap_or_default();
        if message.parse_mode == ParseMode::Plain || status != StatusCode::BAD_REQUEST {
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage returned {status}: {err}"),
            });
        }

        tracing::warn!(
            status = ?status,
            chat_id = message.chat_id,
            "Telegram sendMessage with HTML failed; retrying without parse_mode"
        );

        let plain = message.with_parse_mode(ParseMode::Plain);
        let plain_resp = self.post_message(&message_body(&plain)).await?;
        if !plain_resp.status().is_success() {
            let plain_status = plain_resp.status();
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage failed (html: {status}, plain: {plain_status} {plain_err})"),
            });
        }

        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(token: &SecretString, method: &str) -> String {
    format!(
        "https://api.telegram.org/bot{}/{method}",
        token.expose_secret()
    )
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Build the JSON body for `sendMessage`.
fn message_body(message: &OutgoingMessage) -> serde_json::Value {
    let mut body = serde_json::json!({
        "chat_id": message.chat_id,
        "text": message.text,
    });

    if message.parse_mode == ParseMode::Html {
        body["parse_mode"] = "HTML".into();
        body["disable_web_page_preview"] = false.into();
    }

    if let Some(keyboard) = &message.keyboard {
        let rows: Vec<Vec<serde_json::Value>> = keyboard
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|text| serde_json::json!({ "text": text }))
                    .collect()
            })
            .collect();
        body["reply_markup"] = serde_json::json!({
            "keyboard": rows,
            "one_time_keyboard": keyboard.one_time,
            "resize_keyboard": true,
        });
    }

    body
}

/// Extract a text message from a getUpdates entry.
fn parse_update(update: &serde_json::Value) -> Option<IncomingMessage> {
    let message = update.get("message")?;
    let text = message.get("text").and_then(serde_json::Value::as_str)?;
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(serde_json::Value::as_i64)?;

    let from = message.get("from");
    let user_id = from
        .and_then(|f| f.get("id"))
        .and_then(serde_json::Value::as_i64);
    let username = from
        .and_then(|f| f.get("username"))
        .and_then(serde_json::Value::as_str)
        .map(String::from);

    let mut incoming = IncomingMessage::new(chat_id, text);
    if let Some(user_id) = user_id {
        incoming = incoming.with_user(user_id, username);
    }
    Some(incoming)
}

// ── Tests ───────────────────────────────────────────────────────────
