//! Chat transport trait and message types.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ChannelError;

/// A text message received from a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub text: String,
}

impl IncomingMessage {
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            user_id: None,
            username: None,
            text: text.into(),
        }
    }

    pub fn with_user(mut self, user_id: i64, username: Option<String>) -> Self {
        self.user_id = Some(user_id);
        self.username = username;
        self
    }
}

/// Stream of inbound messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// How the receiving client should interpret the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    #[default]
    Plain,
    Html,
}

/// Reply keyboard offering quick answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyKeyboard {
    pub rows: Vec<Vec<String>>,
    /// Hide the keyboard once a button was used.
    pub one_time: bool,
}

impl ReplyKeyboard {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows,
            one_time: true,
        }
    }

    /// Lay out buttons left to right, `per_row` per row.
    pub fn grid<I, S>(buttons: I, per_row: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let buttons: Vec<String> = buttons.into_iter().map(Into::into).collect();
        let rows = buttons
            .chunks(per_row.max(1))
            .map(<[String]>::to_vec)
            .collect();
        Self::new(rows)
    }

    /// Numbered buttons `0..count`, three per row.
    pub fn numbered(count: usize) -> Self {
        Self::grid((0..count).map(|i| i.to_string()), 3)
    }
}

/// A message to deliver to a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    pub keyboard: Option<ReplyKeyboard>,
    pub parse_mode: ParseMode,
}

impl OutgoingMessage {
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            keyboard: None,
            parse_mode: ParseMode::Plain,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Option<ReplyKeyboard>) -> Self {
        self.keyboard = keyboard;
        self
    }

    pub fn with_parse_mode(mut self, parse_mode: ParseMode) -> Self {
        self.parse_mode = parse_mode;
        self
    }
}

/// Outbound side of a chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Deliver one message as-is.
    async fn send(&self, message: OutgoingMessage) -> Result<(), ChannelError>;

    /// Send plain text, optionally with a reply keyboard.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<ReplyKeyboard>,
    ) -> Result<(), ChannelError> {
        self.send(OutgoingMessage::new(chat_id, text).with_keyboard(keyboard))
            .await
    }

    /// Send text split into chunks of at most `max_chunk` characters.
    ///
    /// The keyboard is attached to the first chunk only. Stops at the first
    /// failed chunk.
    async fn send_chunked_message(
        &self,
        chat_id: i64,
        text: &str,
        max_chunk: usize,
        keyboard: Option<ReplyKeyboard>,
    ) -> Result<(), ChannelError> {
        let mut keyboard = keyboard;
        for chunk in chunk_message(text, max_chunk) {
            self.send(OutgoingMessage::new(chat_id, chunk).with_keyboard(keyboard.take()))
                .await?;
        }
        Ok(())
    }
}

/// Split `text` on line boundaries into chunks of at most `max_chunk` chars.
///
/// Lines longer than the limit are hard-split. Line order is preserved.
pub fn chunk_message(text: &str, max_chunk: usize) -> Vec<String> {
    let max_chunk = max_chunk.max(1);
    let mut chunks = Vec::new();
    let mut chunk = String::new();
    let mut chunk_len = 0;

    for line in text.split('\n') {
        let mut line: Vec<char> = line.chars().collect();

        if line.len() > max_chunk {
            if !chunk.is_empty() {
                chunks.push(std::mem::take(&mut chunk));
                chunk_len = 0;
            }
            while line.len() > max_chunk {
                let rest = line.split_off(max_chunk);
                chunks.push(line.into_iter().collect());
                line = rest;
            }
        }

        let separator = usize::from(!chunk.is_empty());
        if !chunk.is_empty() && chunk_len + separator + line.len() > max_chunk {
            chunks.push(std::mem::take(&mut chunk));
            chunk_len = 0;
        }

        if !chunk.is_empty() {
            chunk.push('\n');
            chunk_len += 1;
        }
        chunk_len += line.len();
        chunk.extend(line);
    }

    if !chunk.is_empty() {
        chunks.push(chunk);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<OutgoingMessage>>,
    }

    #[async_trait]
    impl ChatTransport for Recorder {
        async fn send(&self, message: OutgoingMessage) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_message("hello\nworld", 100), vec!["hello\nworld"]);
    }

    #[test]
    fn splits_on_line_boundaries() {
        let chunks = chunk_message("aaaa\nbbbb\ncccc", 9);
        assert_eq!(chunks, vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn hard_splits_long_lines_in_order() {
        let chunks = chunk_message("ab\ncdefghij\nk", 4);
        assert_eq!(chunks, vec!["ab", "cdef", "ghij", "k"]);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let chunks = chunk_message("äöüß", 2);
        assert_eq!(chunks, vec!["äö", "üß"]);
    }

    #[test]
    fn empty_text_sends_nothing() {
        assert!(chunk_message("", 10).is_empty());
    }

    #[test]
    fn numbered_keyboard_has_rows_of_three() {
        let kb = ReplyKeyboard::numbered(5);
        assert_eq!(kb.rows, vec![vec!["0", "1", "2"], vec!["3", "4"]]);
        assert!(kb.one_time);
        assert!(ReplyKeyboard::numbered(0).rows.is_empty());
    }

    #[tokio::test]
    async fn keyboard_only_on_first_chunk() {
        let recorder = Recorder::default();
        let kb = ReplyKeyboard::numbered(2);
        recorder
            .send_chunked_message(9, "aaaa\nbbbb\ncccc", 5, Some(kb.clone()))
            .await
            .unwrap();

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].keyboard, Some(kb));
        assert!(sent[1..].iter().all(|m| m.keyboard.is_none()));
        assert!(sent.iter().all(|m| m.chat_id == 9));
    }
}
