//! Bot command parsing.

/// A recognised slash command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Subscribe,
    Unsubscribe,
    Cancel,
    Subscriptions,
}

impl Command {
    /// Parse a whole message as a command.
    ///
    /// The message must be exactly one command; a `@botname` suffix is accepted.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let name = text.strip_prefix('/')?;
        let name = name.split_once('@').map_or(name, |(name, _)| name);

        match name {
            "start" => Some(Self::Start),
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            "cancel" => Some(Self::Cancel),
            "subscriptions" => Some(Self::Subscriptions),
            _ => None,
        }
    }
}
