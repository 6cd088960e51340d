//! Chat surface abstraction.
//!
//! The relay consumes the chat platform through [`ChatApi`]; the production
//! implementation is a Discord REST adapter. Tests use in-memory
//! implementations, so nothing above this module knows about Discord beyond
//! message-length limits and mention syntax.

mod discord;

pub use discord::DiscordChat;

use anyhow::Result;
use async_trait::async_trait;

/// An inbound message the bot should consider. Adapters filter out the
/// bot's own messages and other bots before these are surfaced.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    /// User ids mentioned in the message.
    pub mentions: Vec<String>,
}

/// A thread created for a session.
#[derive(Debug, Clone)]
pub struct ChatThread {
    pub id: String,
    pub name: String,
}

/// Coarse channel classification; the command surface only cares whether a
/// channel is a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    PublicThread,
    PrivateThread,
    Other,
}

impl ChannelKind {
    pub fn is_thread(self) -> bool {
        matches!(self, Self::PublicThread | Self::PrivateThread)
    }
}

/// Operations the relay needs from the chat platform.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Connect/authenticate. Called once before the poll loop starts.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// The bot's own user id, valid after `initialize`.
    fn user_id(&self) -> String;

    /// Post a message; returns the new message id.
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<String>;

    /// Edit an existing message in place.
    async fn edit_message(&self, channel_id: &str, message_id: &str, content: &str) -> Result<()>;

    /// Create a public thread off a channel.
    async fn create_thread(&self, channel_id: &str, name: &str) -> Result<ChatThread>;

    async fn channel_kind(&self, channel_id: &str) -> Result<ChannelKind>;

    /// Best-effort typing indicator.
    async fn trigger_typing(&self, channel_id: &str) -> Result<()> {
        Ok(())
    }

    /// Poll for new messages since the last call.
    async fn receive_messages(&self) -> Result<Vec<IncomingMessage>>;
}

/// Remove every mention of `user_id` from `content` and trim the remainder.
pub fn strip_mention(content: &str, user_id: &str) -> String {
    content
        .replace(&format!("<@{user_id}>"), "")
        .replace(&format!("<@!{user_id}>"), "")
        .trim()
        .to_string()
}

/// Render a user mention.
pub fn mention(user_id: &str) -> String {
    format!("<@{user_id}>")
}
