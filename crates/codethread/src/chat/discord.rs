//! Discord REST adapter.
//!
//! Speaks the plain HTTP API with bot-token auth and a polling receive
//! loop — no gateway connection. Polling covers the text channels of every
//! guild the bot is in plus their active threads, with an id set to
//! deduplicate across polls. The first poll only seeds that set so a
//! restart does not replay channel history.

use std::collections::HashSet;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use super::{ChannelKind, ChatApi, ChatThread, IncomingMessage};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Channel type constants from the Discord API.
const CHANNEL_GUILD_TEXT: u64 = 0;
const CHANNEL_PUBLIC_THREAD: u64 = 11;
const CHANNEL_PRIVATE_THREAD: u64 = 12;

/// Threads auto-archive after a day of inactivity.
const THREAD_AUTO_ARCHIVE_MINUTES: u64 = 1440;

/// Cap on guilds/channels polled per cycle to stay clear of rate limits.
const MAX_POLLED_GUILDS: usize = 5;
const MAX_POLLED_CHANNELS: usize = 10;
const POLL_MESSAGE_LIMIT: u8 = 10;

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: String,
    channel_id: String,
    author: DiscordUser,
    content: String,
    #[serde(default)]
    mentions: Vec<DiscordUser>,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct DiscordChannel {
    id: String,
    #[serde(rename = "type")]
    kind: u64,
}

#[derive(Debug, Deserialize)]
struct ActiveThreads {
    #[serde(default)]
    threads: Vec<DiscordChannel>,
}

/// Discord chat adapter using a bot token over REST.
pub struct DiscordChat {
    bot_token: String,
    http: reqwest::Client,
    bot_id: RwLock<Option<String>>,
    processed_ids: RwLock<HashSet<String>>,
    primed: RwLock<bool>,
}

impl DiscordChat {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            http: reqwest::Client::new(),
            bot_id: RwLock::new(None),
            processed_ids: RwLock::new(HashSet::new()),
            primed: RwLock::new(false),
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth())
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("discord GET {url} failed: {}", response.status());
        }
        Ok(response.json().await?)
    }

    async fn guild_ids(&self) -> Result<Vec<String>> {
        let guilds: Vec<serde_json::Value> = self
            .get_json(&format!("{DISCORD_API_BASE}/users/@me/guilds"))
            .await?;
        Ok(guilds
            .iter()
            .filter_map(|g| g["id"].as_str().map(String::from))
            .collect())
    }

    /// Text channels and active threads of a guild, in poll order.
    async fn pollable_channels(&self, guild_id: &str) -> Vec<String> {
        let mut out = Vec::new();

        match self
            .get_json::<Vec<DiscordChannel>>(&format!(
                "{DISCORD_API_BASE}/guilds/{guild_id}/channels"
            ))
            .await
        {
            Ok(channels) => out.extend(
                channels
                    .into_iter()
                    .filter(|c| c.kind == CHANNEL_GUILD_TEXT)
                    .map(|c| c.id),
            ),
            Err(err) => warn!("failed to list channels, guild_id={guild_id}, error={err}"),
        }

        match self
            .get_json::<ActiveThreads>(&format!(
                "{DISCORD_API_BASE}/guilds/{guild_id}/threads/active"
            ))
            .await
        {
            Ok(active) => out.extend(active.threads.into_iter().map(|t| t.id)),
            Err(err) => warn!("failed to list active threads, guild_id={guild_id}, error={err}"),
        }

        out
    }

    async fn channel_messages(&self, channel_id: &str) -> Result<Vec<DiscordMessage>> {
        self.get_json(&format!(
            "{DISCORD_API_BASE}/channels/{channel_id}/messages?limit={POLL_MESSAGE_LIMIT}"
        ))
        .await
    }
}

#[async_trait]
impl ChatApi for DiscordChat {
    async fn initialize(&self) -> Result<()> {
        let user: DiscordUser = self
            .get_json(&format!("{DISCORD_API_BASE}/users/@me"))
            .await
            .context("discord authentication")?;
        debug!("discord bot authenticated, user_id={}", user.id);
        *self.bot_id.write().await = Some(user.id);
        Ok(())
    }

    fn user_id(&self) -> String {
        self.bot_id
            .try_read()
            .ok()
            .and_then(|id| id.clone())
            .unwrap_or_default()
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<String> {
        let url = format!("{DISCORD_API_BASE}/channels/{channel_id}/messages");
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth())
            .json(&json!({ "content": content }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("discord send failed: {status} - {body}");
        }
        let data: serde_json::Value = response.json().await?;
        data["id"]
            .as_str()
            .map(String::from)
            .context("discord send response missing message id")
    }

    async fn edit_message(&self, channel_id: &str, message_id: &str, content: &str) -> Result<()> {
        let url = format!("{DISCORD_API_BASE}/channels/{channel_id}/messages/{message_id}");
        let response = self
            .http
            .patch(&url)
            .header("Authorization", self.auth())
            .json(&json!({ "content": content }))
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("discord edit failed: {}", response.status());
        }
        Ok(())
    }

    async fn create_thread(&self, channel_id: &str, name: &str) -> Result<ChatThread> {
        let url = format!("{DISCORD_API_BASE}/channels/{channel_id}/threads");
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth())
            .json(&json!({
                "name": name,
                "type": CHANNEL_PUBLIC_THREAD,
                "auto_archive_duration": THREAD_AUTO_ARCHIVE_MINUTES,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("discord thread creation failed: {status} - {body}");
        }
        let data: serde_json::Value = response.json().await?;
        let id = data["id"]
            .as_str()
            .context("discord thread response missing id")?;
        Ok(ChatThread {
            id: id.to_string(),
            name: name.to_string(),
        })
    }

    async fn channel_kind(&self, channel_id: &str) -> Result<ChannelKind> {
        let channel: DiscordChannel = self
            .get_json(&format!("{DISCORD_API_BASE}/channels/{channel_id}"))
            .await?;
        Ok(match channel.kind {
            CHANNEL_GUILD_TEXT => ChannelKind::Text,
            CHANNEL_PUBLIC_THREAD => ChannelKind::PublicThread,
            CHANNEL_PRIVATE_THREAD => ChannelKind::PrivateThread,
            _ => ChannelKind::Other,
        })
    }

    async fn trigger_typing(&self, channel_id: &str) -> Result<()> {
        let url = format!("{DISCORD_API_BASE}/channels/{channel_id}/typing");
        // typing is best-effort; errors are ignored
        let _ = self
            .http
            .post(&url)
            .header("Authorization", self.auth())
            .send()
            .await;
        Ok(())
    }

    async fn receive_messages(&self) -> Result<Vec<IncomingMessage>> {
        let bot_id = match self.bot_id.read().await.clone() {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };

        let guilds = match self.guild_ids().await {
            Ok(guilds) => guilds,
            Err(err) => {
                warn!("failed to list guilds: {err}");
                return Ok(Vec::new());
            }
        };

        let seed_only = !*self.primed.read().await;
        let mut new_messages = Vec::new();

        for guild_id in guilds.iter().take(MAX_POLLED_GUILDS) {
            for channel_id in self
                .pollable_channels(guild_id)
                .await
                .iter()
                .take(MAX_POLLED_CHANNELS)
            {
                let messages = match self.channel_messages(channel_id).await {
                    Ok(messages) => messages,
                    Err(err) => {
                        debug!("failed to poll channel {channel_id}: {err}");
                        continue;
                    }
                };

                for message in messages {
                    if message.author.id == bot_id || message.author.bot {
                        continue;
                    }
                    {
                        let mut processed = self.processed_ids.write().await;
                        if !processed.insert(message.id.clone()) {
                            continue;
                        }
                        // bound the dedup set
                        if processed.len() > 10_000 {
                            processed.clear();
                        }
                    }
                    if seed_only {
                        continue;
                    }
                    new_messages.push(IncomingMessage {
                        id: message.id,
                        channel_id: message.channel_id,
                        author_id: message.author.id,
                        content: message.content,
                        mentions: message.mentions.into_iter().map(|u| u.id).collect(),
                    });
                }
            }
        }

        if seed_only {
            *self.primed.write().await = true;
        }

        // the API returns newest first; hand them over oldest first
        new_messages.reverse();
        Ok(new_messages)
    }
}
