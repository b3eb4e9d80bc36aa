//! Support-channel operations on the chat platform.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{ChannelId, ChannelType, CreateChannel, GuildId};

use crate::error::RelayError;

/// Operations the relay needs from the chat platform. Discord in production;
/// tests substitute a recording fake.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Create the per-visitor support channel, returning its ID.
    async fn create_support_channel(&self, client_id: &str) -> Result<String, RelayError>;

    async fn send_to_channel(&self, channel_id: &str, content: &str) -> Result<(), RelayError>;

    async fn delete_channel(&self, channel_id: &str) -> Result<(), RelayError>;
}

pub struct DiscordChatClient {
    http: Arc<serenity::http::Http>,
    guild_id: GuildId,
    category_id: ChannelId,
}

impl DiscordChatClient {
    pub fn new(http: Arc<serenity::http::Http>, guild_id: u64, category_id: u64) -> Self {
        Self {
            http,
            guild_id: GuildId::new(guild_id),
            category_id: ChannelId::new(category_id),
        }
    }
}

#[async_trait]
impl ChatClient for DiscordChatClient {
    async fn create_support_channel(&self, client_id: &str) -> Result<String, RelayError> {
        let builder = CreateChannel::new(format!("support-{client_id}"))
            .kind(ChannelType::Text)
            .category(self.category_id)
            .topic(format!("Support conversation with {client_id}"));

        let channel = self
            .guild_id
            .create_channel(&self.http, builder)
            .await
            .map_err(|e| RelayError::ChannelCreate(e.to_string()))?;

        Ok(channel.id.to_string())
    }

    async fn send_to_channel(&self, channel_id: &str, content: &str) -> Result<(), RelayError> {
        let channel_id: u64 = channel_id
            .parse()
            .map_err(|_| RelayError::Upstream(format!("bad channel id {channel_id}")))?;
        ChannelId::new(channel_id)
            .say(&self.http, content)
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        Ok(())
    }

    async fn delete_channel(&self, channel_id: &str) -> Result<(), RelayError> {
        let channel_id: u64 = channel_id
            .parse()
            .map_err(|_| RelayError::Upstream(format!("bad channel id {channel_id}")))?;
        ChannelId::new(channel_id)
            .delete(&self.http)
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        Ok(())
    }
}
