//! Discord bot: relays staff replies and handles moderation commands.

pub mod commands;

use std::sync::Arc;

use serenity::all::{
    Client, Context, EventHandler, GatewayIntents, Message, Permissions, Ready, RoleId,
};
use serenity::async_trait;

use crate::blocklist::BlockRegistry;
use crate::config::Config;
use crate::error::RelayError;
use crate::history::HistoryLog;
use crate::relay::service::ChannelRelay;

use commands::ParseOutcome;

struct Handler {
    relay: Arc<ChannelRelay>,
    blocks: BlockRegistry,
    history: HistoryLog,
    config: Arc<Config>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(bot = %ready.user.name, "connected to Discord");
    }

    async fn message(&self, ctx: Context, msg: Message) {
        // The bot's own relayed messages come back through this event.
        if msg.author.bot {
            return;
        }

        let channel_id = msg.channel_id.to_string();

        // A mapped support channel: staff text goes to the visitor.
        if self.relay.registry.client_for_channel(&channel_id).is_some() {
            if msg.content.trim() == "/ticketclose" {
                if let Err(err) = self.relay.on_close_command(&channel_id).await {
                    tracing::error!(%channel_id, %err, "failed to close ticket");
                    reply(&ctx, &msg, "Failed to close this ticket.").await;
                }
                return;
            }

            match self
                .relay
                .on_support_message(&channel_id, &msg.author.name, &msg.content)
                .await
            {
                Ok(()) => {}
                Err(RelayError::TargetOffline { .. }) => {
                    tracing::warn!(%channel_id, "visitor went offline, reply dropped");
                }
                Err(err) => {
                    tracing::error!(%channel_id, %err, "failed to relay staff reply");
                }
            }
            return;
        }

        // The privileged channel: moderation commands.
        if msg.channel_id.get() == self.config.support_channel_id
            && msg.content.starts_with('/')
        {
            // Capability is checked before the command is even parsed.
            // Gateway message events carry no computed permissions, so
            // administrator capability is derived from the guild role table.
            let is_admin = match msg.guild_id {
                Some(guild_id) => match guild_id.to_partial_guild(&ctx.http).await {
                    Ok(guild) => {
                        let member_roles = msg
                            .member
                            .as_deref()
                            .map(|m| m.roles.as_slice())
                            .unwrap_or(&[]);
                        has_admin_capability(
                            guild.owner_id == msg.author.id,
                            member_roles,
                            guild.roles.iter().map(|(id, role)| (*id, role.permissions)),
                        )
                    }
                    Err(err) => {
                        tracing::error!(%err, "failed to fetch guild for capability check");
                        false
                    }
                },
                None => false,
            };
            if !is_admin {
                reply(&ctx, &msg, "You need administrator permissions to use moderation commands.")
                    .await;
                return;
            }

            match commands::parse(&msg.content) {
                ParseOutcome::Command(command) => {
                    let moderator = msg.author.name.clone();
                    match commands::execute(command, &self.blocks, &self.history, &moderator).await
                    {
                        Ok(chunks) => {
                            for chunk in chunks {
                                reply(&ctx, &msg, &chunk).await;
                            }
                        }
                        Err(err) => {
                            tracing::error!(%err, "moderation command failed");
                            reply(&ctx, &msg, "Command failed; see server logs.").await;
                        }
                    }
                }
                ParseOutcome::Usage(usage) => reply(&ctx, &msg, usage).await,
                ParseOutcome::Unknown => {
                    reply(
                        &ctx,
                        &msg,
                        "Unknown command. Available: /mute, /unmute, /ban, /unban, /blockstatus, /showhistory",
                    )
                    .await
                }
            }
        }
    }
}

/// The guild owner always qualifies; everyone else needs a held role that
/// carries the administrator permission.
fn has_admin_capability(
    is_owner: bool,
    member_roles: &[RoleId],
    guild_roles: impl IntoIterator<Item = (RoleId, Permissions)>,
) -> bool {
    is_owner
        || guild_roles
            .into_iter()
            .any(|(id, permissions)| permissions.administrator() && member_roles.contains(&id))
}

async fn reply(ctx: &Context, msg: &Message, content: &str) {
    if let Err(err) = msg.channel_id.say(&ctx.http, content).await {
        tracing::error!(%err, "failed to send bot reply");
    }
}

/// Start the bot. Blocks until the gateway connection ends.
pub async fn start_bot(
    config: Arc<Config>,
    relay: Arc<ChannelRelay>,
    blocks: BlockRegistry,
    history: HistoryLog,
) -> Result<(), serenity::Error> {
    // MESSAGE_CONTENT is a privileged intent; it must be enabled in the
    // Discord developer portal.
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = Handler {
        relay,
        blocks,
        history,
        config: config.clone(),
    };

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .await?;

    tracing::info!("starting Discord bot");
    client.start().await
}
