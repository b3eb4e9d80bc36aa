//! Message routing between visitor connections and support channels.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use relay_common::ServerEnvelope;

use crate::blocklist::BlockRegistry;
use crate::error::RelayError;
use crate::history::HistoryLog;
use crate::models::block::BlockStatus;
use crate::models::history::Direction;

use super::chat::ChatClient;
use super::registry::{ConnectionRegistry, MappingAction, OutboundFrame};

/// Messages a visitor may send per [`RATE_WINDOW`].
const MESSAGE_RATE_LIMIT: usize = 5;
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Grace period between the close notice and the actual close frame, so the
/// notice reaches the browser first.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// One-time notice sent after the support channel is first created.
const TICKET_CREATED_NOTICE: &str =
    "Your message has been delivered. A staff member will reply here shortly.";

pub struct ChannelRelay {
    pub registry: Arc<ConnectionRegistry>,
    chat: Arc<dyn ChatClient>,
    blocks: BlockRegistry,
    history: HistoryLog,
    /// Recent send instants per client, for the per-connection throttle.
    recent_sends: DashMap<String, Mutex<VecDeque<Instant>>>,
}

impl ChannelRelay {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        chat: Arc<dyn ChatClient>,
        blocks: BlockRegistry,
        history: HistoryLog,
    ) -> Self {
        Self {
            registry,
            chat,
            blocks,
            history,
            recent_sends: DashMap::new(),
        }
    }

    /// Relay a visitor message to their support channel, creating the channel
    /// on first contact. Concurrent first messages queue behind a single
    /// creation; exactly one creation notice is sent per channel.
    pub async fn on_visitor_message(&self, client_id: &str, text: &str) -> Result<(), RelayError> {
        let identity = self
            .registry
            .identity(client_id)
            .ok_or(RelayError::Unauthenticated)?;

        // Blocks are re-checked on every message, not just at connect.
        if let BlockStatus::Blocked {
            until,
            reason,
            permanent,
        } = self.blocks.check(&identity.id).await?
        {
            return Err(RelayError::Blocked {
                until,
                reason,
                permanent,
            });
        }

        if !self.within_rate_limit(client_id) {
            return Err(RelayError::RateLimited);
        }

        match self.registry.begin_mapping(client_id, text.to_string()) {
            MappingAction::Queued => Ok(()),
            MappingAction::Forward(channel_id) => {
                self.deliver(client_id, &identity.id, &channel_id, text).await
            }
            MappingAction::Create => {
                let channel_id = match self.chat.create_support_channel(client_id).await {
                    Ok(channel_id) => channel_id,
                    Err(err) => {
                        // Release the placeholder so the next message retries.
                        let dropped = self.registry.abort_mapping(client_id);
                        tracing::error!(
                            %client_id,
                            dropped = dropped.len(),
                            %err,
                            "support channel creation failed"
                        );
                        self.notify(client_id, ServerEnvelope::error(
                            "Could not reach support right now. Please try again.",
                        ));
                        return Err(err);
                    }
                };

                let pending = self.registry.complete_mapping(client_id, &channel_id);
                tracing::info!(%client_id, %channel_id, queued = pending.len(), "support channel created");

                for queued in pending {
                    self.deliver(client_id, &identity.id, &channel_id, &queued)
                        .await?;
                }
                self.notify(client_id, ServerEnvelope::notice(TICKET_CREATED_NOTICE));
                Ok(())
            }
        }
    }

    /// Forward one message to the support channel, archive it, and echo it
    /// back to the visitor.
    async fn deliver(
        &self,
        client_id: &str,
        subject_id: &str,
        channel_id: &str,
        text: &str,
    ) -> Result<(), RelayError> {
        self.history
            .append(subject_id, client_id, text, Direction::Visitor)
            .await?;
        self.chat
            .send_to_channel(channel_id, &format!("**User {client_id}**: {text}"))
            .await?;
        self.notify(client_id, ServerEnvelope::echo(text));
        Ok(())
    }

    /// Relay a staff reply from a support channel to the mapped visitor.
    /// With no live mapping the reply is dropped and the caller is told.
    pub async fn on_support_message(
        &self,
        channel_id: &str,
        author: &str,
        text: &str,
    ) -> Result<(), RelayError> {
        let Some(client_id) = self.registry.client_for_channel(channel_id) else {
            return Err(RelayError::TargetOffline {
                channel_id: channel_id.to_string(),
            });
        };

        if let Some(identity) = self.registry.identity(&client_id) {
            self.history
                .append(&identity.id, author, text, Direction::Support)
                .await?;
        }

        self.notify(&client_id, ServerEnvelope::support(author, text));
        Ok(())
    }

    /// Close a ticket from the support side: notify the visitor, close their
    /// socket after a grace period, tear down the mapping, then delete the
    /// channel. Ordering matters; the notice must precede the close frame.
    pub async fn on_close_command(&self, channel_id: &str) -> Result<(), RelayError> {
        let client_id = self.registry.client_for_channel(channel_id);

        if let Some(client_id) = &client_id {
            self.notify(
                client_id,
                ServerEnvelope::status("This support ticket has been closed by our staff."),
            );
            self.registry.send(
                client_id,
                OutboundFrame::Close {
                    code: 1000,
                    delay: Some(CLOSE_GRACE),
                },
            );
            self.registry.remove_mapping_by_client(client_id);
        } else {
            self.registry.remove_mapping_by_channel(channel_id);
        }

        self.chat.delete_channel(channel_id).await?;
        tracing::info!(%channel_id, client_id = ?client_id, "support ticket closed");
        Ok(())
    }

    /// Clean up after a visitor connection ends. The support channel stays
    /// so staff keep their context; only the live routing is dropped.
    pub fn on_connection_closed(&self, client_id: &str) {
        self.registry.unregister(client_id);
        self.recent_sends.remove(client_id);
        if let Some(channel_id) = self.registry.remove_mapping_by_client(client_id) {
            tracing::debug!(%client_id, %channel_id, "visitor disconnected, channel kept");
        }
    }

    /// Best-effort envelope delivery; failures are logged, not propagated.
    pub fn notify(&self, client_id: &str, envelope: ServerEnvelope) {
        if !self
            .registry
            .send(client_id, OutboundFrame::Envelope(envelope))
        {
            tracing::debug!(%client_id, "dropping envelope for offline client");
        }
    }

    /// Sliding-window throttle over the last [`RATE_WINDOW`].
    fn within_rate_limit(&self, client_id: &str) -> bool {
        let now = Instant::now();
        let entry = self
            .recent_sends
            .entry(client_id.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut sends = entry.lock();
        while let Some(front) = sends.front() {
            if now.duration_since(*front) > RATE_WINDOW {
                sends.pop_front();
            } else {
                break;
            }
        }
        if sends.len() >= MESSAGE_RATE_LIMIT {
            return false;
        }
        sends.push_back(now);
        true
    }
}
