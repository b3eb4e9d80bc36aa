//! Connection and channel-mapping tables.
//!
//! Uses `DashMap` for shard-level concurrency and `parking_lot::Mutex` per
//! mapping entry for non-poisoning, fast locking. The mapping entry doubles
//! as the mutual-exclusion point for channel creation: the first message
//! installs a `Creating` placeholder, and concurrent messages queue behind
//! it instead of racing to create a second channel.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use relay_common::ServerEnvelope;
use tokio::sync::mpsc;

use crate::models::identity::PublicIdentity;

/// A frame queued for delivery to one visitor connection.
#[derive(Debug)]
pub enum OutboundFrame {
    Envelope(ServerEnvelope),
    /// Close the socket with `code`, optionally after a delivery grace delay.
    Close { code: u16, delay: Option<Duration> },
}

/// Per-connection handle held in the registry.
pub struct ConnectionHandle {
    pub tx: mpsc::UnboundedSender<OutboundFrame>,
    /// Session identity bound at upgrade time; `None` for anonymous sockets.
    pub identity: Option<PublicIdentity>,
}

/// State of a client-to-channel mapping.
enum ChannelMapping {
    /// Channel creation is in flight; `pending` holds messages queued behind
    /// the first one.
    Creating { pending: Vec<String> },
    Ready(String),
}

/// What the caller should do with a visitor message, decided atomically.
#[derive(Debug, PartialEq, Eq)]
pub enum MappingAction {
    /// This message won the race; create the channel.
    Create,
    /// Creation is already in flight; the message was queued.
    Queued,
    /// The channel exists; forward to it.
    Forward(String),
}

pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionHandle>,
    client_to_channel: DashMap<String, Mutex<ChannelMapping>>,
    channel_to_client: DashMap<String, String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            client_to_channel: DashMap::new(),
            channel_to_client: DashMap::new(),
        }
    }

    // -- connections --------------------------------------------------------

    /// Register a connection. A reconnect with the same client ID replaces
    /// the previous sender.
    pub fn register(
        &self,
        client_id: &str,
        tx: mpsc::UnboundedSender<OutboundFrame>,
        identity: Option<PublicIdentity>,
    ) {
        self.connections
            .insert(client_id.to_string(), ConnectionHandle { tx, identity });
    }

    pub fn unregister(&self, client_id: &str) {
        self.connections.remove(client_id);
    }

    pub fn identity(&self, client_id: &str) -> Option<PublicIdentity> {
        self.connections
            .get(client_id)?
            .identity
            .clone()
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.connections.contains_key(client_id)
    }

    /// Queue a frame for a connection. Returns `false` if the client is not
    /// connected or its receiver is gone.
    pub fn send(&self, client_id: &str, frame: OutboundFrame) -> bool {
        match self.connections.get(client_id) {
            Some(handle) => handle.tx.send(frame).is_ok(),
            None => false,
        }
    }

    // -- channel mappings ----------------------------------------------------

    /// Route a visitor message: atomically decide whether it creates the
    /// channel, queues behind an in-flight creation, or forwards.
    pub fn begin_mapping(&self, client_id: &str, text: String) -> MappingAction {
        match self.client_to_channel.entry(client_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(Mutex::new(ChannelMapping::Creating {
                    pending: vec![text],
                }));
                MappingAction::Create
            }
            Entry::Occupied(slot) => {
                let mut mapping = slot.get().lock();
                match &mut *mapping {
                    ChannelMapping::Creating { pending } => {
                        pending.push(text);
                        MappingAction::Queued
                    }
                    ChannelMapping::Ready(channel_id) => MappingAction::Forward(channel_id.clone()),
                }
            }
        }
    }

    /// Install the created channel and drain the queued messages, oldest
    /// first. The reverse index is updated in the same call.
    pub fn complete_mapping(&self, client_id: &str, channel_id: &str) -> Vec<String> {
        let pending = match self.client_to_channel.get(client_id) {
            Some(entry) => {
                let mut mapping = entry.lock();
                match std::mem::replace(
                    &mut *mapping,
                    ChannelMapping::Ready(channel_id.to_string()),
                ) {
                    ChannelMapping::Creating { pending } => pending,
                    ChannelMapping::Ready(_) => Vec::new(),
                }
            }
            None => Vec::new(),
        };
        self.channel_to_client
            .insert(channel_id.to_string(), client_id.to_string());
        pending
    }

    /// Drop the placeholder after a failed creation so the next message can
    /// retry. Returns the messages that were queued behind it.
    pub fn abort_mapping(&self, client_id: &str) -> Vec<String> {
        match self.client_to_channel.remove(client_id) {
            Some((_, mapping)) => match mapping.into_inner() {
                ChannelMapping::Creating { pending } => pending,
                ChannelMapping::Ready(_) => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    pub fn channel_for_client(&self, client_id: &str) -> Option<String> {
        let entry = self.client_to_channel.get(client_id)?;
        let mapping = entry.lock();
        match &*mapping {
            ChannelMapping::Ready(channel_id) => Some(channel_id.clone()),
            ChannelMapping::Creating { .. } => None,
        }
    }

    pub fn client_for_channel(&self, channel_id: &str) -> Option<String> {
        self.channel_to_client
            .get(channel_id)
            .map(|entry| entry.clone())
    }

    /// Remove both directions of a mapping, keyed by client.
    /// Returns the mapped channel, if there was one.
    pub fn remove_mapping_by_client(&self, client_id: &str) -> Option<String> {
        let channel_id = match self.client_to_channel.remove(client_id) {
            Some((_, mapping)) => match mapping.into_inner() {
                ChannelMapping::Ready(channel_id) => Some(channel_id),
                ChannelMapping::Creating { .. } => None,
            },
            None => None,
        };
        if let Some(channel_id) = &channel_id {
            self.channel_to_client.remove(channel_id);
        }
        channel_id
    }

    /// Remove both directions of a mapping, keyed by channel.
    /// Returns the mapped client, if there was one.
    pub fn remove_mapping_by_channel(&self, channel_id: &str) -> Option<String> {
        let client_id = self
            .channel_to_client
            .remove(channel_id)
            .map(|(_, client_id)| client_id);
        if let Some(client_id) = &client_id {
            self.client_to_channel.remove(client_id);
        }
        client_id
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_wins_the_creation_race() {
        let registry = ConnectionRegistry::new();
        assert_eq!(
            registry.begin_mapping("user_a", "first".into()),
            MappingAction::Create
        );
        assert_eq!(
            registry.begin_mapping("user_a", "second".into()),
            MappingAction::Queued
        );
        assert_eq!(
            registry.begin_mapping("user_a", "third".into()),
            MappingAction::Queued
        );

        let pending = registry.complete_mapping("user_a", "chan_1");
        assert_eq!(pending, vec!["first", "second", "third"]);

        // Later messages forward directly.
        assert_eq!(
            registry.begin_mapping("user_a", "fourth".into()),
            MappingAction::Forward("chan_1".into())
        );
    }

    #[test]
    fn mapping_tables_stay_inverse() {
        let registry = ConnectionRegistry::new();
        registry.begin_mapping("user_a", "hi".into());
        registry.complete_mapping("user_a", "chan_1");

        assert_eq!(registry.channel_for_client("user_a").as_deref(), Some("chan_1"));
        assert_eq!(registry.client_for_channel("chan_1").as_deref(), Some("user_a"));

        assert_eq!(
            registry.remove_mapping_by_channel("chan_1").as_deref(),
            Some("user_a")
        );
        assert!(registry.channel_for_client("user_a").is_none());
        assert!(registry.client_for_channel("chan_1").is_none());
    }

    #[test]
    fn remove_by_client_clears_reverse_index() {
        let registry = ConnectionRegistry::new();
        registry.begin_mapping("user_a", "hi".into());
        registry.complete_mapping("user_a", "chan_1");

        assert_eq!(
            registry.remove_mapping_by_client("user_a").as_deref(),
            Some("chan_1")
        );
        assert!(registry.client_for_channel("chan_1").is_none());
    }

    #[test]
    fn abort_releases_the_placeholder() {
        let registry = ConnectionRegistry::new();
        registry.begin_mapping("user_a", "first".into());
        registry.begin_mapping("user_a", "second".into());

        let pending = registry.abort_mapping("user_a");
        assert_eq!(pending, vec!["first", "second"]);

        // The next message starts a fresh creation.
        assert_eq!(
            registry.begin_mapping("user_a", "retry".into()),
            MappingAction::Create
        );
    }

    #[test]
    fn channel_for_client_hides_in_flight_creation() {
        let registry = ConnectionRegistry::new();
        registry.begin_mapping("user_a", "hi".into());
        assert!(registry.channel_for_client("user_a").is_none());
    }

    #[test]
    fn reconnect_replaces_the_sender() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        registry.register("user_a", tx1, None);
        registry.register("user_a", tx2, None);

        assert!(registry.send("user_a", OutboundFrame::Envelope(ServerEnvelope::echo("hi"))));
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn send_to_unknown_client_reports_failure() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send("user_a", OutboundFrame::Envelope(ServerEnvelope::echo("hi"))));
    }
}
