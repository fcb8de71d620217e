//! Presence registry: which identities have live realtime connections

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::WsServerMessage;

pub type ConnectionId = Uuid;

/// A live realtime connection
#[derive(Clone)]
struct Connection {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<WsServerMessage>,
}

/// Maps each identity to its presence topic: every connection it has open.
pub struct PresenceRegistry {
    /// Map of identity -> Vec<Connection> (multiple sessions per user)
    topics: DashMap<String, Vec<Connection>>,
    /// Map of connection id -> identity for quick lookup
    owners: DashMap<ConnectionId, String>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            owners: DashMap::new(),
        }
    }

    /// Join `identity`'s topic
    pub fn join(&self, identity: &str, sender: mpsc::UnboundedSender<WsServerMessage>) -> ConnectionId {
        let id = Uuid::new_v4();

        self.topics
            .entry(identity.to_string())
            .or_insert_with(Vec::new)
            .push(Connection { id, sender });
        self.owners.insert(id, identity.to_string());

        tracing::info!("Connection joined: user={}, connection={}", identity, id);
        id
    }

    /// Leave the topic; returns false for an unknown connection.
    pub fn leave(&self, connection_id: ConnectionId) -> bool {
        let Some((_, identity)) = self.owners.remove(&connection_id) else {
            return false;
        };

        if let Some(mut connections) = self.topics.get_mut(&identity) {
            connections.retain(|c| c.id != connection_id);
        }
        self.topics.remove_if(&identity, |_, connections| connections.is_empty());

        tracing::info!("Connection left: user={}, connection={}", identity, connection_id);
        true
    }

    pub fn is_online(&self, identity: &str) -> bool {
        self.topics.get(identity).map(|c| !c.is_empty()).unwrap_or(false)
    }

    pub fn connection_count(&self, identity: &str) -> usize {
        self.topics.get(identity).map(|c| c.len()).unwrap_or(0)
    }

    pub fn online_user_count(&self) -> usize {
        self.topics.len()
    }

    /// Send to every connection of `identity`; returns how many accepted it.
    pub fn publish(&self, identity: &str, message: WsServerMessage) -> usize {
        let Some(connections) = self.topics.get(identity) else {
            tracing::debug!("Publish to offline user {}", identity);
            return 0;
        };

        let mut delivered = 0;
        for conn in connections.iter() {
            match conn.sender.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!("Failed to send to connection {}: {}", conn.id, e),
            }
        }
        delivered
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
