//! Connection Hub
//!
//! Tracks live connections, their authenticated display names and the
//! broadcast groups they belong to. Implements the notification and identity
//! seams the lobby and session managers depend on.

use std::collections::{BTreeMap, BTreeSet};
use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::game::lobby::ConnectionId;
use crate::network::protocol::ServerMessage;

/// Notification delivery errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// No live connection with this id.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The connection's outbound queue is closed.
    #[error("connection {0} closed")]
    Closed(ConnectionId),

    /// The connection's outbound queue is full.
    #[error("connection {0} outbound queue full")]
    QueueFull(ConnectionId),
}

/// Delivers named events to one connection or to a group.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Send to a single connection.
    async fn send_to_connection(
        &self,
        connection: &ConnectionId,
        message: ServerMessage,
    ) -> Result<(), DispatchError>;

    /// Send to every member of a group. Returns the number of recipients.
    async fn send_to_group(&self, group: &str, message: ServerMessage) -> usize;

    /// Add a connection to a group. Failures are logged, never returned.
    async fn add_to_group(&self, connection: &ConnectionId, group: &str);

    /// Remove a connection from a group. Failures are logged, never returned.
    async fn remove_from_group(&self, connection: &ConnectionId, group: &str);
}

/// Resolves the display name a connection authenticated as.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Display name of a live connection.
    async fn display_name_of(&self, connection: &ConnectionId) -> Option<String>;
}

/// A registered connection.
struct ConnectionEntry {
    display_name: String,
    sender: mpsc::Sender<ServerMessage>,
}

/// In-process registry of connections and groups.
#[derive(Default)]
pub struct ConnectionHub {
    connections: RwLock<BTreeMap<ConnectionId, ConnectionEntry>>,
    groups: RwLock<BTreeMap<String, BTreeSet<ConnectionId>>>,
}

impl ConnectionHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection with its outbound queue.
    pub async fn register(
        &self,
        connection: ConnectionId,
        display_name: impl Into<String>,
        sender: mpsc::Sender<ServerMessage>,
    ) {
        let entry = ConnectionEntry {
            display_name: display_name.into(),
            sender,
        };
        self.connections.write().await.insert(connection, entry);
    }

    /// Drop a connection and all of its group memberships.
    pub async fn unregister(&self, connection: &ConnectionId) {
        self.connections.write().await.remove(connection);

        let mut groups = self.groups.write().await;
        for members in groups.values_mut() {
            members.remove(connection);
        }
        groups.retain(|_, members| !members.is_empty());
    }

    /// Members of a group.
    pub async fn members_of(&self, group: &str) -> Vec<ConnectionId> {
        self.groups
            .read()
            .await
            .get(group)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Every live connection (used for shutdown notices).
    pub async fn all_connections(&self) -> Vec<ConnectionId> {
        self.connections.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl NotificationDispatcher for ConnectionHub {
    async fn send_to_connection(
        &self,
        connection: &ConnectionId,
        message: ServerMessage,
    ) -> Result<(), DispatchError> {
        let connections = self.connections.read().await;
        let entry = connections
            .get(connection)
            .ok_or_else(|| DispatchError::UnknownConnection(connection.clone()))?;

        entry.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull(connection.clone()),
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed(connection.clone()),
        })
    }

    async fn send_to_group(&self, group: &str, message: ServerMessage) -> usize {
        let members = self.members_of(group).await;
        let mut delivered = 0;

        for member in &members {
            match self.send_to_connection(member, message.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(group, "Group delivery of {} failed: {}", message.event_name(), e),
            }
        }

        delivered
    }

    async fn add_to_group(&self, connection: &ConnectionId, group: &str) {
        if !self.connections.read().await.contains_key(connection) {
            warn!(%connection, group, "Cannot add unknown connection to group");
            return;
        }
        self.groups
            .write()
            .await
            .entry(group.to_string())
            .or_default()
            .insert(connection.clone());
        debug!(%connection, group, "Added to group");
    }

    async fn remove_from_group(&self, connection: &ConnectionId, group: &str) {
        let mut groups = self.groups.write().await;
        let now_empty = match groups.get_mut(group) {
            Some(members) => {
                members.remove(connection);
                members.is_empty()
            }
            None => return,
        };
        if now_empty {
            groups.remove(group);
        }
        debug!(%connection, group, "Removed from group");
    }
}

#[async_trait]
impl IdentityResolver for ConnectionHub {
    async fn display_name_of(&self, connection: &ConnectionId) -> Option<String> {
        self.connections
            .read()
            .await
            .get(connection)
            .map(|e| e.display_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::MessagePayload;

    fn notice(text: &str) -> ServerMessage {
        ServerMessage::LobbyClosedResponse(MessagePayload { message: text.into() })
    }

    #[tokio::test]
    async fn test_send_to_connection() {
        let hub = ConnectionHub::new();
        let (tx, mut rx) = mpsc::channel(4);
        let id = ConnectionId::from("c1");
        hub.register(id.clone(), "alice", tx).await;

        hub.send_to_connection(&id, notice("hi")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), notice("hi"));

        let missing = hub.send_to_connection(&ConnectionId::from("nope"), notice("x")).await;
        assert!(matches!(missing, Err(DispatchError::UnknownConnection(_))));
    }

    #[tokio::test]
    async fn test_group_broadcast() {
        let hub = ConnectionHub::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        let (tx3, mut rx3) = mpsc::channel(4);
        let (a, b, c) = (ConnectionId::from("a"), ConnectionId::from("b"), ConnectionId::from("c"));
        hub.register(a.clone(), "A", tx1).await;
        hub.register(b.clone(), "B", tx2).await;
        hub.register(c.clone(), "C", tx3).await;

        hub.add_to_group(&a, "arena").await;
        hub.add_to_group(&b, "arena").await;

        assert_eq!(hub.send_to_group("arena", notice("go")).await, 2);
        assert_eq!(rx1.recv().await.unwrap(), notice("go"));
        assert_eq!(rx2.recv().await.unwrap(), notice("go"));
        assert!(rx3.try_recv().is_err());

        hub.remove_from_group(&b, "arena").await;
        assert_eq!(hub.members_of("arena").await, vec![a.clone()]);
    }

    #[tokio::test]
    async fn test_unregister_clears_groups() {
        let hub = ConnectionHub::new();
        let (tx, _rx) = mpsc::channel(4);
        let id = ConnectionId::from("c1");
        hub.register(id.clone(), "alice", tx).await;
        hub.add_to_group(&id, "arena").await;

        assert_eq!(hub.display_name_of(&id).await.as_deref(), Some("alice"));

        hub.unregister(&id).await;
        assert!(hub.members_of("arena").await.is_empty());
        assert_eq!(hub.display_name_of(&id).await, None);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_full_queue_reported() {
        let hub = ConnectionHub::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = ConnectionId::from("c1");
        hub.register(id.clone(), "alice", tx).await;

        hub.send_to_connection(&id, notice("1")).await.unwrap();
        let result = hub.send_to_connection(&id, notice("2")).await;
        assert!(matches!(result, Err(DispatchError::QueueFull(_))));
    }
}
