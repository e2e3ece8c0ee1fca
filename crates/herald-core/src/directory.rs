//! Connection directory.
//!
//! The directory knows which connections exist, which channels they occupy
//! and how to deliver events to them. The coordinator only talks to it
//! through [`ConnectionDirectory`]; [`LocalDirectory`] is the in-process
//! implementation used by the server.

use crate::channel::{validate_channel_name, Room};
use crate::message::OutboundEvent;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Counter mixed into generated IDs so two connections accepted within the
/// same clock tick still differ.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{timestamp:x}.{counter}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Directory errors.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// The connection is not (or no longer) registered.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The connection is already registered.
    #[error("Connection already registered: {0}")]
    AlreadyRegistered(ConnectionId),

    /// Maximum number of connections reached.
    #[error("Maximum connections reached")]
    MaxConnectionsReached,

    /// Maximum number of channels reached.
    #[error("Maximum channels reached")]
    MaxChannelsReached,

    /// Maximum channels per connection reached.
    #[error("Maximum channels per connection reached")]
    MaxChannelsPerConnectionReached,

    /// The backing store could not answer.
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Capability the coordinator uses to manage channel membership and reach
/// connections.
#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    /// Add a connection to a channel. Joining twice is not an error.
    async fn join(&self, connection: &ConnectionId, channel: &str) -> Result<(), DirectoryError>;

    /// Remove a connection from a channel.
    async fn leave_room(
        &self,
        connection: &ConnectionId,
        channel: &str,
    ) -> Result<(), DirectoryError>;

    /// Connections currently in a channel, in join order.
    async fn occupants(&self, channel: &str) -> Result<Vec<ConnectionId>, DirectoryError>;

    /// Whether a connection currently occupies a channel.
    async fn is_member(&self, connection: &ConnectionId, channel: &str) -> bool;

    /// Channels a connection currently occupies.
    async fn channels_of(&self, connection: &ConnectionId) -> Vec<String>;

    /// Deliver an event to one connection. Unknown connections are ignored.
    async fn send(&self, connection: &ConnectionId, event: OutboundEvent);

    /// Deliver an event to every occupant of a channel except `except`.
    ///
    /// Returns the number of connections the event was handed to.
    async fn broadcast(
        &self,
        channel: &str,
        event: OutboundEvent,
        except: Option<&ConnectionId>,
    ) -> usize;
}

/// Local directory configuration.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Maximum number of registered connections.
    pub max_connections: usize,
    /// Maximum number of occupied channels.
    pub max_channels: usize,
    /// Maximum channels per connection.
    pub max_channels_per_connection: usize,
    /// Outbound queue length per connection.
    pub outbound_capacity: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
            max_channels: 10_000,
            max_channels_per_connection: 100,
            outbound_capacity: 1024,
        }
    }
}

/// Registered connection.
struct ConnectionEntry {
    sender: mpsc::Sender<OutboundEvent>,
    channels: HashSet<String>,
}

/// In-process connection directory.
///
/// Lock order is always `connections` before `rooms`.
pub struct LocalDirectory {
    /// Registered connections.
    connections: DashMap<ConnectionId, ConnectionEntry>,
    /// Occupied channels indexed by name.
    rooms: DashMap<String, Room>,
    /// Configuration.
    config: DirectoryConfig,
}

impl LocalDirectory {
    /// Create a directory with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DirectoryConfig::default())
    }

    /// Create a directory with custom configuration.
    #[must_use]
    pub fn with_config(config: DirectoryConfig) -> Self {
        info!("Creating connection directory with config: {:?}", config);
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            config,
        }
    }

    /// Register a connection and obtain the receiving end of its outbound
    /// queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is taken or the connection limit is hit.
    pub fn register(
        &self,
        connection: ConnectionId,
    ) -> Result<mpsc::Receiver<OutboundEvent>, DirectoryError> {
        if self.connections.len() >= self.config.max_connections {
            return Err(DirectoryError::MaxConnectionsReached);
        }

        match self.connections.entry(connection) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(DirectoryError::AlreadyRegistered(entry.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (sender, receiver) = mpsc::channel(self.config.outbound_capacity);
                debug!(connection = %entry.key(), "Connection registered");
                entry.insert(ConnectionEntry {
                    sender,
                    channels: HashSet::new(),
                });
                Ok(receiver)
            }
        }
    }

    /// Drop a connection and any room membership it still holds.
    ///
    /// This is raw bookkeeping; channel-level side effects (presence,
    /// bus deactivation) belong to the coordinator's disconnect path.
    pub fn unregister(&self, connection: &ConnectionId) {
        if let Some((_, entry)) = self.connections.remove(connection) {
            for channel in &entry.channels {
                self.remove_from_room(connection, channel);
            }
            debug!(connection = %connection, "Connection unregistered");
        }
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn is_registered(&self, connection: &ConnectionId) -> bool {
        self.connections.contains_key(connection)
    }

    /// Number of occupants in a channel.
    #[must_use]
    pub fn occupant_count(&self, channel: &str) -> usize {
        self.rooms.get(channel).map(|r| r.len()).unwrap_or(0)
    }

    /// Get directory statistics.
    #[must_use]
    pub fn stats(&self) -> DirectoryStats {
        DirectoryStats {
            room_count: self.rooms.len(),
            connection_count: self.connections.len(),
            total_memberships: self.connections.iter().map(|c| c.channels.len()).sum(),
        }
    }

    fn remove_from_room(&self, connection: &ConnectionId, channel: &str) {
        if let Some(mut room) = self.rooms.get_mut(channel) {
            room.remove(connection);
            if room.is_empty() {
                drop(room);
                if self.rooms.remove_if(channel, |_, r| r.is_empty()).is_some() {
                    debug!(channel = %channel, "Deleted empty room");
                }
            }
        }
    }

    fn deliver(&self, connection: &ConnectionId, event: OutboundEvent) -> bool {
        let Some(sender) = self.connections.get(connection).map(|c| c.sender.clone()) else {
            trace!(connection = %connection, "Delivery to unknown connection dropped");
            return false;
        };

        match sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    connection = %connection,
                    channel = %event.channel,
                    event = %event.event,
                    "Outbound queue full, event dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(connection = %connection, "Delivery to closed connection dropped");
                false
            }
        }
    }
}

impl Default for LocalDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionDirectory for LocalDirectory {
    async fn join(&self, connection: &ConnectionId, channel: &str) -> Result<(), DirectoryError> {
        validate_channel_name(channel).map_err(DirectoryError::InvalidChannel)?;

        let mut entry = self
            .connections
            .get_mut(connection)
            .ok_or_else(|| DirectoryError::UnknownConnection(connection.clone()))?;

        if entry.channels.contains(channel) {
            return Ok(());
        }
        if entry.channels.len() >= self.config.max_channels_per_connection {
            return Err(DirectoryError::MaxChannelsPerConnectionReached);
        }
        if !self.rooms.contains_key(channel) && self.rooms.len() >= self.config.max_channels {
            return Err(DirectoryError::MaxChannelsReached);
        }

        self.rooms
            .entry(channel.to_string())
            .or_insert_with(|| {
                debug!(channel = %channel, "Creating new room");
                Room::new(channel)
            })
            .add(connection.clone());
        entry.channels.insert(channel.to_string());

        Ok(())
    }

    async fn leave_room(
        &self,
        connection: &ConnectionId,
        channel: &str,
    ) -> Result<(), DirectoryError> {
        let mut entry = self
            .connections
            .get_mut(connection)
            .ok_or_else(|| DirectoryError::UnknownConnection(connection.clone()))?;

        if entry.channels.remove(channel) {
            self.remove_from_room(connection, channel);
        }
        Ok(())
    }

    async fn occupants(&self, channel: &str) -> Result<Vec<ConnectionId>, DirectoryError> {
        Ok(self
            .rooms
            .get(channel)
            .map(|r| r.occupants().to_vec())
            .unwrap_or_default())
    }

    async fn is_member(&self, connection: &ConnectionId, channel: &str) -> bool {
        self.connections
            .get(connection)
            .map(|c| c.channels.contains(channel))
            .unwrap_or(false)
    }

    async fn channels_of(&self, connection: &ConnectionId) -> Vec<String> {
        self.connections
            .get(connection)
            .map(|c| c.channels.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn send(&self, connection: &ConnectionId, event: OutboundEvent) {
        self.deliver(connection, event);
    }

    async fn broadcast(
        &self,
        channel: &str,
        event: OutboundEvent,
        except: Option<&ConnectionId>,
    ) -> usize {
        let Some(occupants) = self.rooms.get(channel).map(|r| r.occupants().to_vec()) else {
            trace!(channel = %channel, "Broadcast to empty channel");
            return 0;
        };

        let mut delivered = 0;
        for connection in occupants.iter().filter(|c| Some(*c) != except) {
            if self.deliver(connection, event.clone()) {
                delivered += 1;
            }
        }
        trace!(channel = %channel, recipients = delivered, "Broadcast event");
        delivered
    }
}

/// Directory statistics.
#[derive(Debug, Clone)]
pub struct DirectoryStats {
    /// Number of occupied channels.
    pub room_count: usize,
    /// Number of registered connections.
    pub connection_count: usize,
    /// Total number of channel memberships.
    pub total_memberships: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(list: &[ConnectionId]) -> Vec<&str> {
        list.iter().map(ConnectionId::as_str).collect()
    }

    #[tokio::test]
    async fn test_join_leave() {
        let dir = LocalDirectory::new();
        let conn = ConnectionId::new("c1");
        let _rx = dir.register(conn.clone()).unwrap();

        dir.join(&conn, "room").await.unwrap();
        assert!(dir.is_member(&conn, "room").await);
        assert_eq!(dir.occupant_count("room"), 1);

        // Joining twice is idempotent
        dir.join(&conn, "room").await.unwrap();
        assert_eq!(dir.occupant_count("room"), 1);

        dir.leave_room(&conn, "room").await.unwrap();
        assert!(!dir.is_member(&conn, "room").await);
        assert_eq!(dir.stats().room_count, 0);
    }

    #[tokio::test]
    async fn test_occupants_in_join_order() {
        let dir = LocalDirectory::new();
        let mut receivers = Vec::new();
        for id in ["c3", "c1", "c2"] {
            let conn = ConnectionId::new(id);
            receivers.push(dir.register(conn.clone()).unwrap());
            dir.join(&conn, "room").await.unwrap();
        }

        let occupants = dir.occupants("room").await.unwrap();
        assert_eq!(ids(&occupants), ["c3", "c1", "c2"]);
    }

    #[tokio::test]
    async fn test_join_unknown_connection() {
        let dir = LocalDirectory::new();
        let result = dir.join(&"ghost".into(), "room").await;
        assert!(matches!(result, Err(DirectoryError::UnknownConnection(_))));
        assert_eq!(dir.occupant_count("room"), 0);
    }

    #[tokio::test]
    async fn test_register_twice() {
        let dir = LocalDirectory::new();
        let _rx = dir.register("c1".into()).unwrap();
        assert!(matches!(
            dir.register("c1".into()),
            Err(DirectoryError::AlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_channels_per_connection_limit() {
        let dir = LocalDirectory::with_config(DirectoryConfig {
            max_channels_per_connection: 1,
            ..Default::default()
        });
        let conn = ConnectionId::new("c1");
        let _rx = dir.register(conn.clone()).unwrap();

        dir.join(&conn, "a").await.unwrap();
        assert!(matches!(
            dir.join(&conn, "b").await,
            Err(DirectoryError::MaxChannelsPerConnectionReached)
        ));
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let dir = LocalDirectory::new();
        let c1 = ConnectionId::new("c1");
        let c2 = ConnectionId::new("c2");
        let mut rx1 = dir.register(c1.clone()).unwrap();
        let mut rx2 = dir.register(c2.clone()).unwrap();
        dir.join(&c1, "room").await.unwrap();
        dir.join(&c2, "room").await.unwrap();

        let event = OutboundEvent::new("client-typing", "room", json!({"who": "c1"}));
        let count = dir.broadcast("room", event.clone(), Some(&c1)).await;

        assert_eq!(count, 1);
        assert_eq!(rx2.try_recv().unwrap(), event);
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_vanished_connection() {
        let dir = LocalDirectory::new();
        let conn = ConnectionId::new("c1");
        let rx = dir.register(conn.clone()).unwrap();
        drop(rx);

        // Closed receiver and unknown connection are both silent no-ops
        dir.send(&conn, OutboundEvent::leave("room", "gone")).await;
        dir.send(&"ghost".into(), OutboundEvent::leave("room", "gone")).await;
    }

    #[tokio::test]
    async fn test_unregister_clears_rooms() {
        let dir = LocalDirectory::new();
        let conn = ConnectionId::new("c1");
        let _rx = dir.register(conn.clone()).unwrap();
        dir.join(&conn, "a").await.unwrap();
        dir.join(&conn, "b").await.unwrap();

        let mut channels = dir.channels_of(&conn).await;
        channels.sort();
        assert_eq!(channels, ["a", "b"]);

        dir.unregister(&conn);
        assert!(!dir.is_registered(&conn));
        assert_eq!(dir.stats().room_count, 0);
    }

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }
}
