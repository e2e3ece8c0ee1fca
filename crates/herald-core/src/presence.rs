//! Presence tracking for Herald.
//!
//! Presence channels keep a roster of who is connected. Each entry belongs to
//! exactly one connection; several connections may share an identity when
//! the connection limit allows it.

use crate::directory::ConnectionId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// A member of one presence channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMember {
    /// Connection the entry belongs to.
    #[serde(rename = "socket_id")]
    pub connection_id: ConnectionId,
    /// Identity shared by all connections of the same user.
    #[serde(rename = "user_id")]
    pub identity: String,
    /// User-defined metadata.
    #[serde(rename = "user_info")]
    pub metadata: serde_json::Value,
    /// When the member joined, in milliseconds since the epoch.
    pub joined_at: u64,
}

impl PresenceMember {
    /// Create a new member.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        identity: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            connection_id,
            identity: identity.into(),
            metadata,
            joined_at: now,
        }
    }
}

/// Presence rosters for all presence channels.
#[derive(Debug, Default)]
pub struct PresenceRoster {
    /// Channel name to members, in join order.
    channels: DashMap<String, Vec<PresenceMember>>,
}

impl PresenceRoster {
    /// Create an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member to a channel.
    ///
    /// An existing entry for the same connection is replaced. Returns `true`
    /// if the member's identity was not present in the channel before.
    pub fn add(&self, channel: &str, member: PresenceMember) -> bool {
        let mut members = self.channels.entry(channel.to_string()).or_default();
        members.retain(|m| m.connection_id != member.connection_id);

        let is_new = !members.iter().any(|m| m.identity == member.identity);
        if is_new {
            debug!(channel = %channel, identity = %member.identity, "Presence: member joined");
        }
        members.push(member);
        is_new
    }

    /// Remove a connection's entry from a channel.
    ///
    /// Returns the removed member, if any.
    pub fn remove(&self, channel: &str, connection: &ConnectionId) -> Option<PresenceMember> {
        let mut members = self.channels.get_mut(channel)?;
        let index = members.iter().position(|m| &m.connection_id == connection)?;
        let member = members.remove(index);
        debug!(channel = %channel, identity = %member.identity, "Presence: member left");

        if members.is_empty() {
            drop(members);
            self.channels.remove_if(channel, |_, m| m.is_empty());
        }
        Some(member)
    }

    /// Members of a channel, in join order.
    #[must_use]
    pub fn members(&self, channel: &str) -> Vec<PresenceMember> {
        self.channels
            .get(channel)
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Distinct identities present in a channel.
    #[must_use]
    pub fn identities(&self, channel: &str) -> BTreeSet<String> {
        self.channels
            .get(channel)
            .map(|m| m.iter().map(|m| m.identity.clone()).collect())
            .unwrap_or_default()
    }

    /// Check if any connection with this identity is present.
    #[must_use]
    pub fn has_identity(&self, channel: &str, identity: &str) -> bool {
        self.channels
            .get(channel)
            .map(|m| m.iter().any(|m| m.identity == identity))
            .unwrap_or(false)
    }
}
