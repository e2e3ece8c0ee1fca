//! Channel rooms.
//!
//! A room is the local occupant list of one channel, kept in join order so
//! that the oldest occupants can be found first.

use crate::directory::ConnectionId;
use tracing::debug;

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// Occupants of a single channel.
#[derive(Debug, Clone)]
pub struct Room {
    name: String,
    occupants: Vec<ConnectionId>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            occupants: Vec::new(),
        }
    }

    /// Number of occupants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.occupants.len()
    }

    /// Check if the room has no occupants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }

    /// Check if a connection occupies the room.
    #[must_use]
    pub fn contains(&self, connection: &ConnectionId) -> bool {
        self.occupants.contains(connection)
    }

    /// Add a connection at the back of the join order.
    ///
    /// Returns `false` if it was already an occupant; its position is kept.
    pub fn add(&mut self, connection: ConnectionId) -> bool {
        if self.contains(&connection) {
            return false;
        }
        debug!(channel = %self.name, connection = %connection, "Connection joined room");
        self.occupants.push(connection);
        true
    }

    /// Remove a connection.
    ///
    /// Returns `true` if it was an occupant.
    pub fn remove(&mut self, connection: &ConnectionId) -> bool {
        let before = self.occupants.len();
        self.occupants.retain(|c| c != connection);
        let removed = self.occupants.len() != before;
        if removed {
            debug!(channel = %self.name, connection = %connection, "Connection left room");
        }
        removed
    }

    /// Occupants, oldest first.
    #[must_use]
    pub fn occupants(&self) -> &[ConnectionId] {
        &self.occupants
    }
}
