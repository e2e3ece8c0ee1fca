//! Event and payload types exchanged with connections and the bus.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Names of events emitted by the gateway itself.
pub mod events {
    /// A join request was rejected.
    pub const SUBSCRIPTION_ERROR: &str = "subscription_error";
    /// The connection was removed from a channel.
    pub const LEAVE: &str = "leave";
    /// Sent to a presence joiner with the current member list.
    pub const PRESENCE_SUBSCRIBED: &str = "presence:subscribed";
    /// Sent to existing members when a new identity joins.
    pub const PRESENCE_JOINING: &str = "presence:joining";
    /// Sent to remaining members when an identity is gone.
    pub const PRESENCE_LEAVING: &str = "presence:leaving";
}

/// Reasons carried by `leave` events.
pub mod reasons {
    /// Evicted by a newer connection of the same identity.
    pub const REPLACED: &str = "replaced";
    /// The client asked to leave.
    pub const UNSUBSCRIBED: &str = "unsubscribed";
    /// The connection went away.
    pub const DISCONNECT: &str = "disconnect";
}

/// Status reported when authorization succeeds without usable channel data.
pub const SERVER_ERROR_STATUS: u16 = 500;

/// Best-effort structured parse of a payload.
///
/// Strings are parsed as JSON. Anything that does not parse is handed back
/// unchanged in `Err` so the caller can decide whether the raw value is
/// still useful. Non-string values are already structured.
///
/// # Errors
///
/// Returns the original value when it is a string that is not valid JSON.
pub fn try_parse(payload: Value) -> Result<Value, Value> {
    match payload {
        Value::String(raw) => serde_json::from_str(&raw).map_err(|_| Value::String(raw)),
        structured => Ok(structured),
    }
}

/// An event delivered to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    /// Event name.
    pub event: String,
    /// Channel the event belongs to.
    pub channel: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl OutboundEvent {
    /// Create a new event.
    #[must_use]
    pub fn new(event: impl Into<String>, channel: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            channel: channel.into(),
            data,
        }
    }

    /// A rejected join.
    #[must_use]
    pub fn subscription_error(channel: impl Into<String>, status: u16) -> Self {
        Self::new(events::SUBSCRIPTION_ERROR, channel, Value::from(status))
    }

    /// Removal from a channel.
    #[must_use]
    pub fn leave(channel: impl Into<String>, reason: &str) -> Self {
        Self::new(events::LEAVE, channel, Value::from(reason))
    }
}

/// A join request as sent by a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Requested channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Authorization material forwarded to the authorizer (e.g. headers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Value>,
}

impl JoinRequest {
    /// Create a request for a channel.
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            auth: None,
        }
    }

    /// Attach authorization material.
    #[must_use]
    pub fn with_auth(mut self, auth: Value) -> Self {
        self.auth = Some(auth);
        self
    }

    /// The requested channel, if a non-empty one was named.
    #[must_use]
    pub fn channel_name(&self) -> Option<&str> {
        self.channel.as_deref().filter(|c| !c.is_empty())
    }
}

/// An event a client wants relayed to the other members of a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEvent {
    /// Event name.
    pub event: String,
    /// Target channel.
    pub channel: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
    /// Connection that caused the publish; excluded from the fan-out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<String>,
}
