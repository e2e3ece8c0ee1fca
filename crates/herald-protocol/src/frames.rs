//! Frame types for the Herald client protocol.
//!
//! Frames are tagged by `type`. JSON text and MessagePack binary carry the
//! same structure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a `client_event` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientEventBody {
    /// Structured event.
    Fields {
        /// Event name, e.g. `client-typing`.
        event: String,
        /// Target channel.
        channel: String,
        /// Event payload.
        #[serde(default)]
        data: Value,
    },
    /// The whole event encoded as a JSON string.
    Encoded {
        /// `{"event", "channel", "data"}` as text.
        payload: String,
    },
}

impl ClientEventBody {
    /// The event as a JSON value, the encoded form left as a string.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            ClientEventBody::Fields {
                event,
                channel,
                data,
            } => serde_json::json!({
                "event": event,
                "channel": channel,
                "data": data,
            }),
            ClientEventBody::Encoded { payload } => Value::String(payload),
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Join a channel.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Requested channel.
        channel: String,
        /// Authorization material forwarded to the authorizer.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<Value>,
    },

    /// Leave a channel.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Channel to leave.
        channel: String,
    },

    /// Relay an event to the other members of a channel.
    #[serde(rename = "client_event")]
    ClientEvent {
        /// Event body.
        #[serde(flatten)]
        body: ClientEventBody,
    },

    /// An event delivered to the client.
    #[serde(rename = "event")]
    Event {
        /// Event name.
        event: String,
        /// Channel the event belongs to.
        channel: String,
        /// Event payload.
        #[serde(default)]
        data: Value,
    },

    /// Connection established.
    #[serde(rename = "connected")]
    Connected {
        /// Identifier the server assigned to this connection.
        connection_id: String,
    },

    /// A frame could not be handled.
    #[serde(rename = "error")]
    Error {
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping,

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong,
}

impl Frame {
    /// Short name of the frame type, as used in the `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Subscribe { .. } => "subscribe",
            Frame::Unsubscribe { .. } => "unsubscribe",
            Frame::ClientEvent { .. } => "client_event",
            Frame::Event { .. } => "event",
            Frame::Connected { .. } => "connected",
            Frame::Error { .. } => "error",
            Frame::Ping => "ping",
            Frame::Pong => "pong",
        }
    }

    /// Create a Subscribe frame.
    #[must_use]
    pub fn subscribe(channel: impl Into<String>) -> Self {
        Frame::Subscribe {
            channel: channel.into(),
            auth: None,
        }
    }

    /// Create a Subscribe frame carrying authorization material.
    #[must_use]
    pub fn subscribe_with_auth(channel: impl Into<String>, auth: Value) -> Self {
        Frame::Subscribe {
            channel: channel.into(),
            auth: Some(auth),
        }
    }

    /// Create an Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Frame::Unsubscribe {
            channel: channel.into(),
        }
    }

    /// Create a ClientEvent frame.
    #[must_use]
    pub fn client_event(event: impl Into<String>, channel: impl Into<String>, data: Value) -> Self {
        Frame::ClientEvent {
            body: ClientEventBody::Fields {
                event: event.into(),
                channel: channel.into(),
                data,
            },
        }
    }

    /// Create an Event frame.
    #[must_use]
    pub fn event(event: impl Into<String>, channel: impl Into<String>, data: Value) -> Self {
        Frame::Event {
            event: event.into(),
            channel: channel.into(),
            data,
        }
    }

    /// Create a Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
        }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_kind() {
        assert_eq!(Frame::subscribe("lobby").kind(), "subscribe");
        assert_eq!(Frame::Ping.kind(), "ping");
        assert_eq!(Frame::client_event("client-a", "private-a", json!(1)).kind(), "client_event");
    }

    #[test]
    fn test_client_event_shapes() {
        let fields: Frame = serde_json::from_value(json!({
            "type": "client_event",
            "event": "client-typing",
            "channel": "private-a",
            "data": {"on": true}
        }))
        .unwrap();
        let Frame::ClientEvent { body } = fields else {
            panic!("expected client_event");
        };
        assert_eq!(
            body.into_value(),
            json!({"event": "client-typing", "channel": "private-a", "data": {"on": true}})
        );

        let encoded: Frame = serde_json::from_value(json!({
            "type": "client_event",
            "payload": "{\"event\":\"client-typing\",\"channel\":\"private-a\"}"
        }))
        .unwrap();
        let Frame::ClientEvent { body } = encoded else {
            panic!("expected client_event");
        };
        assert!(body.into_value().is_string());
    }

    #[test]
    fn test_subscribe_auth_optional() {
        let frame: Frame = serde_json::from_value(json!({"type": "subscribe", "channel": "lobby"})).unwrap();
        assert_eq!(frame, Frame::subscribe("lobby"));

        let text = serde_json::to_string(&Frame::subscribe("lobby")).unwrap();
        assert!(!text.contains("auth"));
    }
}
