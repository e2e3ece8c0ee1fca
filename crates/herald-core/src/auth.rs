//! Channel authorization.
//!
//! Every join goes through an [`Authorizer`]. Besides allowing or denying
//! access it resolves the channel the connection actually joins and the
//! connection-limit policy that applies there.

use crate::directory::ConnectionId;
use crate::message::{try_parse, JoinRequest};
use crate::pattern::PatternMatcher;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroUsize;
use thiserror::Error;

/// A rejected authorization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Authorization failed ({status}): {reason}")]
pub struct AuthFailure {
    /// Status reported to the connection.
    pub status: u16,
    /// Human-readable reason, logged only.
    pub reason: String,
}

impl AuthFailure {
    /// Create a failure.
    #[must_use]
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

/// Result of a successful authorization call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationResult {
    /// Channel-scoped data: `{name, user_id?, user_info?}`, possibly as a
    /// JSON-encoded string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<Value>,
}

impl AuthorizationResult {
    /// Build a result from channel data.
    #[must_use]
    pub fn with_channel_data(channel_data: Value) -> Self {
        Self {
            channel_data: Some(channel_data),
        }
    }

    /// Resolve the channel grant.
    ///
    /// Returns `None` when there is no channel data or it does not name a
    /// channel; both are integrity errors on the authorizer's side.
    #[must_use]
    pub fn grant(&self) -> Option<ChannelGrant> {
        let data = self.channel_data.clone()?;
        let data = try_parse(data).ok()?;

        let name = data.get("name")?.as_str().filter(|n| !n.is_empty())?.to_string();
        let identity = match data.get("user_id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => name.clone(),
        };

        // Metadata that fails to parse is kept as sent.
        let user_info = data
            .get("user_info")
            .cloned()
            .map(|info| try_parse(info).unwrap_or_else(|raw| raw))
            .unwrap_or(Value::Null);
        let max_clients = user_info.get("max_clients").and_then(coerce_max_clients);

        Some(ChannelGrant {
            name,
            identity,
            user_info,
            max_clients,
        })
    }
}

/// Read `max_clients` from an integer, a float (truncated) or a numeric string.
fn coerce_max_clients(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

/// Channel access resolved by the authorizer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelGrant {
    /// The identity channel to join.
    pub name: String,
    /// Presence identity; defaults to the identity channel name.
    pub identity: String,
    /// User metadata.
    pub user_info: Value,
    /// Raw `user_info.max_clients`.
    pub max_clients: Option<i64>,
}

impl ChannelGrant {
    /// Resolve the connection limit for this grant.
    ///
    /// Positive values bound the channel, negative values lift the bound and
    /// a missing or zero value falls back to `default`.
    #[must_use]
    pub fn limit(&self, default: ConnectionLimit) -> ConnectionLimit {
        match self.max_clients {
            Some(n) if n != 0 => ConnectionLimit::from_max_clients(n),
            _ => default,
        }
    }
}

/// Maximum concurrent connections on an identity channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimit {
    /// No bound.
    Unlimited,
    /// At most this many connections.
    AtMost(NonZeroUsize),
}

impl ConnectionLimit {
    /// Interpret a `max_clients` value: positive bounds, anything else is
    /// unlimited.
    #[must_use]
    pub fn from_max_clients(max_clients: i64) -> Self {
        usize::try_from(max_clients)
            .ok()
            .and_then(NonZeroUsize::new)
            .map_or(ConnectionLimit::Unlimited, ConnectionLimit::AtMost)
    }
}

/// Capability that decides whether a connection may join a channel.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Authorize a join request.
    async fn authenticate(
        &self,
        connection: &ConnectionId,
        request: &JoinRequest,
    ) -> Result<AuthorizationResult, AuthFailure>;
}

/// Authorizer for deployments without an auth backend.
///
/// Public channels are granted as requested without a connection limit;
/// private and presence channels are refused.
#[derive(Debug, Clone, Default)]
pub struct PublicOnlyAuthorizer {
    patterns: PatternMatcher,
}

impl PublicOnlyAuthorizer {
    /// Create an authorizer using the given classification.
    #[must_use]
    pub fn new(patterns: PatternMatcher) -> Self {
        Self { patterns }
    }
}

#[async_trait]
impl Authorizer for PublicOnlyAuthorizer {
    async fn authenticate(
        &self,
        _connection: &ConnectionId,
        request: &JoinRequest,
    ) -> Result<AuthorizationResult, AuthFailure> {
        let channel = request.channel_name().unwrap_or_default();
        if self.patterns.classify(channel).is_private() {
            return Err(AuthFailure::new(403, "no authorization backend configured"));
        }

        Ok(AuthorizationResult::with_channel_data(serde_json::json!({
            "name": channel,
            "user_info": { "max_clients": -1 },
        })))
    }
}
