//! Channel coordination.
//!
//! The coordinator is the only place that changes channel state. Joins are
//! authorized first and then applied under a per-channel lock together with
//! eviction, presence bookkeeping and bus activation, so that two joins or
//! leaves on the same channel never interleave between an occupancy check
//! and the action taken on it.

use crate::auth::{Authorizer, ChannelGrant, ConnectionLimit};
use crate::bridge::SubscriptionBridge;
use crate::directory::{ConnectionDirectory, ConnectionId, DirectoryError};
use crate::message::{
    events, reasons, try_parse, ClientEvent, JoinRequest, OutboundEvent, SERVER_ERROR_STATUS,
};
use crate::pattern::{ChannelPatterns, PatternMatcher};
use crate::presence::{PresenceMember, PresenceRoster};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, trace, warn};

/// Coordinator errors.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The directory refused a membership change.
    #[error("Directory error on {channel}: {source}")]
    Directory {
        /// Channel being changed.
        channel: String,
        /// Underlying error.
        #[source]
        source: DirectoryError,
    },

    /// The occupant count of a channel could not be read.
    #[error("Occupancy of {channel} unknown: {source}")]
    Occupancy {
        /// Channel being queried.
        channel: String,
        /// Underlying error.
        #[source]
        source: DirectoryError,
    },
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Channel and client-event patterns.
    pub patterns: ChannelPatterns,
    /// `max_clients` applied when the authorizer gives none (or zero).
    /// Negative means unlimited.
    pub default_max_clients: i64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            patterns: ChannelPatterns::default(),
            default_max_clients: 1,
        }
    }
}

/// What a join request ended in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The request named no channel.
    Ignored,
    /// Authorization failed; the requester got a `subscription_error`.
    Rejected {
        /// Requested channel.
        channel: String,
        /// Status sent to the requester.
        status: u16,
    },
    /// The connection joined.
    Joined {
        /// Identity channel actually joined.
        channel: String,
        /// Connections evicted to respect the connection limit.
        evicted: Vec<ConnectionId>,
        /// Whether this join took the channel from empty to occupied.
        activated: bool,
    },
}

/// Per-channel async locks, dropped again once nobody holds or awaits them.
#[derive(Default)]
struct ChannelLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ChannelLocks {
    async fn acquire(&self, channel: &str) -> ChannelGuard<'_> {
        let lock = self.locks.entry(channel.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        ChannelGuard {
            locks: self,
            channel: channel.to_string(),
            guard: Some(guard),
        }
    }

    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct ChannelGuard<'a> {
    locks: &'a ChannelLocks,
    channel: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own handle left: nobody holds or waits for it.
        self.locks
            .locks
            .remove_if(&self.channel, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Orchestrates joins, leaves, evictions, presence and client events.
pub struct ChannelCoordinator {
    patterns: PatternMatcher,
    default_limit: ConnectionLimit,
    directory: Arc<dyn ConnectionDirectory>,
    authorizer: Arc<dyn Authorizer>,
    bridge: Arc<SubscriptionBridge>,
    roster: PresenceRoster,
    locks: ChannelLocks,
}

impl ChannelCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        config: &CoordinatorConfig,
        directory: Arc<dyn ConnectionDirectory>,
        authorizer: Arc<dyn Authorizer>,
        bridge: Arc<SubscriptionBridge>,
    ) -> Self {
        debug!("Channels are ready: {:?}", config);
        Self {
            patterns: PatternMatcher::new(&config.patterns),
            default_limit: ConnectionLimit::from_max_clients(config.default_max_clients),
            directory,
            authorizer,
            bridge,
            roster: PresenceRoster::new(),
            locks: ChannelLocks::default(),
        }
    }

    /// Presence rosters.
    #[must_use]
    pub fn roster(&self) -> &PresenceRoster {
        &self.roster
    }

    /// Number of channels with a live lock.
    #[must_use]
    pub fn locked_channels(&self) -> usize {
        self.locks.len()
    }

    /// Join a channel.
    ///
    /// Authorization failures are reported to the requester and returned as
    /// [`JoinOutcome::Rejected`]; they are not errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory refuses the membership change or
    /// cannot report occupancy before eviction. The requester receives a
    /// `subscription_error` in both cases.
    pub async fn join(
        &self,
        connection: &ConnectionId,
        request: &JoinRequest,
    ) -> Result<JoinOutcome, CoordinatorError> {
        let Some(requested) = request.channel_name() else {
            trace!(connection = %connection, "Join without channel ignored");
            return Ok(JoinOutcome::Ignored);
        };

        let result = match self.authorizer.authenticate(connection, request).await {
            Ok(result) => result,
            Err(failure) => {
                debug!(
                    connection = %connection,
                    channel = %requested,
                    status = failure.status,
                    reason = %failure.reason,
                    "Authorization failed"
                );
                return Ok(self.reject(connection, requested, failure.status).await);
            }
        };

        let Some(grant) = result.grant() else {
            error!(
                connection = %connection,
                channel = %requested,
                result = ?result,
                "Authorizer returned no usable channel data"
            );
            return Ok(self.reject(connection, requested, SERVER_ERROR_STATUS).await);
        };

        let _guard = self.locks.acquire(&grant.name).await;
        self.join_locked(connection, requested, grant).await
    }

    async fn reject(&self, connection: &ConnectionId, channel: &str, status: u16) -> JoinOutcome {
        self.directory
            .send(connection, OutboundEvent::subscription_error(channel, status))
            .await;
        JoinOutcome::Rejected {
            channel: channel.to_string(),
            status,
        }
    }

    async fn join_locked(
        &self,
        connection: &ConnectionId,
        requested: &str,
        grant: ChannelGrant,
    ) -> Result<JoinOutcome, CoordinatorError> {
        let channel = grant.name.as_str();

        let limit = grant.limit(self.default_limit);
        let evicted = match self.evict_over_limit(connection, channel, limit).await {
            Ok(evicted) => evicted,
            Err(e) => {
                self.reject(connection, requested, SERVER_ERROR_STATUS).await;
                return Err(e);
            }
        };

        let rejoin = self.directory.is_member(connection, channel).await;
        if let Err(source) = self.directory.join(connection, channel).await {
            match &source {
                DirectoryError::UnknownConnection(_) => {
                    debug!(connection = %connection, channel = %channel, "Connection vanished before join completed");
                }
                other => {
                    warn!(connection = %connection, channel = %channel, error = %other, "Directory refused join");
                }
            }
            self.reject(connection, requested, SERVER_ERROR_STATUS).await;
            return Err(CoordinatorError::Directory {
                channel: channel.to_string(),
                source,
            });
        }

        info!(connection = %connection, channel = %channel, "Joined channel");

        if self.patterns.classify(channel).is_presence() {
            self.presence_join(connection, channel, &grant).await;
        }

        let activated = match self.directory.occupants(channel).await {
            Ok(_) if rejoin => false,
            Ok(occupants) if occupants.len() == 1 => {
                self.bridge.activate(channel).await;
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Occupancy unknown after join, not activating");
                false
            }
        };

        Ok(JoinOutcome::Joined {
            channel: channel.to_string(),
            evicted,
            activated,
        })
    }

    /// Make room for one more connection under `limit`. The first `limit - 1`
    /// other occupants in directory order stay; the rest are evicted.
    async fn evict_over_limit(
        &self,
        connection: &ConnectionId,
        channel: &str,
        limit: ConnectionLimit,
    ) -> Result<Vec<ConnectionId>, CoordinatorError> {
        let ConnectionLimit::AtMost(limit) = limit else {
            return Ok(Vec::new());
        };

        let others: Vec<ConnectionId> = self
            .directory
            .occupants(channel)
            .await
            .map_err(|source| CoordinatorError::Occupancy {
                channel: channel.to_string(),
                source,
            })?
            .into_iter()
            .filter(|c| c != connection)
            .collect();

        let keep = limit.get() - 1;
        if others.len() <= keep {
            return Ok(Vec::new());
        }

        let mut evicted = Vec::with_capacity(others.len() - keep);
        for occupant in others.into_iter().skip(keep) {
            info!(
                channel = %channel,
                evicted = %occupant,
                replaced_by = %connection,
                limit = limit.get(),
                "Evicting connection over limit"
            );
            if let Err(e) = self.leave_locked(&occupant, channel, reasons::REPLACED).await {
                warn!(channel = %channel, connection = %occupant, error = %e, "Eviction left occupancy unknown");
            }
            evicted.push(occupant);
        }
        Ok(evicted)
    }

    async fn presence_join(&self, connection: &ConnectionId, channel: &str, grant: &ChannelGrant) {
        let member = PresenceMember::new(
            connection.clone(),
            grant.identity.clone(),
            grant.user_info.clone(),
        );
        let joining = serde_json::to_value(&member).unwrap_or_default();
        let is_new = self.roster.add(channel, member);

        let members = serde_json::to_value(self.roster.members(channel)).unwrap_or_default();
        self.directory
            .send(
                connection,
                OutboundEvent::new(events::PRESENCE_SUBSCRIBED, channel, members),
            )
            .await;

        if is_new {
            self.directory
                .broadcast(
                    channel,
                    OutboundEvent::new(events::PRESENCE_JOINING, channel, joining),
                    Some(connection),
                )
                .await;
        }
    }

    /// Leave a channel.
    ///
    /// Returns `true` if the channel became empty and was deactivated.
    /// Leaving a channel the connection does not occupy changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Occupancy`] if the occupant count could
    /// not be read afterwards. The leave itself has taken effect; the bus
    /// subscription is kept.
    pub async fn leave(
        &self,
        connection: &ConnectionId,
        channel: &str,
        reason: &str,
    ) -> Result<bool, CoordinatorError> {
        if channel.is_empty() {
            return Ok(false);
        }
        let _guard = self.locks.acquire(channel).await;
        self.leave_locked(connection, channel, reason).await
    }

    async fn leave_locked(
        &self,
        connection: &ConnectionId,
        channel: &str,
        reason: &str,
    ) -> Result<bool, CoordinatorError> {
        if !self.directory.is_member(connection, channel).await {
            trace!(connection = %connection, channel = %channel, "Leave of unoccupied channel ignored");
            return Ok(false);
        }

        let departed = if self.patterns.classify(channel).is_presence() {
            self.roster
                .remove(channel, connection)
                .filter(|member| !self.roster.has_identity(channel, &member.identity))
        } else {
            None
        };

        match self.directory.leave_room(connection, channel).await {
            Ok(()) => {}
            Err(DirectoryError::UnknownConnection(_)) => {
                debug!(connection = %connection, channel = %channel, "Leaving connection already gone");
            }
            Err(e) => {
                warn!(connection = %connection, channel = %channel, error = %e, "Directory refused leave");
            }
        }

        info!(connection = %connection, channel = %channel, reason = %reason, "Left channel");
        self.directory
            .send(connection, OutboundEvent::leave(channel, reason))
            .await;

        if let Some(member) = departed {
            let data = serde_json::to_value(&member).unwrap_or_default();
            self.directory
                .broadcast(
                    channel,
                    OutboundEvent::new(events::PRESENCE_LEAVING, channel, data),
                    None,
                )
                .await;
        }

        match self.directory.occupants(channel).await {
            Ok(occupants) if occupants.is_empty() => {
                self.bridge.deactivate(channel).await;
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(source) => {
                warn!(channel = %channel, error = %source, "Occupancy unknown after leave, keeping bus subscription");
                Err(CoordinatorError::Occupancy {
                    channel: channel.to_string(),
                    source,
                })
            }
        }
    }

    /// Relay a client event to the other members of a private channel.
    ///
    /// Returns `true` if the event was relayed. Anything that does not pass
    /// the gate is dropped silently.
    pub async fn client_event(&self, connection: &ConnectionId, payload: Value) -> bool {
        let payload = try_parse(payload).unwrap_or_else(|raw| raw);
        let Ok(event) = serde_json::from_value::<ClientEvent>(payload) else {
            trace!(connection = %connection, "Malformed client event dropped");
            return false;
        };

        if !self.patterns.matches_client_event(&event.event)
            || !self.patterns.classify(&event.channel).is_private()
            || !self.directory.is_member(connection, &event.channel).await
        {
            trace!(
                connection = %connection,
                channel = %event.channel,
                event = %event.event,
                "Client event not relayed"
            );
            return false;
        }

        let recipients = self
            .directory
            .broadcast(
                &event.channel,
                OutboundEvent::new(event.event.clone(), event.channel.clone(), event.data),
                Some(connection),
            )
            .await;
        debug!(
            connection = %connection,
            channel = %event.channel,
            event = %event.event,
            recipients = recipients,
            "Relayed client event"
        );
        true
    }

    /// Leave every channel a connection occupies.
    ///
    /// Returns the number of channels left.
    pub async fn disconnect(&self, connection: &ConnectionId) -> usize {
        let channels = self.directory.channels_of(connection).await;
        for channel in &channels {
            if let Err(e) = self.leave(connection, channel, reasons::DISCONNECT).await {
                warn!(connection = %connection, error = %e, "Disconnect leave incomplete");
            }
        }
        debug!(connection = %connection, channels = channels.len(), "Connection disconnected");
        channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthFailure, AuthorizationResult};
    use crate::bus::{InboundReceiver, MemoryBus};
    use crate::directory::LocalDirectory;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// Grants the requested channel with the channel data given in the
    /// request's `auth` field, or refuses when `auth` is `"deny"`.
    struct EchoAuthorizer;

    #[async_trait]
    impl Authorizer for EchoAuthorizer {
        async fn authenticate(
            &self,
            _connection: &ConnectionId,
            request: &JoinRequest,
        ) -> Result<AuthorizationResult, AuthFailure> {
            match &request.auth {
                Some(Value::String(s)) if s == "deny" => Err(AuthFailure::new(403, "denied")),
                Some(Value::String(s)) if s == "empty" => Ok(AuthorizationResult::default()),
                Some(data) => Ok(AuthorizationResult::with_channel_data(data.clone())),
                None => Ok(AuthorizationResult::with_channel_data(json!({
                    "name": request.channel,
                    "user_info": {"max_clients": -1}
                }))),
            }
        }
    }

    struct Fixture {
        directory: Arc<LocalDirectory>,
        bus: Arc<MemoryBus>,
        coordinator: ChannelCoordinator,
        _inbound: InboundReceiver,
    }

    impl Fixture {
        fn new() -> Self {
            let directory = Arc::new(LocalDirectory::new());
            let (bus, inbound) = MemoryBus::new();
            let bus = Arc::new(bus);
            let bridge = Arc::new(SubscriptionBridge::new("", directory.clone()).with_bus(bus.clone()));
            let coordinator = ChannelCoordinator::new(
                &CoordinatorConfig::default(),
                directory.clone(),
                Arc::new(EchoAuthorizer),
                bridge,
            );
            Self {
                directory,
                bus,
                coordinator,
                _inbound: inbound,
            }
        }

        fn connect(&self, id: &str) -> (ConnectionId, mpsc::Receiver<OutboundEvent>) {
            let conn = ConnectionId::new(id);
            let rx = self.directory.register(conn.clone()).unwrap();
            (conn, rx)
        }
    }

    fn drain(rx: &mut mpsc::Receiver<OutboundEvent>) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_join_without_channel_ignored() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.connect("c1");

        let outcome = fx.coordinator.join(&c1, &JoinRequest::default()).await.unwrap();
        assert_eq!(outcome, JoinOutcome::Ignored);
        assert!(drain(&mut rx1).is_empty());
    }

    #[tokio::test]
    async fn test_rejected_join() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.connect("c1");
        let (c2, mut rx2) = fx.connect("c2");
        fx.coordinator.join(&c2, &JoinRequest::new("private-a")).await.unwrap();
        drain(&mut rx2);

        let request = JoinRequest::new("private-a").with_auth(json!("deny"));
        let outcome = fx.coordinator.join(&c1, &request).await.unwrap();

        assert_eq!(
            outcome,
            JoinOutcome::Rejected {
                channel: "private-a".into(),
                status: 403
            }
        );
        assert_eq!(drain(&mut rx1), [OutboundEvent::subscription_error("private-a", 403)]);
        assert!(drain(&mut rx2).is_empty());
        assert!(!fx.directory.is_member(&c1, "private-a").await);
    }

    #[tokio::test]
    async fn test_missing_channel_data_is_server_error() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.connect("c1");

        let request = JoinRequest::new("private-a").with_auth(json!("empty"));
        let outcome = fx.coordinator.join(&c1, &request).await.unwrap();

        assert_eq!(
            outcome,
            JoinOutcome::Rejected {
                channel: "private-a".into(),
                status: SERVER_ERROR_STATUS
            }
        );
        assert_eq!(
            drain(&mut rx1),
            [OutboundEvent::subscription_error("private-a", SERVER_ERROR_STATUS)]
        );
        assert!(fx.directory.channels_of(&c1).await.is_empty());
    }

    #[tokio::test]
    async fn test_join_resolves_identity_channel() {
        let fx = Fixture::new();
        let (c1, _rx1) = fx.connect("c1");

        let request = JoinRequest::new("private-requested")
            .with_auth(json!({"name": "private-user.7", "user_info": {"max_clients": 2}}));
        let outcome = fx.coordinator.join(&c1, &request).await.unwrap();

        assert_eq!(
            outcome,
            JoinOutcome::Joined {
                channel: "private-user.7".into(),
                evicted: vec![],
                activated: true
            }
        );
        assert!(fx.directory.is_member(&c1, "private-user.7").await);
        assert!(!fx.directory.is_member(&c1, "private-requested").await);
        assert!(fx.bus.is_subscribed("private-user.7"));
    }

    #[tokio::test]
    async fn test_eviction_keeps_first_occupants() {
        let fx = Fixture::new();
        let limit_two = json!({"name": "room-a", "user_info": {"max_clients": 2}});
        let mut receivers = Vec::new();
        for id in ["c1", "c2", "c3"] {
            let (conn, rx) = fx.connect(id);
            let request = JoinRequest::new("room-a").with_auth(limit_two.clone());
            fx.coordinator.join(&conn, &request).await.unwrap();
            receivers.push(rx);
        }

        let occupants = fx.directory.occupants("room-a").await.unwrap();
        let ids: Vec<&str> = occupants.iter().map(ConnectionId::as_str).collect();
        assert_eq!(ids, ["c1", "c3"]);
        assert!(!drain(&mut receivers[0]).contains(&OutboundEvent::leave("room-a", reasons::REPLACED)));
        assert!(drain(&mut receivers[1]).contains(&OutboundEvent::leave("room-a", reasons::REPLACED)));
    }

    #[tokio::test]
    async fn test_rejoin_does_not_evict_self() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.connect("c1");
        let request = JoinRequest::new("room-a").with_auth(json!({"name": "room-a", "user_info": {"max_clients": 1}}));

        fx.coordinator.join(&c1, &request).await.unwrap();
        let outcome = fx.coordinator.join(&c1, &request).await.unwrap();

        assert_eq!(
            outcome,
            JoinOutcome::Joined {
                channel: "room-a".into(),
                evicted: vec![],
                activated: false
            }
        );
        assert!(drain(&mut rx1).is_empty());
        assert_eq!(fx.directory.occupant_count("room-a"), 1);
    }

    #[tokio::test]
    async fn test_default_limit_applies_without_max_clients() {
        let fx = Fixture::new();
        let (c1, _rx1) = fx.connect("c1");
        let (c2, _rx2) = fx.connect("c2");
        let request = JoinRequest::new("room-a").with_auth(json!({"name": "room-a"}));

        fx.coordinator.join(&c1, &request).await.unwrap();
        let outcome = fx.coordinator.join(&c2, &request).await.unwrap();

        assert!(matches!(outcome, JoinOutcome::Joined { evicted, .. } if evicted == vec![c1]));
    }

    #[tokio::test]
    async fn test_join_vanished_connection() {
        let fx = Fixture::new();
        let ghost = ConnectionId::new("ghost");

        let result = fx.coordinator.join(&ghost, &JoinRequest::new("lobby")).await;

        assert!(matches!(
            result,
            Err(CoordinatorError::Directory {
                source: DirectoryError::UnknownConnection(_),
                ..
            })
        ));
        assert!(!fx.bus.is_subscribed("lobby"));
        assert_eq!(fx.coordinator.locked_channels(), 0);
    }

    #[tokio::test]
    async fn test_leave_empty_channel_name() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.connect("c1");

        assert!(!fx.coordinator.leave(&c1, "", reasons::UNSUBSCRIBED).await.unwrap());
        assert!(drain(&mut rx1).is_empty());
    }

    #[tokio::test]
    async fn test_leave_emits_event_and_deactivates() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.connect("c1");
        fx.coordinator.join(&c1, &JoinRequest::new("lobby")).await.unwrap();
        assert!(fx.bus.is_subscribed("lobby"));

        let deactivated = fx.coordinator.leave(&c1, "lobby", reasons::UNSUBSCRIBED).await.unwrap();

        assert!(deactivated);
        assert!(!fx.bus.is_subscribed("lobby"));
        assert_eq!(drain(&mut rx1), [OutboundEvent::leave("lobby", reasons::UNSUBSCRIBED)]);
        assert_eq!(fx.coordinator.locked_channels(), 0);
    }

    #[tokio::test]
    async fn test_leave_without_membership_is_noop() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.connect("c1");
        fx.coordinator.join(&c1, &JoinRequest::new("lobby")).await.unwrap();
        assert!(fx.coordinator.leave(&c1, "lobby", reasons::UNSUBSCRIBED).await.unwrap());
        drain(&mut rx1);

        assert!(!fx.coordinator.leave(&c1, "lobby", reasons::UNSUBSCRIBED).await.unwrap());
        assert!(!fx.coordinator.leave(&c1, "never-joined", reasons::UNSUBSCRIBED).await.unwrap());

        assert!(drain(&mut rx1).is_empty());
        assert_eq!(fx.coordinator.locked_channels(), 0);
    }

    #[tokio::test]
    async fn test_presence_events() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.connect("c1");
        let (c2, mut rx2) = fx.connect("c2");
        let alice = json!({"name": "presence-x", "user_id": "alice", "user_info": {"max_clients": -1}});
        let bob = json!({"name": "presence-x", "user_id": "bob", "user_info": {"max_clients": -1}});

        fx.coordinator
            .join(&c1, &JoinRequest::new("presence-x").with_auth(alice))
            .await
            .unwrap();
        fx.coordinator
            .join(&c2, &JoinRequest::new("presence-x").with_auth(bob))
            .await
            .unwrap();

        let to_bob = drain(&mut rx2);
        assert_eq!(to_bob[0].event, events::PRESENCE_SUBSCRIBED);
        assert_eq!(to_bob[0].data.as_array().map(Vec::len), Some(2));

        let to_alice = drain(&mut rx1);
        assert_eq!(to_alice.len(), 2);
        assert_eq!(to_alice[1].event, events::PRESENCE_JOINING);
        assert_eq!(to_alice[1].data["user_id"], json!("bob"));

        fx.coordinator.leave(&c2, "presence-x", reasons::UNSUBSCRIBED).await.unwrap();
        let to_alice = drain(&mut rx1);
        assert_eq!(to_alice.len(), 1);
        assert_eq!(to_alice[0].event, events::PRESENCE_LEAVING);
        assert_eq!(to_alice[0].data["user_id"], json!("bob"));
    }

    #[tokio::test]
    async fn test_client_event_string_payload() {
        let fx = Fixture::new();
        let (c1, _rx1) = fx.connect("c1");
        let (c2, mut rx2) = fx.connect("c2");
        for conn in [&c1, &c2] {
            fx.coordinator.join(conn, &JoinRequest::new("private-a")).await.unwrap();
        }
        drain(&mut rx2);

        let payload = json!(r#"{"event":"client-typing","channel":"private-a","data":{"on":true}}"#);
        assert!(fx.coordinator.client_event(&c1, payload).await);
        assert_eq!(
            drain(&mut rx2),
            [OutboundEvent::new("client-typing", "private-a", json!({"on": true}))]
        );
    }

    #[tokio::test]
    async fn test_client_event_gates() {
        let fx = Fixture::new();
        let (c1, _rx1) = fx.connect("c1");
        let (c2, mut rx2) = fx.connect("c2");
        for conn in [&c1, &c2] {
            fx.coordinator.join(conn, &JoinRequest::new("lobby")).await.unwrap();
            fx.coordinator.join(conn, &JoinRequest::new("private-a")).await.unwrap();
        }
        drain(&mut rx2);

        // Not a client event name
        let plain = json!({"event": "typing", "channel": "private-a", "data": {}});
        assert!(!fx.coordinator.client_event(&c1, plain).await);
        // Public channel
        let public = json!({"event": "client-typing", "channel": "lobby", "data": {}});
        assert!(!fx.coordinator.client_event(&c1, public).await);
        // Garbage
        assert!(!fx.coordinator.client_event(&c1, json!("???")).await);
        assert!(!fx.coordinator.client_event(&c1, json!(42)).await);

        assert!(drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_leaves_everything() {
        let fx = Fixture::new();
        let (c1, _rx1) = fx.connect("c1");
        let member = json!({"name": "presence-x", "user_id": "alice", "user_info": {"max_clients": -1}});
        fx.coordinator.join(&c1, &JoinRequest::new("lobby")).await.unwrap();
        fx.coordinator
            .join(&c1, &JoinRequest::new("presence-x").with_auth(member))
            .await
            .unwrap();

        assert_eq!(fx.coordinator.disconnect(&c1).await, 2);

        assert!(fx.directory.channels_of(&c1).await.is_empty());
        assert!(fx.coordinator.roster().members("presence-x").is_empty());
        assert_eq!(fx.bus.subscription_count(), 0);
    }
}
