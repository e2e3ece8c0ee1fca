//! Bridge between local channel activation and the cluster bus.

use crate::bus::{Bus, InboundReceiver};
use crate::directory::{ConnectionDirectory, ConnectionId};
use crate::message::{BusMessage, OutboundEvent};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Maps channel activation to bus subscriptions and fans bus messages out
/// to local connections.
///
/// The bridge does not deduplicate: callers activate a channel exactly when
/// it gains its first occupant and deactivate it when it loses its last.
pub struct SubscriptionBridge {
    /// Namespace prefix; only channels under it are bridged.
    world: String,
    /// Buses every activation is forwarded to.
    buses: Vec<Arc<dyn Bus>>,
    /// Fan-out target for inbound messages.
    directory: Arc<dyn ConnectionDirectory>,
}

impl SubscriptionBridge {
    /// Create a bridge without any bus attached.
    #[must_use]
    pub fn new(world: impl Into<String>, directory: Arc<dyn ConnectionDirectory>) -> Self {
        Self {
            world: world.into(),
            buses: Vec::new(),
            directory,
        }
    }

    /// Attach a bus.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<dyn Bus>) -> Self {
        self.buses.push(bus);
        self
    }

    /// The namespace prefix.
    #[must_use]
    pub fn world(&self) -> &str {
        &self.world
    }

    /// Whether a channel lies within this node's namespace.
    #[must_use]
    pub fn in_namespace(&self, channel: &str) -> bool {
        channel.starts_with(&self.world)
    }

    /// Subscribe to a channel on every bus.
    ///
    /// Returns `true` if the channel is in the namespace. Bus failures are
    /// logged; they do not undo the local join.
    pub async fn activate(&self, channel: &str) -> bool {
        if !self.in_namespace(channel) {
            trace!(channel = %channel, world = %self.world, "Channel outside namespace, not subscribed");
            return false;
        }

        for bus in &self.buses {
            match bus.subscribe(channel).await {
                Ok(()) => info!(channel = %channel, bus = bus.name(), "Subscribed channel"),
                Err(e) => warn!(channel = %channel, bus = bus.name(), error = %e, "Bus subscribe failed"),
            }
        }
        true
    }

    /// Unsubscribe from a channel on every bus.
    ///
    /// Returns `true` if the channel is in the namespace.
    pub async fn deactivate(&self, channel: &str) -> bool {
        if !self.in_namespace(channel) {
            trace!(channel = %channel, world = %self.world, "Channel outside namespace, not unsubscribed");
            return false;
        }

        for bus in &self.buses {
            match bus.unsubscribe(channel).await {
                Ok(()) => info!(channel = %channel, bus = bus.name(), "Unsubscribed channel"),
                Err(e) => warn!(channel = %channel, bus = bus.name(), error = %e, "Bus unsubscribe failed"),
            }
        }
        true
    }

    /// Handle a raw message from the bus.
    ///
    /// Payloads that are not `{event, data}` JSON are dropped. Returns the
    /// number of local connections the event reached.
    pub async fn on_bus_message(&self, channel: &str, raw: &[u8]) -> usize {
        let message: BusMessage = match serde_json::from_slice(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!(channel = %channel, error = %e, "Dropping non-JSON bus message");
                return 0;
            }
        };

        trace!(channel = %channel, event = %message.event, "Bus message");

        let except = message.socket.map(ConnectionId::from);
        let event = OutboundEvent::new(message.event, channel, message.data);
        self.directory.broadcast(channel, event, except.as_ref()).await
    }

    /// Drain an inbound queue until every sender is gone.
    ///
    /// `delivered` is called with the recipient count of every message.
    pub async fn run<F>(self: Arc<Self>, mut inbound: InboundReceiver, mut delivered: F)
    where
        F: FnMut(usize) + Send,
    {
        info!(world = %self.world, "Listening for bus events");
        while let Some(message) = inbound.recv().await {
            let recipients = self.on_bus_message(&message.channel, &message.payload).await;
            delivered(recipients);
        }
        info!("Bus inbound queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::directory::LocalDirectory;
    use serde_json::json;

    #[tokio::test]
    async fn test_namespace_gate() {
        let directory = Arc::new(LocalDirectory::new());
        let (bus, _inbound) = MemoryBus::new();
        let bus = Arc::new(bus);
        let bridge = SubscriptionBridge::new("tenant-a.", directory).with_bus(bus.clone());

        assert!(bridge.activate("tenant-a.private-y").await);
        assert!(bus.is_subscribed("tenant-a.private-y"));

        assert!(!bridge.activate("tenant-b.private-y").await);
        assert!(!bus.is_subscribed("tenant-b.private-y"));

        assert!(bridge.deactivate("tenant-a.private-y").await);
        assert!(!bus.is_subscribed("tenant-a.private-y"));
    }

    #[tokio::test]
    async fn test_bus_fan_out() {
        let directory = Arc::new(LocalDirectory::new());
        let c1 = ConnectionId::new("c1");
        let c2 = ConnectionId::new("c2");
        let mut rx1 = directory.register(c1.clone()).unwrap();
        let mut rx2 = directory.register(c2.clone()).unwrap();
        directory.join(&c1, "private-y").await.unwrap();
        directory.join(&c2, "private-z").await.unwrap();

        let bridge = SubscriptionBridge::new("", directory);
        let count = bridge
            .on_bus_message("private-y", br#"{"event":"update","data":{"x":1}}"#)
            .await;

        assert_eq!(count, 1);
        assert_eq!(
            rx1.try_recv().unwrap(),
            OutboundEvent::new("update", "private-y", json!({"x": 1}))
        );
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bus_message_excludes_socket() {
        let directory = Arc::new(LocalDirectory::new());
        let c1 = ConnectionId::new("c1");
        let c2 = ConnectionId::new("c2");
        let mut rx1 = directory.register(c1.clone()).unwrap();
        let mut rx2 = directory.register(c2.clone()).unwrap();
        directory.join(&c1, "room").await.unwrap();
        directory.join(&c2, "room").await.unwrap();

        let bridge = SubscriptionBridge::new("", directory);
        let count = bridge
            .on_bus_message("room", br#"{"event":"moved","data":1,"socket":"c1"}"#)
            .await;

        assert_eq!(count, 1);
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap().event, "moved");
    }

    #[tokio::test]
    async fn test_malformed_bus_message_dropped() {
        let directory = Arc::new(LocalDirectory::new());
        let c1 = ConnectionId::new("c1");
        let mut rx1 = directory.register(c1.clone()).unwrap();
        directory.join(&c1, "room").await.unwrap();

        let bridge = SubscriptionBridge::new("", directory);
        assert_eq!(bridge.on_bus_message("room", b"not json").await, 0);
        assert_eq!(bridge.on_bus_message("room", br#"{"data":1}"#).await, 0);
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_drains_memory_bus() {
        let directory = Arc::new(LocalDirectory::new());
        let c1 = ConnectionId::new("c1");
        let mut rx1 = directory.register(c1.clone()).unwrap();
        directory.join(&c1, "room").await.unwrap();

        let (bus, inbound) = MemoryBus::new();
        let bus = Arc::new(bus);
        let bridge = Arc::new(SubscriptionBridge::new("", directory).with_bus(bus.clone()));
        bridge.activate("room").await;

        let (counts_tx, mut counts) = tokio::sync::mpsc::unbounded_channel();
        let task = tokio::spawn(bridge.clone().run(inbound, move |n| {
            let _ = counts_tx.send(n);
        }));
        assert!(bus.publish("room", &br#"{"event":"ping","data":null}"#[..]));

        let event = rx1.recv().await.unwrap();
        assert_eq!(event.event, "ping");
        assert_eq!(counts.recv().await, Some(1));

        task.abort();
    }
}
