//! Cluster bus capability.
//!
//! A bus delivers messages published anywhere in the cluster to the nodes
//! subscribed to the message's channel. Inbound messages are handed to the
//! node through an [`InboundMessage`] queue that the
//! [`SubscriptionBridge`](crate::bridge::SubscriptionBridge) drains.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashSet;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus connection is gone.
    #[error("Bus disconnected")]
    Disconnected,

    /// The backend refused the command.
    #[error("Bus command failed: {0}")]
    Command(String),
}

/// A raw message received from the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Channel the message was published on.
    pub channel: String,
    /// Undecoded payload.
    pub payload: Bytes,
}

impl InboundMessage {
    /// Create an inbound message.
    #[must_use]
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Sending half of an inbound queue.
pub type InboundSender = mpsc::UnboundedSender<InboundMessage>;

/// Receiving half of an inbound queue.
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundMessage>;

/// Cluster publish/subscribe capability.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Start receiving messages published on `channel`.
    async fn subscribe(&self, channel: &str) -> Result<(), BusError>;

    /// Stop receiving messages published on `channel`.
    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError>;

    /// Backend name, for logs.
    fn name(&self) -> &'static str;
}

/// In-process bus for single-node deployments and tests.
///
/// Publishing only reaches the inbound queue while the channel is
/// subscribed, like a real pub/sub backend.
#[derive(Debug)]
pub struct MemoryBus {
    subscriptions: DashSet<String>,
    sink: InboundSender,
}

impl MemoryBus {
    /// Create a bus and the queue its inbound messages arrive on.
    #[must_use]
    pub fn new() -> (Self, InboundReceiver) {
        let (sink, receiver) = mpsc::unbounded_channel();
        (
            Self {
                subscriptions: DashSet::new(),
                sink,
            },
            receiver,
        )
    }

    /// Publish a payload on a channel.
    ///
    /// Returns `true` if the channel was subscribed and the message queued.
    pub fn publish(&self, channel: &str, payload: impl Into<Bytes>) -> bool {
        if !self.subscriptions.contains(channel) {
            trace!(channel = %channel, "Publish on unsubscribed channel dropped");
            return false;
        }
        self.sink.send(InboundMessage::new(channel, payload)).is_ok()
    }

    /// Check if a channel is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.contains(channel)
    }

    /// Number of subscribed channels.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn subscribe(&self, channel: &str) -> Result<(), BusError> {
        if self.sink.is_closed() {
            return Err(BusError::Disconnected);
        }
        self.subscriptions.insert(channel.to_string());
        debug!(channel = %channel, "Memory bus subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError> {
        self.subscriptions.remove(channel);
        debug!(channel = %channel, "Memory bus unsubscribed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
