//! Redis pub/sub bus.

use async_trait::async_trait;
use dashmap::DashSet;
use futures_util::StreamExt;
use herald_core::bus::InboundSender;
use herald_core::{Bus, BusError, InboundMessage};
use redis::aio::PubSubSink;
use redis::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const INITIAL_RETRY_DELAY_MS: u64 = 500;
const MAX_RETRY_DELAY_MS: u64 = 10_000;

/// Bus backed by Redis pub/sub.
///
/// A reader task owns the receiving half of the pub/sub connection and
/// forwards every message to the inbound queue. Subscriptions go through
/// the sending half. The set of wanted channels is kept so that they can
/// be subscribed again after a reconnect.
pub struct RedisBus {
    client: Client,
    sink: Mutex<Option<PubSubSink>>,
    channels: DashSet<String>,
}

impl RedisBus {
    /// Create a bus for the given Redis URL. No connection is made until
    /// the reader is spawned.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn new(url: &str) -> Result<Self, BusError> {
        let client = Client::open(url).map_err(|e| BusError::Command(e.to_string()))?;
        Ok(Self {
            client,
            sink: Mutex::new(None),
            channels: DashSet::new(),
        })
    }

    /// Whether a channel is wanted, connected or not.
    #[must_use]
    pub fn is_wanted(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    /// Spawn the reader task.
    ///
    /// The task reconnects with exponential backoff and stops once the
    /// inbound queue is closed.
    pub fn spawn_reader(self: &Arc<Self>, inbound: InboundSender) -> JoinHandle<()> {
        tokio::spawn(self.clone().run_reader(inbound))
    }

    async fn run_reader(self: Arc<Self>, inbound: InboundSender) {
        let mut retry_delay = INITIAL_RETRY_DELAY_MS;

        loop {
            let pubsub = match self.client.get_async_pubsub().await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    error!(error = %e, retry_ms = retry_delay, "Failed to get pubsub connection");
                    tokio::time::sleep(Duration::from_millis(retry_delay)).await;
                    retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY_MS);
                    continue;
                }
            };
            retry_delay = INITIAL_RETRY_DELAY_MS;

            let (mut sink, mut stream) = pubsub.split();
            {
                let mut slot = self.sink.lock().await;
                let wanted: Vec<String> = self.channels.iter().map(|c| c.clone()).collect();
                for channel in &wanted {
                    if let Err(e) = sink.subscribe(channel).await {
                        warn!(channel = %channel, error = %e, "Resubscribe failed");
                    }
                }
                *slot = Some(sink);
            }

            info!(channels = self.channels.len(), "Listening for redis events");

            while let Some(msg) = stream.next().await {
                let message =
                    InboundMessage::new(msg.get_channel_name(), msg.get_payload_bytes().to_vec());
                if inbound.send(message).is_err() {
                    info!("Inbound queue closed, stopping redis reader");
                    return;
                }
            }

            *self.sink.lock().await = None;
            warn!(retry_ms = retry_delay, "Pub/sub connection lost, reconnecting");
            tokio::time::sleep(Duration::from_millis(retry_delay)).await;
        }
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn subscribe(&self, channel: &str) -> Result<(), BusError> {
        self.channels.insert(channel.to_string());

        let mut slot = self.sink.lock().await;
        let Some(sink) = slot.as_mut() else {
            debug!(channel = %channel, "Redis not connected, subscribing on reconnect");
            return Err(BusError::Disconnected);
        };
        sink.subscribe(channel)
            .await
            .map_err(|e| BusError::Command(e.to_string()))
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError> {
        self.channels.remove(channel);

        let mut slot = self.sink.lock().await;
        match slot.as_mut() {
            Some(sink) => sink
                .unsubscribe(channel)
                .await
                .map_err(|e| BusError::Command(e.to_string())),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url() {
        assert!(matches!(RedisBus::new("not a url"), Err(BusError::Command(_))));
    }

    #[tokio::test]
    async fn test_subscriptions_tracked_while_disconnected() {
        let bus = RedisBus::new("redis://127.0.0.1:1/").unwrap();

        assert!(matches!(bus.subscribe("private-y").await, Err(BusError::Disconnected)));
        assert!(bus.is_wanted("private-y"));

        bus.unsubscribe("private-y").await.unwrap();
        assert!(!bus.is_wanted("private-y"));
    }
}
