//! The `MessageBus` facade over a `BusBackend`.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{JoinHandle, JoinSet};

use hive_protocol::{
    direct_channel, history_key, AgentId, Message, Recipient, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_HISTORY_LIMIT,
};

use crate::backend::{BusBackend, MemoryBackend};
use crate::BusError;

/// Tuning knobs for the bus.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Messages retained per channel history.
    pub history_limit: usize,
    /// Per-channel buffer of the in-memory backend.
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Publish/subscribe bus shared by every component.
///
/// Cheap to clone; clones share the same backend.
#[derive(Clone)]
pub struct MessageBus {
    backend: Arc<dyn BusBackend>,
    config: BusConfig,
}

impl MessageBus {
    pub fn new(backend: Arc<dyn BusBackend>, config: BusConfig) -> Self {
        Self { backend, config }
    }

    /// A bus backed by a fresh in-process store.
    pub fn in_memory(config: BusConfig) -> Self {
        let backend = Arc::new(MemoryBackend::new(config.channel_capacity));
        Self::new(backend, config)
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Broadcast a message on a channel and record it in the channel history.
    pub async fn publish(&self, channel: &str, message: &Message) -> Result<(), BusError> {
        let bytes = serde_json::to_vec(message)?;
        self.backend
            .push_bounded(&history_key(channel), bytes.clone(), self.config.history_limit)
            .await?;
        self.backend.publish(channel, bytes).await?;

        tracing::debug!(
            channel,
            message_id = %message.id,
            from = %message.from,
            kind = ?message.kind,
            "Published message"
        );
        Ok(())
    }

    /// Send a message to a single subscriber of a channel.
    ///
    /// The message is re-addressed to `target_id` and routed over the
    /// target's sub-channel; it is still recorded in the channel history.
    pub async fn send_direct(
        &self,
        channel: &str,
        target_id: &AgentId,
        message: Message,
    ) -> Result<(), BusError> {
        let message = Message {
            to: Recipient::Agent(target_id.clone()),
            ..message
        };
        let bytes = serde_json::to_vec(&message)?;
        self.backend
            .push_bounded(&history_key(channel), bytes.clone(), self.config.history_limit)
            .await?;
        self.backend
            .publish(&direct_channel(channel, target_id.as_str()), bytes)
            .await?;

        tracing::debug!(
            channel,
            target = %target_id,
            message_id = %message.id,
            "Sent direct message"
        );
        Ok(())
    }

    /// Subscribe to a channel as `subscriber_id`.
    ///
    /// The subscription sees broadcasts from everyone but itself and the
    /// direct messages addressed to it.
    pub async fn subscribe(
        &self,
        channel: &str,
        subscriber_id: &AgentId,
    ) -> Result<Subscription, BusError> {
        let broadcast_rx = self.backend.subscribe(channel).await?;
        let direct_rx = self
            .backend
            .subscribe(&direct_channel(channel, subscriber_id.as_str()))
            .await?;

        tracing::debug!(channel, subscriber = %subscriber_id, "Subscribed");

        Ok(Subscription {
            channel: channel.to_string(),
            subscriber_id: subscriber_id.clone(),
            broadcast_rx,
            direct_rx,
        })
    }

    /// Subscribe and run `handler` on its own task for every delivered
    /// message, so a slow handler never holds up the next delivery.
    ///
    /// Delivery stops when the returned handle is unsubscribed or dropped;
    /// handler tasks still running are aborted with it.
    pub async fn subscribe_with<F, Fut>(
        &self,
        channel: &str,
        subscriber_id: &AgentId,
        handler: F,
    ) -> Result<SubscriptionHandle, BusError>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut subscription = self.subscribe(channel, subscriber_id).await?;
        let task = tokio::spawn(async move {
            let mut in_flight = JoinSet::new();
            while let Some(message) = subscription.recv().await {
                while in_flight.try_join_next().is_some() {}
                in_flight.spawn(handler(message));
            }
        });
        Ok(SubscriptionHandle { task })
    }

    /// The most recent `limit` messages of a channel, oldest first.
    pub async fn get_history(&self, channel: &str, limit: usize) -> Result<Vec<Message>, BusError> {
        let raw = self.backend.range(&history_key(channel), limit).await?;
        raw.iter()
            .map(|bytes| serde_json::from_slice(bytes).map_err(BusError::from))
            .collect()
    }

    pub async fn get_state<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, BusError> {
        match self.backend.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set_state<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), BusError> {
        let bytes = serde_json::to_vec(value)?;
        self.backend.set(key, bytes).await
    }
}

/// A live subscription to one channel.
pub struct Subscription {
    channel: String,
    subscriber_id: AgentId,
    broadcast_rx: broadcast::Receiver<Vec<u8>>,
    direct_rx: broadcast::Receiver<Vec<u8>>,
}

impl Subscription {
    /// Wait for the next message visible to this subscriber.
    ///
    /// Returns `None` once the backend closes the channel. Messages lost
    /// to a lagging receiver are skipped.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let received = tokio::select! {
                r = self.broadcast_rx.recv() => r,
                r = self.direct_rx.recv() => r,
            };

            match received {
                Ok(bytes) => match serde_json::from_slice::<Message>(&bytes) {
                    Ok(message) if message.is_visible_to(&self.subscriber_id) => {
                        return Some(message)
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(
                            channel = %self.channel,
                            error = %e,
                            "Dropping undecodable message"
                        );
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        channel = %self.channel,
                        subscriber = %self.subscriber_id,
                        skipped,
                        "Subscriber lagged; messages were dropped"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn subscriber_id(&self) -> &AgentId {
        &self.subscriber_id
    }

    /// Detach from the channel.
    pub fn unsubscribe(self) {
        tracing::debug!(
            channel = %self.channel,
            subscriber = %self.subscriber_id,
            "Unsubscribed"
        );
    }
}

/// Handle to a handler-driven subscription.
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Stop delivering messages to the handler.
    pub fn unsubscribe(self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
