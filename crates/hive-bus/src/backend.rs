//! Backing store abstraction for the message bus.
//!
//! Any networked pub/sub + key-value service can back the bus as long as it
//! provides broadcast channels, a bounded append+trim list and get/set for
//! small blobs. `MemoryBackend` is the in-process implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use tokio::sync::{broadcast, RwLock};

use crate::BusError;

/// Minimal contract the bus needs from its backing store.
pub trait BusBackend: Send + Sync {
    /// Fire-and-forget broadcast of a payload on a channel.
    fn publish<'a>(&'a self, channel: &'a str, payload: Vec<u8>)
        -> BoxFuture<'a, Result<(), BusError>>;

    /// Open a receiver for every payload published on a channel from now on.
    fn subscribe<'a>(
        &'a self,
        channel: &'a str,
    ) -> BoxFuture<'a, Result<broadcast::Receiver<Vec<u8>>, BusError>>;

    /// Append to a list, dropping the oldest entries beyond `max_len`.
    fn push_bounded<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        max_len: usize,
    ) -> BoxFuture<'a, Result<(), BusError>>;

    /// The most recent `limit` list entries, oldest first.
    fn range<'a>(&'a self, key: &'a str, limit: usize)
        -> BoxFuture<'a, Result<Vec<Vec<u8>>, BusError>>;

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, BusError>>;

    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, Result<(), BusError>>;
}

/// In-process backend built on tokio broadcast channels.
pub struct MemoryBackend {
    channel_capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    lists: RwLock<HashMap<String, VecDeque<Vec<u8>>>>,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    available: AtomicBool,
}

impl MemoryBackend {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channel_capacity: channel_capacity.max(1),
            channels: RwLock::new(HashMap::new()),
            lists: RwLock::new(HashMap::new()),
            blobs: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), BusError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Unavailable("memory backend is offline".into()))
        }
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        if let Some(tx) = self.channels.read().await.get(channel) {
            return tx.clone();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .clone()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(hive_protocol::DEFAULT_CHANNEL_CAPACITY)
    }
}

impl BusBackend for MemoryBackend {
    fn publish<'a>(
        &'a self,
        channel: &'a str,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            self.ensure_available()?;
            let tx = self.channels.read().await.get(channel).cloned();
            if let Some(tx) = tx {
                // No receivers is fine: nobody was listening.
                let delivered = tx.send(payload).unwrap_or(0);
                tracing::trace!(channel, delivered, "Published payload");
            }
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        channel: &'a str,
    ) -> BoxFuture<'a, Result<broadcast::Receiver<Vec<u8>>, BusError>> {
        Box::pin(async move {
            self.ensure_available()?;
            Ok(self.sender(channel).await.subscribe())
        })
    }

    fn push_bounded<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        max_len: usize,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            self.ensure_available()?;
            let mut lists = self.lists.write().await;
            let list = lists.entry(key.to_string()).or_default();
            list.push_back(value);
            while list.len() > max_len {
                list.pop_front();
            }
            Ok(())
        })
    }

    fn range<'a>(
        &'a self,
        key: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<Vec<u8>>, BusError>> {
        Box::pin(async move {
            self.ensure_available()?;
            let lists = self.lists.read().await;
            Ok(lists
                .get(key)
                .map(|list| {
                    let skip = list.len().saturating_sub(limit);
                    list.iter().skip(skip).cloned().collect()
                })
                .unwrap_or_default())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, BusError>> {
        Box::pin(async move {
            self.ensure_available()?;
            Ok(self.blobs.read().await.get(key).cloned())
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            self.ensure_available()?;
            self.blobs.write().await.insert(key.to_string(), value);
            Ok(())
        })
    }
}
