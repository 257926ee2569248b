//! Hive message bus.
//!
//! Asynchronous publish/subscribe with a bounded per-channel history and a
//! small key-value store for per-agent state. Delivery is at-most-once and
//! unacknowledged; callers that need reliability correlate requests and
//! responses themselves.

pub mod backend;
pub mod bus;

pub use backend::{BusBackend, MemoryBackend};
pub use bus::{BusConfig, MessageBus, Subscription, SubscriptionHandle};

/// Errors raised by the bus or its backing store.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
