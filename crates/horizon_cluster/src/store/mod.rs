//! # Coordination Store
//!
//! Typed access to the shared key-value store with publish/subscribe
//! channels that is the only link between cluster processes.
//!
//! - [`CoordinationStore`] - backend contract (get/set/incr/publish/subscribe)
//! - [`MemoryStore`] - in-process backend, shareable between cores in one process
//! - [`RedisStore`] - Redis backend on `redis::aio` with a `deadpool-redis` pool
//! - [`StoreClient`] - what the rest of the crate talks to: bounded waits,
//!   circuit breaking and conversion of every failure to
//!   [`ClusterError::StoreUnavailable`](crate::ClusterError::StoreUnavailable)

use async_trait::async_trait;
use futures::Stream;
use std::fmt::Debug;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub mod circuit_breaker;
mod client;
mod keys;
mod memory;
mod redis_store;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitBreakerStats};
pub use client::{StoreClient, StoreClientConfig};
pub use keys::KeySpace;
pub use memory::MemoryStore;
pub use redis_store::{RedisConfig, RedisStore};

/// Buffered payloads per subscription before the backend starts dropping.
pub const SUBSCRIPTION_BUFFER: usize = 1024;

/// Backend failures. [`StoreClient`] folds all of them into
/// `ClusterError::StoreUnavailable`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("no pooled connection available within {0:?}")]
    PoolExhausted(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("store is offline")]
    Offline,
}

impl StoreError {
    /// Whether the failure says something about reachability of the store,
    /// as opposed to a bad request on a healthy connection.
    pub fn is_connectivity(&self) -> bool {
        !matches!(self, StoreError::Protocol(_))
    }
}

/// Backend contract for the shared store.
///
/// Implementations must not block indefinitely; [`StoreClient`] adds its
/// own bounded wait on top regardless.
#[async_trait]
pub trait CoordinationStore: Send + Sync + Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Sets `key`, optionally with a time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Deletes `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically adds `delta` to the integer at `key` (missing counts as 0)
    /// and returns the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Sets a time-to-live on an existing key. Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Publishes `payload` on `channel`. Returns the number of receivers.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, StoreError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError>;
}

/// Lazy sequence of payloads received on one channel.
///
/// The stream ends when the backend loses the subscription; callers are
/// expected to resubscribe.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    receiver: mpsc::Receiver<String>,
    reader: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, receiver: mpsc::Receiver<String>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
            reader: None,
        }
    }

    /// Ties a background reader task to this subscription; it is aborted on drop.
    pub fn with_reader(mut self, reader: JoinHandle<()>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Stream for Subscription {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
