//! In-process store backend.
//!
//! Clones share the same keyspace and channels, so several cluster cores in
//! one process (tests, single-node deployments) see each other exactly as
//! they would through an external store.

use super::{CoordinationStore, StoreError, Subscription, SUBSCRIPTION_BUFFER};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
struct MemoryInner {
    values: DashMap<String, Entry>,
    channels: DashMap<String, Vec<mpsc::Sender<String>>>,
    online: AtomicBool,
}

/// Shared in-memory keyspace with pub/sub.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                values: DashMap::new(),
                channels: DashMap::new(),
                online: AtomicBool::new(true),
            }),
        }
    }

    /// Simulates a partition. Going offline also ends every open subscription.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::Release);
        if !online {
            self.inner.channels.clear();
            debug!("🔌 Memory store taken offline; subscriptions dropped");
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    /// Number of live subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StoreError::Offline)
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        let expired = match self.inner.values.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.inner.values.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.ensure_online()?;
        self.inner.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        Ok(self
            .inner
            .values
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entry = self.inner.values.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: None,
        });
        if entry.is_expired(now) {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| StoreError::Protocol(format!("value at '{key}' is not an integer")))?;
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Protocol(format!("increment of '{key}' would overflow")))?;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        match self.inner.values.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, StoreError> {
        self.ensure_online()?;
        let Some(mut senders) = self.inner.channels.get_mut(channel) else {
            return Ok(0);
        };
        let mut delivered = 0;
        senders.retain(|sender| match sender.try_send(payload.to_string()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("📪 Subscriber on '{}' is lagging; message dropped", channel);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        self.ensure_online()?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(channel, rx))
    }
}
