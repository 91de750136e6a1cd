//! Redis backend built on `redis::aio` with a `deadpool-redis` connection pool.
//!
//! Regular commands borrow a pooled multiplexed connection. Subscriptions
//! get a dedicated `PubSub` connection each, since a subscribed connection
//! cannot serve regular commands.

use super::{CoordinationStore, StoreError, Subscription, SUBSCRIPTION_BUFFER};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, PoolConfig, PoolError, Runtime, TimeoutType, Timeouts};
use futures::StreamExt;
use redis::{ConnectionAddr, ErrorKind, IntoConnectionInfo, RedisError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Connection settings for [`RedisStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// `redis://[[user]:password@]host[:port][/db]`
    pub url: String,
    /// `host:port` of the store, for logs
    pub address: String,
    /// Maximum simultaneously borrowed connections
    pub pool_size: usize,
    /// How long an operation may wait for a free connection
    pub acquire_timeout: Duration,
    pub connect_timeout: Duration,
}

impl RedisConfig {
    /// Validates `url` with the client's own parser. Credentials and the
    /// database index stay in the URL and are applied on every new connection.
    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        let info = url
            .into_connection_info()
            .map_err(|e| StoreError::Connection(format!("invalid store url '{url}': {e}")))?;
        let address = match &info.addr {
            ConnectionAddr::Tcp(host, port) => format!("{host}:{port}"),
            _ => url.to_string(),
        };

        Ok(Self {
            url: url.to_string(),
            address,
            ..Self::default()
        })
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            address: "127.0.0.1:6379".to_string(),
            pool_size: 16,
            acquire_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

/// Store backend talking to a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    config: RedisConfig,
    pool: Pool,
    client: redis::Client,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("address", &self.config.address)
            .field("pool", &self.pool.status())
            .finish()
    }
}

impl RedisStore {
    /// Builds the pool. No connection is opened until the first operation.
    pub fn new(config: RedisConfig) -> Result<Self, StoreError> {
        let mut pool_config = PoolConfig::new(config.pool_size.max(1));
        pool_config.timeouts = Timeouts {
            wait: Some(config.acquire_timeout),
            create: Some(config.connect_timeout),
            recycle: Some(config.connect_timeout),
        };

        let mut deadpool = Config::from_url(config.url.clone());
        deadpool.pool = Some(pool_config);
        let pool = deadpool
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Connection(format!("create pool for {}: {e}", config.address)))?;
        let client = redis::Client::open(config.url.as_str()).map_err(store_error)?;

        Ok(Self { config, pool, client })
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| pool_error(e, self.config.acquire_timeout))
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let mut conn = self.connection().await?;
        let _: () = cmd.query_async(&mut conn).await.map_err(store_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.connection().await?;
        let value: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let applied: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(applied == 1)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, StoreError> {
        let mut conn = self.connection().await?;
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(receivers.max(0) as usize)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let mut pubsub = tokio::time::timeout(self.config.connect_timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| StoreError::Connection(format!("connect to {} timed out", self.config.address)))?
            .map_err(store_error)?;
        tokio::time::timeout(self.config.connect_timeout, pubsub.subscribe(channel))
            .await
            .map_err(|_| StoreError::Connection(format!("subscribe to '{channel}' timed out")))?
            .map_err(store_error)?;
        debug!("📡 Subscribed to '{}' on {}", channel, self.config.address);

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel_name = channel.to_string();
        let reader = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(message) = messages.next().await {
                match message.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => debug!("Ignoring undecodable payload on '{}': {}", channel_name, e),
                }
            }
            warn!("⚠️ Subscription to '{}' lost", channel_name);
        });

        Ok(Subscription::new(channel, rx).with_reader(reader))
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Error replies on a healthy connection are protocol errors; everything
/// else says the store is unreachable.
fn store_error(e: RedisError) -> StoreError {
    let connectivity = e.is_io_error()
        || e.is_connection_refusal()
        || e.is_connection_dropped()
        || e.is_timeout()
        || matches!(e.kind(), ErrorKind::AuthenticationFailed | ErrorKind::ClientError);
    if connectivity {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Protocol(e.to_string())
    }
}

fn pool_error(e: PoolError, wait: Duration) -> StoreError {
    match e {
        PoolError::Timeout(TimeoutType::Wait) => StoreError::PoolExhausted(wait),
        PoolError::Backend(e) => store_error(e),
        other => StoreError::Connection(other.to_string()),
    }
}
