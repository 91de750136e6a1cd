//! # Server Registry
//!
//! This server's identity and its records in the shared store: the player
//! counter, the last-seen heartbeat and the advertised address used for
//! redirects. Every record carries a TTL that [`ServerRegistry::heartbeat`]
//! refreshes, so a crashed server's records expire on their own.

use crate::error::ClusterError;
use crate::host::HostAdapter;
use crate::scheduler::Scheduler;
use crate::store::{KeySpace, StoreClient};
use crate::types::{current_timestamp, ServerIdentity};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default lifetime of server records between heartbeats.
pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(30);

/// Registry of this server and read access to its peers.
#[derive(Debug, Clone)]
pub struct ServerRegistry {
    identity: ServerIdentity,
    address: String,
    keys: KeySpace,
    store: StoreClient,
    host: Arc<dyn HostAdapter>,
    scheduler: Scheduler,
    record_ttl: Duration,
}

impl ServerRegistry {
    /// Creates the registry for this process.
    ///
    /// # Arguments
    ///
    /// * `identity` - Validated identity, see [`ServerIdentity::derive`]
    /// * `address` - `host:port` other servers redirect players to
    /// * `record_ttl` - Lifetime of this server's records without a heartbeat
    pub fn new(
        identity: ServerIdentity,
        address: impl Into<String>,
        keys: KeySpace,
        store: StoreClient,
        host: Arc<dyn HostAdapter>,
        scheduler: Scheduler,
        record_ttl: Duration,
    ) -> Self {
        Self {
            identity,
            address: address.into(),
            keys,
            store,
            host,
            scheduler,
            record_ttl,
        }
    }

    pub fn identify(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn record_ttl(&self) -> Duration {
        self.record_ttl
    }

    /// Publishes this server's records. The player counter starts from the
    /// host's current online count.
    pub async fn register(&self) -> Result<(), ClusterError> {
        let online = self.get_player_count().await?;
        let ttl = Some(self.record_ttl);

        self.store
            .set(&self.keys.server_address(&self.identity), &self.address, ttl)
            .await?;
        self.store
            .set(&self.keys.server_players(&self.identity), &online.to_string(), ttl)
            .await?;
        self.store
            .set(
                &self.keys.server_last_seen(&self.identity),
                &current_timestamp().to_string(),
                ttl,
            )
            .await?;

        info!(
            "📇 Registered server '{}' at {} with {} player(s)",
            self.identity, self.address, online
        );
        Ok(())
    }

    /// Refreshes `last_seen` and the TTL of every record.
    pub async fn heartbeat(&self) -> Result<(), ClusterError> {
        self.store
            .set(
                &self.keys.server_last_seen(&self.identity),
                &current_timestamp().to_string(),
                Some(self.record_ttl),
            )
            .await?;

        let address_key = self.keys.server_address(&self.identity);
        if !self.store.expire(&address_key, self.record_ttl).await? {
            // Expired during an outage; write it again
            self.store
                .set(&address_key, &self.address, Some(self.record_ttl))
                .await?;
        }

        let players_key = self.keys.server_players(&self.identity);
        if !self.store.expire(&players_key, self.record_ttl).await? {
            let online = self.get_player_count().await?;
            self.store.incr_by(&players_key, online as i64).await?;
            self.store.expire(&players_key, self.record_ttl).await?;
        }

        debug!("💓 Heartbeat for '{}'", self.identity);
        Ok(())
    }

    /// Atomically adjusts a server's player counter and returns the new value.
    ///
    /// A result below zero means an exit was counted without its join. The
    /// call compensates only its own share of the overshoot, so concurrent
    /// decrements that each see a negative value never over-correct.
    pub async fn incr_server_player_count(
        &self,
        server: &ServerIdentity,
        delta: i64,
    ) -> Result<i64, ClusterError> {
        let key = self.keys.server_players(server);
        let value = self.store.incr_by(&key, delta).await?;
        if value >= 0 {
            return Ok(value);
        }

        let share = overshoot_share(value, delta);
        if share == 0 {
            // A concurrent decrement pushed it below zero and will correct it
            return Ok(0);
        }
        warn!(
            "⚠️ Player counter for '{}' went negative ({}), clamping to zero",
            server, value
        );
        let corrected = self.store.incr_by(&key, share).await?;
        Ok(corrected.max(0))
    }

    /// Cluster view of a server's player count; missing counts as zero.
    pub async fn server_player_count(&self, server: &ServerIdentity) -> Result<i64, ClusterError> {
        let raw = self.store.get(&self.keys.server_players(server)).await?;
        Ok(raw
            .and_then(|raw| {
                raw.parse::<i64>()
                    .map_err(|_| warn!("Ignoring non-numeric player count '{}' for '{}'", raw, server))
                    .ok()
            })
            .unwrap_or(0)
            .max(0))
    }

    /// Advertised address of a server, `None` when it is not registered.
    pub async fn server_address(&self, server: &ServerIdentity) -> Result<Option<String>, ClusterError> {
        self.store.get(&self.keys.server_address(server)).await
    }

    /// Unix seconds of the server's last heartbeat, `None` once it expired.
    pub async fn last_seen(&self, server: &ServerIdentity) -> Result<Option<u64>, ClusterError> {
        let raw = self.store.get(&self.keys.server_last_seen(server)).await?;
        Ok(raw.and_then(|raw| raw.parse().ok()))
    }

    pub async fn is_alive(&self, server: &ServerIdentity) -> Result<bool, ClusterError> {
        Ok(self.last_seen(server).await?.is_some())
    }

    /// Read-through to the host's configured capacity.
    pub async fn get_max_players(&self) -> Result<usize, ClusterError> {
        let host = self.host.clone();
        self.scheduler.call_sync(move || host.max_players()).await
    }

    /// Read-through to the host's online count. This is local truth and can
    /// differ from the shared counter while updates are in flight.
    pub async fn get_player_count(&self) -> Result<usize, ClusterError> {
        let host = self.host.clone();
        self.scheduler.call_sync(move || host.online_players()).await
    }

    pub async fn has_capacity(&self) -> Result<bool, ClusterError> {
        Ok(self.get_player_count().await? < self.get_max_players().await?)
    }

    /// Removes this server's records on orderly shutdown.
    pub async fn deregister(&self) -> Result<(), ClusterError> {
        self.store.delete(&self.keys.server_players(&self.identity)).await?;
        self.store.delete(&self.keys.server_last_seen(&self.identity)).await?;
        self.store.delete(&self.keys.server_address(&self.identity)).await?;
        info!("📇 Deregistered server '{}'", self.identity);
        Ok(())
    }
}

/// Part of a negative counter `value` caused by this call's own `delta`.
fn overshoot_share(value: i64, delta: i64) -> i64 {
    if value >= 0 || delta >= 0 {
        return 0;
    }
    value.saturating_neg().min(delta.saturating_neg())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HeadlessHost;
    use crate::store::{CoordinationStore, MemoryStore, StoreClientConfig, StoreError, Subscription};
    use crate::types::{Location, PlayerId, WorldId};

    fn registry(store: &MemoryStore, host: &HeadlessHost, id: &str) -> ServerRegistry {
        ServerRegistry::new(
            ServerIdentity::parse(id).unwrap(),
            format!("{id}.local:25565"),
            KeySpace::default(),
            StoreClient::new(Arc::new(store.clone()), StoreClientConfig::default()),
            Arc::new(host.clone()),
            Scheduler::new(Duration::from_millis(5)),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn register_publishes_records() {
        let store = MemoryStore::new();
        let host = HeadlessHost::new(20);
        host.connect_player(PlayerId::new(), Location::new(WorldId::new(), 0.0, 0.0, 0.0));
        let registry = registry(&store, &host, "A");

        registry.register().await.unwrap();

        let me = registry.identify().clone();
        assert_eq!(registry.server_player_count(&me).await.unwrap(), 1);
        assert_eq!(
            registry.server_address(&me).await.unwrap().as_deref(),
            Some("A.local:25565")
        );
        assert!(registry.is_alive(&me).await.unwrap());
    }

    #[tokio::test]
    async fn counter_is_clamped_at_zero() {
        let store = MemoryStore::new();
        let host = HeadlessHost::new(20);
        let registry = registry(&store, &host, "A");
        let me = registry.identify().clone();

        assert_eq!(registry.incr_server_player_count(&me, 2).await.unwrap(), 2);
        assert_eq!(registry.incr_server_player_count(&me, -5).await.unwrap(), 0);
        assert_eq!(registry.server_player_count(&me).await.unwrap(), 0);
        assert_eq!(registry.incr_server_player_count(&me, 1).await.unwrap(), 1);
    }

    /// Holds every decrement until `parties` of them have been applied.
    #[derive(Debug)]
    struct InterleavedDecrements {
        inner: MemoryStore,
        barrier: tokio::sync::Barrier,
    }

    #[async_trait::async_trait]
    impl CoordinationStore for InterleavedDecrements {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.delete(key).await
        }

        async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
            let value = self.inner.incr_by(key, delta).await?;
            if delta < 0 {
                self.barrier.wait().await;
            }
            Ok(value)
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
            self.inner.expire(key, ttl).await
        }

        async fn publish(&self, channel: &str, payload: &str) -> Result<usize, StoreError> {
            self.inner.publish(channel, payload).await
        }

        async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
            self.inner.subscribe(channel).await
        }
    }

    #[tokio::test]
    async fn interleaved_exits_do_not_over_correct() {
        let memory = MemoryStore::new();
        let host = HeadlessHost::new(20);
        let backend = Arc::new(InterleavedDecrements {
            inner: memory.clone(),
            barrier: tokio::sync::Barrier::new(2),
        });
        let registry = ServerRegistry::new(
            ServerIdentity::parse("A").unwrap(),
            "A.local:25565".to_string(),
            KeySpace::default(),
            StoreClient::new(backend, StoreClientConfig::default()),
            Arc::new(host),
            Scheduler::new(Duration::from_millis(5)),
            Duration::from_secs(30),
        );
        let me = registry.identify().clone();

        // Both exits land on an empty counter before either corrects it
        let (first, second) = tokio::join!(
            registry.incr_server_player_count(&me, -1),
            registry.incr_server_player_count(&me, -1)
        );
        assert_eq!(first.unwrap(), 0);
        assert_eq!(second.unwrap(), 0);

        let raw = memory.get(&KeySpace::default().server_players(&me)).await.unwrap();
        assert_eq!(raw.as_deref(), Some("0"));
        assert_eq!(registry.incr_server_player_count(&me, 3).await.unwrap(), 3);
    }

    #[test]
    fn overshoot_share_counts_only_own_delta() {
        assert_eq!(overshoot_share(-1, -1), 1);
        assert_eq!(overshoot_share(-2, -1), 1);
        assert_eq!(overshoot_share(-3, -5), 3);
        assert_eq!(overshoot_share(-1, 1), 0);
        assert_eq!(overshoot_share(4, -1), 0);
    }

    #[tokio::test]
    async fn capacity_reads_through_to_host() {
        let store = MemoryStore::new();
        let host = HeadlessHost::new(1);
        let registry = registry(&store, &host, "A");

        assert!(registry.has_capacity().await.unwrap());
        host.connect_player(PlayerId::new(), Location::new(WorldId::new(), 0.0, 0.0, 0.0));
        assert!(!registry.has_capacity().await.unwrap());
        assert_eq!(registry.get_max_players().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn heartbeat_restores_expired_records() {
        let store = MemoryStore::new();
        let host = HeadlessHost::new(5);
        let registry = registry(&store, &host, "A");
        let me = registry.identify().clone();

        registry.register().await.unwrap();
        registry.deregister().await.unwrap();
        assert!(!registry.is_alive(&me).await.unwrap());
        assert_eq!(registry.server_address(&me).await.unwrap(), None);

        registry.heartbeat().await.unwrap();
        assert!(registry.is_alive(&me).await.unwrap());
        assert!(registry.server_address(&me).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn offline_store_is_soft_failure() {
        let store = MemoryStore::new();
        let host = HeadlessHost::new(5);
        let registry = registry(&store, &host, "A");
        store.set_online(false);

        let err = registry.register().await.unwrap_err();
        assert!(err.is_store_unavailable());
        // Host read-through does not need the store
        assert!(registry.has_capacity().await.unwrap());
    }
}
