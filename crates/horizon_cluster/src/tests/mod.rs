//! Multi-process scenarios
//!
//! Several [`ClusterCore`]s share one [`MemoryStore`], exactly as separate
//! server processes would share an external store. Each node gets its own
//! headless host and snapshot directory.

#[cfg(test)]
pub mod world_activation_test;


#[cfg(test)]
pub mod degradation_test;

#[cfg(test)]
pub mod snapshot_handover_test;

use crate::coordinator::{ClusterConfig, ClusterCore};
use crate::host::{HeadlessHost, HostAdapter};
use crate::store::{CircuitBreakerConfig, MemoryStore, StoreClientConfig};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// One simulated server process.
pub struct Node {
    pub core: ClusterCore,
    pub host: HeadlessHost,
    _snapshots: TempDir,
}

/// Timings shrunk so scenarios finish in milliseconds.
pub fn fast_config(server_id: &str, snapshot_root: &Path) -> ClusterConfig {
    ClusterConfig {
        server_id: Some(server_id.to_string()),
        tick: Duration::from_millis(5),
        heartbeat_interval: Duration::from_millis(50),
        resubscribe_backoff: Duration::from_millis(20),
        snapshot_root: snapshot_root.to_path_buf(),
        store: StoreClientConfig {
            operation_timeout: Duration::from_millis(200),
            breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                reset_timeout: Duration::from_millis(50),
                success_threshold: 1,
            },
        },
        ..ClusterConfig::default()
    }
}

pub async fn start_node(store: &MemoryStore, server_id: &str) -> Node {
    let snapshots = tempfile::tempdir().unwrap();
    let host = HeadlessHost::new(100);
    let config = fast_config(server_id, snapshots.path());
    let core = start_core(config, store, Arc::new(host.clone())).await;
    Node {
        core,
        host,
        _snapshots: snapshots,
    }
}

pub async fn start_core(config: ClusterConfig, store: &MemoryStore, host: Arc<dyn HostAdapter>) -> ClusterCore {
    let core = ClusterCore::new(config, Arc::new(store.clone()), host).unwrap();
    core.start().await.unwrap();
    core
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// [`wait_until`] for conditions that need the store.
pub async fn wait_until_async<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
