//! # Horizon Cluster
//!
//! Distributed session coordination for a cluster of Horizon server
//! processes that share one world and player space. Processes never talk
//! to each other directly: a shared key-value store with publish/subscribe
//! channels is the only link.
//!
//! ## Core Features
//!
//! - **Server Registry**: validated identity, player counters and liveness records with TTLs
//! - **Player Location Directory**: which server (and world) each player is on
//! - **Cluster Event Bus**: cancellable local events that become cluster messages
//! - **World Activation**: `WORLD LOAD` requests bring a world up exactly once per process
//! - **Reconnection**: redirects with the directory always updated before the hand-over
//! - **Session Snapshots**: per-world player state on disk, written atomically
//!
//! ## Architecture Overview
//!
//! [`ClusterCore`] composes the components and is what a host integration
//! talks to. The host engine itself sits behind [`HostAdapter`]; every call
//! into it is made on the primary execution context owned by
//! [`Scheduler`]. Store access goes through [`StoreClient`], which bounds
//! every wait and turns outages into [`ClusterError::StoreUnavailable`].
//!
//! ## Quick Start Example
//!
//! ```rust,no_run
//! use horizon_cluster::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let host = Arc::new(HeadlessHost::new(100));
//!     let config = ClusterConfig {
//!         server_id: Some("lobby-1".to_string()),
//!         ..ClusterConfig::default()
//!     };
//!
//!     let core = ClusterCore::new(config, store, host)?;
//!     core.start().await?;
//!
//!     let player = PlayerId::new();
//!     let world = WorldId::new();
//!     core.player_joined(player, world).await;
//!
//!     // Ask server "lobby-2" to bring a world up
//!     core.call_event(WorldLoadRequestEvent {
//!         target: ServerIdentity::parse("lobby-2")?,
//!         world,
//!     })
//!     .await;
//!
//!     core.player_exited(player, world).await;
//!     core.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod activator;
pub mod bus;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod host;
pub mod reconnect;
pub mod registry;
pub mod scheduler;
pub mod shutdown;
pub mod snapshot;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use activator::{ActivationOutcome, WorldActivator};
pub use bus::{
    ClusterCommand, ClusterEvent, ClusterMessage, Dispatched, EventBus, EventBusStats, MessageEvent,
    PlayerTransferEvent, WorldLoadRequestEvent,
};
pub use coordinator::{ClusterConfig, ClusterCore};
pub use directory::{LocationDirectory, PlayerLocationEntry};
pub use error::{ClusterError, EventError, HostError};
pub use host::{HeadlessHost, HostAdapter};
pub use reconnect::{ConnectDecision, ReconnectionHandler};
pub use registry::ServerRegistry;
pub use scheduler::{Scheduler, TaskDescriptor, TaskHandle, TaskMode};
pub use shutdown::ShutdownState;
pub use snapshot::{PlayerSessionSnapshot, SessionGuard, SnapshotStore};
pub use store::{
    CoordinationStore, KeySpace, MemoryStore, RedisConfig, RedisStore, StoreClient, StoreClientConfig,
    StoreError, Subscription,
};
pub use types::*;
