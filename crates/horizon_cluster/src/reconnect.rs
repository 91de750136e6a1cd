//! # Reconnection Handler
//!
//! Moves players whose authoritative location is another server.
//!
//! A redirect always updates the directory first, then announces the
//! transfer on the bus (so the target can pre-activate the world), and only
//! then hands the connection over. A player is never gone from this server
//! while the directory still points here.

use crate::bus::{EventBus, PlayerTransferEvent};
use crate::directory::LocationDirectory;
use crate::error::{ClusterError, HostError};
use crate::host::HostAdapter;
use crate::registry::ServerRegistry;
use crate::scheduler::Scheduler;
use crate::types::{PlayerId, ServerIdentity, WorldId};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to do with a player that just connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectDecision {
    /// The player belongs here
    Stay,
    /// The player was handed to `target`
    Redirect { target: ServerIdentity, address: String },
}

/// Redirects players to the server that owns them.
#[derive(Debug, Clone)]
pub struct ReconnectionHandler {
    registry: ServerRegistry,
    directory: LocationDirectory,
    bus: Arc<EventBus>,
    host: Arc<dyn HostAdapter>,
    scheduler: Scheduler,
    departing: Arc<DashMap<PlayerId, ServerIdentity>>,
}

impl ReconnectionHandler {
    pub fn new(
        registry: ServerRegistry,
        directory: LocationDirectory,
        bus: Arc<EventBus>,
        host: Arc<dyn HostAdapter>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            registry,
            directory,
            bus,
            host,
            scheduler,
            departing: Arc::new(DashMap::new()),
        }
    }

    /// Hands `player` to `target`, optionally into `world`.
    ///
    /// # Returns
    ///
    /// `Ok(address)` of the target once the host accepted the transfer. On
    /// any error the player stays connected here and the directory keeps
    /// (or gets back) this server.
    pub async fn redirect(
        &self,
        player: PlayerId,
        target: &ServerIdentity,
        world: Option<WorldId>,
    ) -> Result<String, ClusterError> {
        let me = self.registry.identify().clone();
        if *target == me {
            return Err(HostError::Transfer(format!("player {player} is already on '{me}'")).into());
        }

        let host = self.host.clone();
        let current_world = self
            .scheduler
            .call_sync(move || host.player_state(player).map(|state| state.world))
            .await?
            .ok_or(ClusterError::PlayerOffline(player))?;

        let address = self
            .registry
            .server_address(target)
            .await?
            .ok_or_else(|| HostError::Transfer(format!("server '{target}' has no registered address")))?;

        // (1) directory first; if this fails the player stays put
        self.directory.set_server(player, target, world).await?;

        // (2) give the target a chance to warm the world up
        self.bus
            .call_event(PlayerTransferEvent {
                player,
                target: target.clone(),
                world,
            })
            .await;

        // (3) hand over the connection
        self.departing.insert(player, target.clone());
        let host = self.host.clone();
        let handover = address.clone();
        let transferred = self
            .scheduler
            .call_sync(move || host.transfer_player(player, &handover))
            .await
            .and_then(|result| result.map_err(ClusterError::from));

        match transferred {
            Ok(()) => {
                info!("🔀 Redirected player {} to '{}' ({})", player, target, address);
                Ok(address)
            }
            Err(e) => {
                self.departing.remove(&player);
                if let Err(restore) = self.directory.set_server(player, &me, Some(current_world)).await {
                    warn!(
                        "⚠️ Could not restore directory entry for {} after failed transfer: {}",
                        player, restore
                    );
                }
                warn!("⚠️ Transfer of {} to '{}' failed: {}", player, target, e);
                Err(e)
            }
        }
    }

    /// Decides whether a freshly connected player belongs elsewhere and, if
    /// so, redirects them. Store trouble always resolves to [`ConnectDecision::Stay`].
    pub async fn handle_connect(&self, player: PlayerId, world: WorldId) -> ConnectDecision {
        match self.owner_elsewhere(player).await {
            Ok(Some((target, owned_world))) => {
                match self.redirect(player, &target, owned_world.or(Some(world))).await {
                    Ok(address) => ConnectDecision::Redirect { target, address },
                    Err(_) => ConnectDecision::Stay,
                }
            }
            Ok(None) => ConnectDecision::Stay,
            Err(e) => {
                warn!("⚠️ Directory check for {} failed, keeping player here: {}", player, e);
                ConnectDecision::Stay
            }
        }
    }

    /// Consumes the "departing via redirect" mark for `player`.
    pub fn take_departing(&self, player: PlayerId) -> bool {
        self.departing.remove(&player).is_some()
    }

    /// Another live server that the directory says owns `player`.
    async fn owner_elsewhere(
        &self,
        player: PlayerId,
    ) -> Result<Option<(ServerIdentity, Option<WorldId>)>, ClusterError> {
        let entry = self.directory.lookup(player).await?;
        let Some(owner) = entry.server_id else {
            return Ok(None);
        };
        if owner == *self.registry.identify() {
            return Ok(None);
        }
        if !self.registry.is_alive(&owner).await? {
            debug!("Directory names '{}' for {} but it is gone; keeping player", owner, player);
            return Ok(None);
        }
        Ok(Some((owner, entry.world_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HeadlessHost;
    use crate::store::{CoordinationStore, KeySpace, MemoryStore, StoreClient, StoreClientConfig};
    use crate::types::Location;
    use futures::StreamExt;
    use std::time::Duration;

    struct Fixture {
        store: MemoryStore,
        host: HeadlessHost,
        handler: ReconnectionHandler,
        directory: LocationDirectory,
        peer: ServerRegistry,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let host = HeadlessHost::new(10);
        let client = StoreClient::new(Arc::new(store.clone()), StoreClientConfig::default());
        let scheduler = Scheduler::new(Duration::from_millis(5));
        let keys = KeySpace::default();
        let registry_for = |id: &str, host: &HeadlessHost| {
            ServerRegistry::new(
                ServerIdentity::parse(id).unwrap(),
                format!("{id}.local:25565"),
                keys.clone(),
                client.clone(),
                Arc::new(host.clone()),
                scheduler.clone(),
                Duration::from_secs(30),
            )
        };
        let registry = registry_for("A", &host);
        let peer = registry_for("B", &HeadlessHost::new(10));
        let directory = LocationDirectory::new(keys.clone(), client.clone());
        let bus = Arc::new(EventBus::new(keys, client));
        let handler = ReconnectionHandler::new(
            registry,
            directory.clone(),
            bus,
            Arc::new(host.clone()),
            scheduler,
        );
        Fixture {
            store,
            host,
            handler,
            directory,
            peer,
        }
    }

    #[tokio::test]
    async fn redirect_updates_directory_before_transfer() {
        let f = fixture();
        f.peer.register().await.unwrap();
        let player = PlayerId::new();
        let world = WorldId::new();
        f.host.connect_player(player, Location::new(WorldId::new(), 0.0, 64.0, 0.0));
        let mut sub = f.store.subscribe("horizon:world_repo").await.unwrap();

        let target = f.peer.identify().clone();
        let address = f.handler.redirect(player, &target, Some(world)).await.unwrap();

        assert_eq!(address, "B.local:25565");
        assert_eq!(f.directory.lookup(player).await.unwrap().server_id, Some(target));
        assert_eq!(sub.next().await, Some(format!("WORLD\0LOAD\0B\0{world}")));
        assert_eq!(f.host.transfers(), vec![(player, address)]);
        assert!(f.handler.take_departing(player));
        assert!(!f.handler.take_departing(player));
    }

    #[tokio::test]
    async fn unknown_target_aborts_before_directory_write() {
        let f = fixture();
        let player = PlayerId::new();
        f.host.connect_player(player, Location::new(WorldId::new(), 0.0, 64.0, 0.0));

        let target = ServerIdentity::parse("ghost").unwrap();
        assert!(f.handler.redirect(player, &target, None).await.is_err());
        assert!(!f.directory.lookup(player).await.unwrap().is_tracked());
        assert!(f.host.transfers().is_empty());
        assert!(f.host.player_state(player).is_some());
    }

    #[tokio::test]
    async fn store_outage_keeps_player() {
        let f = fixture();
        f.peer.register().await.unwrap();
        let player = PlayerId::new();
        f.host.connect_player(player, Location::new(WorldId::new(), 0.0, 64.0, 0.0));
        let target = f.peer.identify().clone();

        f.store.set_online(false);
        let result = f.handler.redirect(player, &target, None).await;
        assert!(result.unwrap_err().is_store_unavailable());
        assert!(f.host.transfers().is_empty());
        assert!(!f.handler.take_departing(player));
    }

    #[tokio::test]
    async fn connect_redirects_to_live_owner() {
        let f = fixture();
        f.peer.register().await.unwrap();
        let player = PlayerId::new();
        let world = WorldId::new();
        let target = f.peer.identify().clone();
        f.directory.set_server(player, &target, Some(world)).await.unwrap();
        f.host.connect_player(player, Location::new(WorldId::new(), 0.0, 64.0, 0.0));

        let decision = f.handler.handle_connect(player, WorldId::new()).await;
        assert_eq!(
            decision,
            ConnectDecision::Redirect {
                target,
                address: "B.local:25565".to_string()
            }
        );
    }

    #[tokio::test]
    async fn connect_stays_when_owner_is_dead_or_store_down() {
        let f = fixture();
        let player = PlayerId::new();
        let dead = ServerIdentity::parse("B").unwrap();
        f.directory.set_server(player, &dead, None).await.unwrap();
        f.host.connect_player(player, Location::new(WorldId::new(), 0.0, 64.0, 0.0));

        assert_eq!(f.handler.handle_connect(player, WorldId::new()).await, ConnectDecision::Stay);

        f.store.set_online(false);
        assert_eq!(f.handler.handle_connect(player, WorldId::new()).await, ConnectDecision::Stay);
    }
}
