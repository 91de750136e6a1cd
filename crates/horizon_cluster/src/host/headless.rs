//! Engine-less host used by the standalone node and by tests.
//!
//! Keeps players and worlds in memory and records what the coordination
//! layer asked of it.

use super::HostAdapter;
use crate::error::HostError;
use crate::types::{LivePlayerState, Location, PlayerId, PlayerVitals, WorldEnvironment, WorldId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::info;

#[derive(Debug, Default)]
struct HeadlessInner {
    max_players: AtomicUsize,
    players: DashMap<PlayerId, LivePlayerState>,
    worlds: DashMap<WorldId, WorldEnvironment>,
    load_calls: Mutex<Vec<(WorldId, WorldEnvironment)>>,
    failing_worlds: DashMap<WorldId, String>,
    transfers: Mutex<Vec<(PlayerId, String)>>,
    shutdown_requested: AtomicBool,
    shutdown_notify: Notify,
}

/// In-memory [`HostAdapter`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct HeadlessHost {
    inner: Arc<HeadlessInner>,
}

impl HeadlessHost {
    pub fn new(max_players: usize) -> Self {
        let host = Self::default();
        host.inner.max_players.store(max_players, Ordering::Relaxed);
        host
    }

    /// Places a player on this host as if they had just connected.
    pub fn connect_player(&self, player: PlayerId, location: Location) {
        self.inner.players.insert(
            player,
            LivePlayerState {
                world: location.world,
                location,
                bed_location: None,
                vitals: PlayerVitals::default(),
            },
        );
    }

    pub fn disconnect_player(&self, player: PlayerId) -> bool {
        self.inner.players.remove(&player).is_some()
    }

    /// Mutates the live state of a connected player. Returns `false` when offline.
    pub fn update_player(&self, player: PlayerId, update: impl FnOnce(&mut LivePlayerState)) -> bool {
        match self.inner.players.get_mut(&player) {
            Some(mut state) => {
                update(&mut state);
                state.world = state.location.world;
                true
            }
            None => false,
        }
    }

    pub fn is_world_loaded(&self, world: WorldId) -> bool {
        self.inner.worlds.contains_key(&world)
    }

    /// Every `load_world` call in order, including failed ones.
    pub fn load_calls(&self) -> Vec<(WorldId, WorldEnvironment)> {
        self.inner
            .load_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Makes subsequent loads of `world` fail with `reason`.
    pub fn fail_world_loads(&self, world: WorldId, reason: impl Into<String>) {
        self.inner.failing_worlds.insert(world, reason.into());
    }

    pub fn clear_world_failures(&self) {
        self.inner.failing_worlds.clear();
    }

    pub fn transfers(&self) -> Vec<(PlayerId, String)> {
        self.inner
            .transfers
            .lock()
            .map(|transfers| transfers.clone())
            .unwrap_or_default()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.inner.shutdown_requested.load(Ordering::Acquire)
    }

    /// Resolves once [`HostAdapter::request_shutdown`] has been called.
    pub async fn wait_for_shutdown_request(&self) {
        let notified = self.inner.shutdown_notify.notified();
        if self.shutdown_requested() {
            return;
        }
        notified.await;
    }
}

impl HostAdapter for HeadlessHost {
    fn max_players(&self) -> usize {
        self.inner.max_players.load(Ordering::Relaxed)
    }

    fn online_players(&self) -> usize {
        self.inner.players.len()
    }

    fn load_world(&self, world: WorldId, environment: WorldEnvironment) -> Result<(), HostError> {
        if let Ok(mut calls) = self.inner.load_calls.lock() {
            calls.push((world, environment));
        }
        if let Some(reason) = self.inner.failing_worlds.get(&world) {
            return Err(HostError::WorldLoad(world.to_string(), reason.clone()));
        }
        self.inner.worlds.entry(world).or_insert(environment);
        info!("🌍 World {} loaded ({})", world, environment);
        Ok(())
    }

    fn player_state(&self, player: PlayerId) -> Option<LivePlayerState> {
        self.inner.players.get(&player).map(|state| state.clone())
    }

    fn apply_player_state(
        &self,
        player: PlayerId,
        vitals: &PlayerVitals,
        bed_location: Option<Location>,
    ) -> Result<(), HostError> {
        let mut state = self
            .inner
            .players
            .get_mut(&player)
            .ok_or(HostError::PlayerNotOnline(player))?;
        state.vitals = *vitals;
        state.bed_location = bed_location;
        Ok(())
    }

    fn transfer_player(&self, player: PlayerId, address: &str) -> Result<(), HostError> {
        if self.inner.players.remove(&player).is_none() {
            return Err(HostError::PlayerNotOnline(player));
        }
        if let Ok(mut transfers) = self.inner.transfers.lock() {
            transfers.push((player, address.to_string()));
        }
        info!("🔀 Player {} handed over to {}", player, address);
        Ok(())
    }

    fn request_shutdown(&self) {
        if !self.inner.shutdown_requested.swap(true, Ordering::AcqRel) {
            info!("🛑 Host shutdown requested");
        }
        self.inner.shutdown_notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_players_and_capacity() {
        let host = HeadlessHost::new(2);
        let world = WorldId::new();
        let player = PlayerId::new();
        assert_eq!(host.max_players(), 2);
        host.connect_player(player, Location::new(world, 0.0, 64.0, 0.0));
        assert_eq!(host.online_players(), 1);
        assert_eq!(host.player_state(player).unwrap().world, world);
        assert!(host.disconnect_player(player));
        assert!(host.player_state(player).is_none());
    }

    #[test]
    fn records_world_loads_and_failures() {
        let host = HeadlessHost::new(10);
        let ok = WorldId::new();
        let broken = WorldId::new();
        host.fail_world_loads(broken, "disk full");

        assert!(host.load_world(ok, WorldEnvironment::Normal).is_ok());
        assert!(host.load_world(broken, WorldEnvironment::Normal).is_err());
        assert!(host.is_world_loaded(ok));
        assert!(!host.is_world_loaded(broken));
        assert_eq!(host.load_calls().len(), 2);
    }

    #[test]
    fn transfer_requires_online_player() {
        let host = HeadlessHost::new(10);
        let player = PlayerId::new();
        assert!(host.transfer_player(player, "10.0.0.2:25565").is_err());
        host.connect_player(player, Location::new(WorldId::new(), 0.0, 0.0, 0.0));
        assert!(host.transfer_player(player, "10.0.0.2:25565").is_ok());
        assert_eq!(host.transfers(), vec![(player, "10.0.0.2:25565".to_string())]);
        assert_eq!(host.online_players(), 0);
    }

    #[tokio::test]
    async fn shutdown_request_wakes_waiters() {
        let host = HeadlessHost::new(1);
        let waiter = {
            let host = host.clone();
            tokio::spawn(async move { host.wait_for_shutdown_request().await })
        };
        tokio::task::yield_now().await;
        host.request_shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(host.shutdown_requested());
    }
}
