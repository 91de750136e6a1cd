//! # Player Session Snapshots
//!
//! Per-(player, world) record of transient player state, kept on disk so a
//! player's vitals and position survive moving between servers and worlds.
//!
//! Files live at `<root>/<world_uuid>/<player_uuid>.json`:
//!
//! ```json
//! {
//!   "lastLocation": { "world": "…", "x": 0.5, "y": 64.0, "z": 0.5, "yaw": 0.0, "pitch": 0.0 },
//!   "bedLocation": null,
//!   "air": 300, "fire": 0, "food": 20, "experience": 0,
//!   "exhaustion": 0.0, "saturation": 5.0, "fallDistance": 0.0
//! }
//! ```
//!
//! Absent locations are written as explicit `null`. Fields missing from
//! older files load as zero. Every write builds the full record in memory
//! and replaces the file through a rename, so a file is never half old and
//! half new.

use crate::error::ClusterError;
use crate::host::HostAdapter;
use crate::scheduler::Scheduler;
use crate::types::{LivePlayerState, Location, PlayerId, PlayerVitals, WorldId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

mod guard;

pub use guard::SessionGuard;

/// Stored state of one player in one world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerSessionSnapshot {
    pub last_location: Option<Location>,
    pub bed_location: Option<Location>,
    pub air: i32,
    pub fire: i32,
    pub food: i32,
    pub experience: i32,
    pub exhaustion: f32,
    pub saturation: f32,
    pub fall_distance: f32,
}

impl PlayerSessionSnapshot {
    /// Copies every tracked field from a live player.
    pub fn from_live(state: &LivePlayerState) -> Self {
        let vitals = state.vitals;
        Self {
            last_location: Some(state.location),
            bed_location: state.bed_location,
            air: vitals.air,
            fire: vitals.fire,
            food: vitals.food,
            experience: vitals.experience,
            exhaustion: vitals.exhaustion,
            saturation: vitals.saturation,
            fall_distance: vitals.fall_distance,
        }
    }

    pub fn vitals(&self) -> PlayerVitals {
        PlayerVitals {
            air: self.air,
            fire: self.fire,
            food: self.food,
            experience: self.experience,
            exhaustion: self.exhaustion,
            saturation: self.saturation,
            fall_distance: self.fall_distance,
        }
    }
}

#[derive(Debug, Clone)]
struct OpenSession {
    world: WorldId,
    snapshot: PlayerSessionSnapshot,
}

/// Disk-backed snapshot store with one open session per connected player.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: Arc<PathBuf>,
    host: Arc<dyn HostAdapter>,
    scheduler: Scheduler,
    sessions: Arc<DashMap<PlayerId, OpenSession>>,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>, host: Arc<dyn HostAdapter>, scheduler: Scheduler) -> Self {
        Self {
            root: Arc::new(root.into()),
            host,
            scheduler,
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, player: PlayerId, world: WorldId) -> PathBuf {
        self.root.join(world.to_string()).join(format!("{player}.json"))
    }

    /// Opens the player's session in `world`, loading the stored snapshot or
    /// creating one from the live player.
    ///
    /// A session the player still has in another world is closed (and saved)
    /// first.
    ///
    /// # Returns
    ///
    /// The session's snapshot. Fails with `SnapshotIo` when the file cannot
    /// be read and the player is not connected to fall back on.
    pub async fn open(&self, player: PlayerId, world: WorldId) -> Result<PlayerSessionSnapshot, ClusterError> {
        if let Some(existing) = self.sessions.get(&player).map(|session| session.world) {
            if existing == world {
                return self.session(player).ok_or(ClusterError::PlayerOffline(player));
            }
            self.close(player).await;
        }

        let snapshot = match self.load(player, world).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => self.populate(player, world).await?,
            Err(load_error) => {
                error!("❌ Failed to load snapshot for {} in {}: {}", player, world, load_error);
                self.populate(player, world).await.map_err(|_| {
                    ClusterError::SnapshotIo(format!(
                        "{load_error}; player {player} is not connected to repopulate"
                    ))
                })?
            }
        };

        self.sessions.insert(
            player,
            OpenSession {
                world,
                snapshot: snapshot.clone(),
            },
        );
        debug!("📂 Opened session for {} in {}", player, world);
        Ok(snapshot)
    }

    /// Like [`SnapshotStore::open`], returning a guard that closes the
    /// session when dropped.
    pub async fn open_scoped(&self, player: PlayerId, world: WorldId) -> Result<SessionGuard, ClusterError> {
        self.open(player, world).await?;
        Ok(SessionGuard::new(self.clone(), player, world))
    }

    /// Saves and releases the player's open session. Failures are logged.
    pub async fn close(&self, player: PlayerId) {
        let Some((_, session)) = self.sessions.remove(&player) else {
            return;
        };
        self.persist_closed(player, session).await;
    }

    /// Closes the session only if it is still the one for `world`.
    pub(crate) async fn close_in(&self, player: PlayerId, world: WorldId) {
        let Some((_, session)) = self.sessions.remove_if(&player, |_, session| session.world == world) else {
            return;
        };
        self.persist_closed(player, session).await;
    }

    /// Closes every open session.
    pub async fn close_all(&self) {
        let players: Vec<PlayerId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let count = players.len();
        for player in players {
            self.close(player).await;
        }
        if count > 0 {
            info!("💾 Closed {} player session(s)", count);
        }
    }

    pub fn session(&self, player: PlayerId) -> Option<PlayerSessionSnapshot> {
        self.sessions.get(&player).map(|session| session.snapshot.clone())
    }

    /// World of the player's open session.
    pub fn session_world(&self, player: PlayerId) -> Option<WorldId> {
        self.sessions.get(&player).map(|session| session.world)
    }

    /// Edits the open session in place. Returns `false` if there is none.
    pub fn update_session(&self, player: PlayerId, update: impl FnOnce(&mut PlayerSessionSnapshot)) -> bool {
        match self.sessions.get_mut(&player) {
            Some(mut session) => {
                update(&mut session.snapshot);
                true
            }
            None => false,
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Reads the stored snapshot, `None` when there is no file.
    pub async fn load(&self, player: PlayerId, world: WorldId) -> Result<Option<PlayerSessionSnapshot>, ClusterError> {
        let path = self.path_for(player, world);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ClusterError::SnapshotIo(format!("read {}: {e}", path.display()))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ClusterError::SnapshotIo(format!("parse {}: {e}", path.display())))
    }

    /// Builds a first snapshot from the live player, who must be connected
    /// and in `world`. The sampled location is dropped: it is where the
    /// player arrived, not where they left off.
    pub async fn populate(&self, player: PlayerId, world: WorldId) -> Result<PlayerSessionSnapshot, ClusterError> {
        let state = self
            .live_state(player)
            .await?
            .filter(|state| state.world == world)
            .ok_or(ClusterError::PlayerOffline(player))?;

        let mut snapshot = PlayerSessionSnapshot::from_live(&state);
        snapshot.last_location = None;
        Ok(snapshot)
    }

    /// Writes `snapshot`, first refreshing its location from the live
    /// player if they are still connected in `world`.
    pub async fn save(
        &self,
        player: PlayerId,
        world: WorldId,
        snapshot: &mut PlayerSessionSnapshot,
    ) -> Result<(), ClusterError> {
        match self.live_state(player).await {
            Ok(Some(state)) if state.world == world => snapshot.last_location = Some(state.location),
            Ok(_) => {}
            Err(e) => debug!("Could not resample location for {}: {}", player, e),
        }

        let path = self.path_for(player, world);
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomically(&path, &bytes).await?;
        debug!("💾 Saved snapshot for {} in {}", player, world);
        Ok(())
    }

    /// Restores stored vitals and bed location onto the live player.
    pub async fn apply(&self, player: PlayerId, snapshot: &PlayerSessionSnapshot) -> Result<(), ClusterError> {
        let host = self.host.clone();
        let vitals = snapshot.vitals();
        let bed_location = snapshot.bed_location;
        self.scheduler
            .call_sync(move || host.apply_player_state(player, &vitals, bed_location))
            .await??;
        Ok(())
    }

    async fn live_state(&self, player: PlayerId) -> Result<Option<LivePlayerState>, ClusterError> {
        let host = self.host.clone();
        self.scheduler.call_sync(move || host.player_state(player)).await
    }

    async fn persist_closed(&self, player: PlayerId, session: OpenSession) {
        let OpenSession { world, mut snapshot } = session;
        match self.save(player, world, &mut snapshot).await {
            Ok(()) => debug!("📁 Closed session for {} in {}", player, world),
            Err(e) => error!("❌ Failed to save snapshot for {} in {} on close: {}", player, world, e),
        }
    }
}

/// Writes `<path>.tmp` and renames it over `path`.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), ClusterError> {
    let io_error = |action: &str, e: std::io::Error| {
        ClusterError::SnapshotIo(format!("{action} {}: {e}", path.display()))
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error("create directory for", e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error("write", e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        warn!("Rename of {} failed, removing temp file", tmp.display());
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error("replace", e));
    }
    Ok(())
}
