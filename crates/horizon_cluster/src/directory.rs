//! # Player Location Directory
//!
//! Maps each player to the server, and the world on it, currently hosting
//! them. One key per player holds `"<server>\0<world>"`; a missing key means
//! the player is not tracked. Writes are last-writer-wins upserts and
//! deletes, both idempotent.

use crate::error::ClusterError;
use crate::store::{KeySpace, StoreClient};
use crate::types::{PlayerId, ServerIdentity, WorldId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Separator between server and world in a directory value.
const ENTRY_DELIMITER: char = '\0';

/// Where the directory says a player is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerLocationEntry {
    pub player_id: PlayerId,
    /// `None` when the player is not tracked
    pub server_id: Option<ServerIdentity>,
    pub world_id: Option<WorldId>,
}

impl PlayerLocationEntry {
    pub fn untracked(player_id: PlayerId) -> Self {
        Self {
            player_id,
            server_id: None,
            world_id: None,
        }
    }

    pub fn is_tracked(&self) -> bool {
        self.server_id.is_some()
    }

    fn encode(server: &ServerIdentity, world: Option<WorldId>) -> String {
        match world {
            Some(world) => format!("{server}{ENTRY_DELIMITER}{world}"),
            None => format!("{server}{ENTRY_DELIMITER}"),
        }
    }

    fn decode(player_id: PlayerId, raw: &str) -> Result<Self, ClusterError> {
        let (server, world) = raw.split_once(ENTRY_DELIMITER).unwrap_or((raw, ""));
        let server_id = ServerIdentity::parse(server).map_err(|e| {
            ClusterError::MalformedMessage(format!("directory entry for {player_id}: {e}"))
        })?;
        let world_id = match world {
            "" => None,
            world => Some(world.parse().map_err(|_| {
                ClusterError::MalformedMessage(format!(
                    "directory entry for {player_id} has invalid world '{world}'"
                ))
            })?),
        };
        Ok(Self {
            player_id,
            server_id: Some(server_id),
            world_id,
        })
    }
}

/// Shared player-to-server directory.
#[derive(Debug, Clone)]
pub struct LocationDirectory {
    keys: KeySpace,
    store: StoreClient,
}

impl LocationDirectory {
    pub fn new(keys: KeySpace, store: StoreClient) -> Self {
        Self { keys, store }
    }

    /// Records `player` as hosted by `server`, optionally in `world`.
    pub async fn set_server(
        &self,
        player: PlayerId,
        server: &ServerIdentity,
        world: Option<WorldId>,
    ) -> Result<(), ClusterError> {
        let value = PlayerLocationEntry::encode(server, world);
        self.store
            .set(&self.keys.player_location(player), &value, None)
            .await?;
        debug!("📍 Player {} -> server '{}'", player, server);
        Ok(())
    }

    /// Removes the player's entry. Clearing an untracked player is a no-op.
    pub async fn clear_server(&self, player: PlayerId) -> Result<(), ClusterError> {
        let existed = self.store.delete(&self.keys.player_location(player)).await?;
        if existed {
            debug!("📍 Player {} no longer tracked", player);
        }
        Ok(())
    }

    pub async fn lookup(&self, player: PlayerId) -> Result<PlayerLocationEntry, ClusterError> {
        match self.store.get(&self.keys.player_location(player)).await? {
            Some(raw) => PlayerLocationEntry::decode(player, &raw),
            None => Ok(PlayerLocationEntry::untracked(player)),
        }
    }
}
