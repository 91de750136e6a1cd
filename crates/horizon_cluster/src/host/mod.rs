//! # Host Adapter
//!
//! The coordination layer never owns players or worlds; it drives the host
//! game engine through [`HostAdapter`]. Every method is synchronous and is
//! only ever invoked on the primary execution context
//! ([`crate::scheduler::Scheduler::call_sync`]), so implementations can
//! touch engine state without further locking on the engine side.

use crate::error::HostError;
use crate::types::{LivePlayerState, Location, PlayerId, PlayerVitals, WorldEnvironment, WorldId};
use std::fmt::Debug;

pub mod headless;

pub use headless::HeadlessHost;

/// Interface to the host game engine.
pub trait HostAdapter: Send + Sync + Debug {
    /// Configured player capacity of this server.
    fn max_players(&self) -> usize;

    /// Players currently connected to this server.
    fn online_players(&self) -> usize;

    /// Loads (or creates) a world so players can be placed in it.
    ///
    /// # Arguments
    ///
    /// * `world` - Cluster-wide world identifier
    /// * `environment` - Environment the world is created with if it does not exist yet
    fn load_world(&self, world: WorldId, environment: WorldEnvironment) -> Result<(), HostError>;

    /// Samples the live state of a connected player, `None` when offline.
    fn player_state(&self, player: PlayerId) -> Option<LivePlayerState>;

    /// Writes stored vitals and bed location back onto a live player.
    fn apply_player_state(
        &self,
        player: PlayerId,
        vitals: &PlayerVitals,
        bed_location: Option<Location>,
    ) -> Result<(), HostError>;

    /// Hands the player's connection over to another server at `address`.
    fn transfer_player(&self, player: PlayerId, address: &str) -> Result<(), HostError>;

    /// Begins an orderly local shutdown.
    fn request_shutdown(&self);
}
