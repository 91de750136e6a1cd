//! # Core Type Definitions
//!
//! Identifier and value types shared by every cluster component.
//!
//! ## Key Types
//!
//! - [`PlayerId`] - Unique identifier for a player across the whole cluster
//! - [`WorldId`] - Unique identifier for a world that some server may host
//! - [`ServerIdentity`] - This process's validated cluster identity
//! - [`Location`] - 3D position inside a world, with orientation
//! - [`PlayerVitals`] - Transient per-world player state carried by snapshots

use crate::error::ClusterError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a player in the cluster.
///
/// This is a wrapper around UUID that provides type safety and ensures
/// player IDs cannot be confused with world IDs.
///
/// ```rust
/// use horizon_cluster::PlayerId;
///
/// let player_id: PlayerId = "550e8400-e29b-41d4-a716-446655440000".parse()?;
/// println!("Player ID: {}", player_id);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Creates a new random player ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a world.
///
/// Worlds are named by UUID cluster-wide so any server can be asked to
/// activate one by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorldId(pub Uuid);

impl WorldId {
    /// Creates a new random world ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for WorldId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for WorldId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Longest identity accepted by [`ServerIdentity::parse`].
pub const MAX_IDENTITY_LEN: usize = 64;

/// Cluster identity of one server process.
///
/// Derived from the advertised host and listening port, or taken verbatim
/// from an administrator override. Identities travel inside NUL-delimited
/// message payloads and store keys, so the accepted alphabet is narrow:
/// ASCII alphanumerics plus `.`, `_`, `-` and `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerIdentity(String);

impl ServerIdentity {
    /// Validates a raw identity string.
    pub fn parse(raw: &str) -> Result<Self, ClusterError> {
        if raw.is_empty() {
            return Err(ClusterError::InvalidServerIdentity(
                "identity must not be empty".to_string(),
            ));
        }
        if raw.len() > MAX_IDENTITY_LEN {
            return Err(ClusterError::InvalidServerIdentity(format!(
                "identity '{raw}' exceeds {MAX_IDENTITY_LEN} characters"
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':')))
        {
            return Err(ClusterError::InvalidServerIdentity(format!(
                "identity '{}' contains forbidden character {:?}",
                raw.escape_debug(),
                bad
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Derives the identity for a process listening on `host:port`.
    ///
    /// A non-empty `override_id` wins over the derived value; either way
    /// the result is validated.
    pub fn derive(host: &str, port: u16, override_id: Option<&str>) -> Result<Self, ClusterError> {
        match override_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Self::parse(id),
            None => Self::parse(&format!("{host}:{port}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServerIdentity {
    type Error = ClusterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ServerIdentity> for String {
    fn from(id: ServerIdentity) -> Self {
        id.0
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Environment a world is brought up with on activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorldEnvironment {
    Normal,
    Nether,
    TheEnd,
}

impl fmt::Display for WorldEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorldEnvironment::Normal => "NORMAL",
            WorldEnvironment::Nether => "NETHER",
            WorldEnvironment::TheEnd => "THE_END",
        };
        f.write_str(name)
    }
}

/// A position inside a world, with look direction.
///
/// Serialized as a nested object so snapshot files stay readable:
/// `{"world": "<uuid>", "x": 0.5, "y": 64.0, "z": -3.5, "yaw": 90.0, "pitch": 0.0}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: WorldId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl Location {
    pub fn new(world: WorldId, x: f64, y: f64, z: f64) -> Self {
        Self {
            world,
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn with_rotation(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }
}

/// Transient vitals of a live player entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerVitals {
    pub air: i32,
    pub fire: i32,
    pub food: i32,
    pub experience: i32,
    pub exhaustion: f32,
    pub saturation: f32,
    pub fall_distance: f32,
}

/// Everything the host reports about a connected player.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePlayerState {
    /// World the player is currently in
    pub world: WorldId,
    pub location: Location,
    pub bed_location: Option<Location>,
    pub vitals: PlayerVitals,
}

/// Returns the current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_identity_from_address() {
        let id = ServerIdentity::derive("10.0.0.7", 25565, None).unwrap();
        assert_eq!(id.as_str(), "10.0.0.7:25565");
    }

    #[test]
    fn override_wins_over_address() {
        let id = ServerIdentity::derive("10.0.0.7", 25565, Some("A")).unwrap();
        assert_eq!(id.as_str(), "A");

        // A blank override falls back to the derived value
        let id = ServerIdentity::derive("10.0.0.7", 25565, Some("  ")).unwrap();
        assert_eq!(id.as_str(), "10.0.0.7:25565");
    }

    #[test]
    fn rejects_malformed_identities() {
        assert!(ServerIdentity::parse("").is_err());
        assert!(ServerIdentity::parse("has space").is_err());
        assert!(ServerIdentity::parse("nul\0byte").is_err());
        assert!(ServerIdentity::parse(&"x".repeat(MAX_IDENTITY_LEN + 1)).is_err());
        assert!(ServerIdentity::parse("lobby-01.eu_west:25565").is_ok());
    }

    #[test]
    fn identity_deserialization_is_validated() {
        let ok: Result<ServerIdentity, _> = serde_json::from_str("\"B\"");
        assert!(ok.is_ok());
        let bad: Result<ServerIdentity, _> = serde_json::from_str("\"a b\"");
        assert!(bad.is_err());
    }

    #[test]
    fn world_id_parses() {
        let world: WorldId = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        assert_eq!(world.to_string(), "11111111-1111-1111-1111-111111111111");
        assert!("not-a-uuid".parse::<WorldId>().is_err());
    }
}
