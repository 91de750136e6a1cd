//! Key and channel layout in the shared store.

use crate::types::{PlayerId, ServerIdentity};

/// Names every key and channel the coordination layer touches, under one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
    world_channel: String,
    control_channel: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            world_channel: format!("{prefix}:world_repo"),
            control_channel: format!("{prefix}:control"),
            prefix,
        }
    }

    /// Overrides the default channel names.
    pub fn with_channels(mut self, world_channel: impl Into<String>, control_channel: impl Into<String>) -> Self {
        self.world_channel = world_channel.into();
        self.control_channel = control_channel.into();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Channel carrying `WORLD LOAD` requests.
    pub fn world_channel(&self) -> &str {
        &self.world_channel
    }

    /// Channel carrying bare directives such as `SUICIDE`.
    pub fn control_channel(&self) -> &str {
        &self.control_channel
    }

    pub fn server_players(&self, server: &ServerIdentity) -> String {
        format!("{}:server:{}:players", self.prefix, server)
    }

    pub fn server_last_seen(&self, server: &ServerIdentity) -> String {
        format!("{}:server:{}:last_seen", self.prefix, server)
    }

    pub fn server_address(&self, server: &ServerIdentity) -> String {
        format!("{}:server:{}:address", self.prefix, server)
    }

    pub fn player_location(&self, player: PlayerId) -> String {
        format!("{}:player:{}:location", self.prefix, player)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("horizon")
    }
}
