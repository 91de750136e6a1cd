//! Cluster message envelope and the strict command decoder.
//!
//! Payloads are positional tokens joined by NUL. Nothing is acted upon
//! until [`ClusterCommand::decode`] has checked the channel, the field count
//! and every verb.

use crate::error::ClusterError;
use crate::store::KeySpace;
use crate::types::{ServerIdentity, WorldId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved field delimiter inside payloads.
pub const FIELD_DELIMITER: char = '\0';

/// Directive on the control channel that stops the receiving process.
pub const SHUTDOWN_DIRECTIVE: &str = "SUICIDE";

/// One payload on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMessage {
    pub channel: String,
    /// Process-local counter for log correlation; never sent over the wire
    pub sequence_no: u64,
    pub fields: Vec<String>,
}

impl ClusterMessage {
    pub fn new(channel: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            channel: channel.into(),
            sequence_no: 0,
            fields,
        }
    }

    /// Splits a received payload into fields.
    pub fn from_payload(channel: impl Into<String>, sequence_no: u64, payload: &str) -> Self {
        Self {
            channel: channel.into(),
            sequence_no,
            fields: payload.split(FIELD_DELIMITER).map(str::to_string).collect(),
        }
    }

    pub fn with_sequence(mut self, sequence_no: u64) -> Self {
        self.sequence_no = sequence_no;
        self
    }

    /// Wire form of the fields.
    pub fn payload(&self) -> String {
        self.fields.join("\0")
    }

    /// `WORLD LOAD <target> <world>` on the world repository channel.
    pub fn world_load(keys: &KeySpace, target: &ServerIdentity, world: WorldId) -> Self {
        Self::new(
            keys.world_channel(),
            vec![
                "WORLD".to_string(),
                "LOAD".to_string(),
                target.to_string(),
                world.to_string(),
            ],
        )
    }

    /// Shutdown directive on the control channel, optionally authenticated.
    pub fn shutdown(keys: &KeySpace, token: Option<&str>) -> Self {
        let mut fields = vec![SHUTDOWN_DIRECTIVE.to_string()];
        fields.extend(token.map(str::to_string));
        Self::new(keys.control_channel(), fields)
    }
}

impl fmt::Display for ClusterMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} [{}] {}", self.sequence_no, self.channel, self.fields.join(" "))
    }
}

/// Typed cluster command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCommand {
    /// Asks `target` to bring `world` up
    WorldLoad { target: ServerIdentity, world: WorldId },
    /// Asks every receiving process to shut down
    Shutdown { token: Option<String> },
}

impl ClusterCommand {
    /// Decodes `message` according to the channel it arrived on.
    ///
    /// The world repository channel accepts exactly
    /// `WORLD LOAD <server_id> <world_uuid>`; the control channel accepts
    /// `SUICIDE` with an optional token field. Verbs are matched without
    /// regard to case. Anything else is a [`ClusterError::MalformedMessage`].
    pub fn decode(keys: &KeySpace, message: &ClusterMessage) -> Result<Self, ClusterError> {
        let channel = message.channel.trim();
        let fields = &message.fields;

        if channel.eq_ignore_ascii_case(keys.world_channel()) {
            return match fields.as_slice() {
                [verb, action, target, world]
                    if verb.eq_ignore_ascii_case("WORLD") && action.eq_ignore_ascii_case("LOAD") =>
                {
                    let target = ServerIdentity::parse(target).map_err(|e| {
                        ClusterError::MalformedMessage(format!("{message}: bad target: {e}"))
                    })?;
                    let world = world.parse::<WorldId>().map_err(|_| {
                        ClusterError::MalformedMessage(format!("{message}: bad world id '{world}'"))
                    })?;
                    Ok(ClusterCommand::WorldLoad { target, world })
                }
                _ => Err(ClusterError::MalformedMessage(format!(
                    "{message}: expected WORLD LOAD <server> <world>, got {} field(s)",
                    fields.len()
                ))),
            };
        }

        if channel.eq_ignore_ascii_case(keys.control_channel()) {
            return match fields.as_slice() {
                [verb] if verb.eq_ignore_ascii_case(SHUTDOWN_DIRECTIVE) => {
                    Ok(ClusterCommand::Shutdown { token: None })
                }
                [verb, token] if verb.eq_ignore_ascii_case(SHUTDOWN_DIRECTIVE) => Ok(ClusterCommand::Shutdown {
                    token: Some(token.clone()),
                }),
                _ => Err(ClusterError::MalformedMessage(format!(
                    "{message}: unknown control directive"
                ))),
            };
        }

        Err(ClusterError::MalformedMessage(format!(
            "{message}: not a cluster channel"
        )))
    }
}
