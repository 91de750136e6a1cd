//! Locally raised events and the dispatch wrapper listeners receive.

use super::message::ClusterMessage;
use crate::store::KeySpace;
use crate::types::{PlayerId, ServerIdentity, WorldId};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Debug;

/// An event that can be raised through [`super::EventBus::call_event`].
///
/// After local listeners have run (and only if none cancelled it), the bus
/// asks the event for its cluster form and publishes that. Events that are
/// purely local return `None`.
pub trait ClusterEvent: Send + Sync + Any + Debug {
    /// Stable name used in logs.
    fn event_name(&self) -> &'static str;

    /// Cluster message to publish once local dispatch has completed.
    fn to_cluster_message(&self, _keys: &KeySpace) -> Option<ClusterMessage> {
        None
    }
}

/// An event in flight through local listeners.
///
/// Listeners get exclusive access and may edit the event or cancel it. The
/// bus inspects the result once, after the last listener.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched<E> {
    pub event: E,
    cancelled: bool,
}

impl<E> Dispatched<E> {
    pub fn new(event: E) -> Self {
        Self {
            event,
            cancelled: false,
        }
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn into_inner(self) -> E {
        self.event
    }
}

/// A payload received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub channel: String,
    pub message: String,
    /// Local receive counter, for log correlation
    pub sequence_no: u64,
}

impl ClusterEvent for MessageEvent {
    fn event_name(&self) -> &'static str {
        "cluster_message"
    }
}

/// Asks another server to bring a world up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldLoadRequestEvent {
    pub target: ServerIdentity,
    pub world: WorldId,
}

impl ClusterEvent for WorldLoadRequestEvent {
    fn event_name(&self) -> &'static str {
        "world_load_request"
    }

    fn to_cluster_message(&self, keys: &KeySpace) -> Option<ClusterMessage> {
        Some(ClusterMessage::world_load(keys, &self.target, self.world))
    }
}

/// A player is being handed to another server.
///
/// When the destination world is known the target is asked to activate it
/// ahead of the player's arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerTransferEvent {
    pub player: PlayerId,
    pub target: ServerIdentity,
    pub world: Option<WorldId>,
}

impl ClusterEvent for PlayerTransferEvent {
    fn event_name(&self) -> &'static str {
        "player_transfer"
    }

    fn to_cluster_message(&self, keys: &KeySpace) -> Option<ClusterMessage> {
        self.world
            .map(|world| ClusterMessage::world_load(keys, &self.target, world))
    }
}
