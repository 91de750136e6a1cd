//! Error types for the coordination layer.
//!
//! Failures are grouped by how callers are expected to react: store
//! unavailability degrades to local-only behavior, malformed messages are
//! dropped, snapshot I/O failures are logged at error level, and an invalid
//! server identity aborts startup.

use crate::types::PlayerId;

/// Enumeration of coordination failures.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The shared store could not be reached within the bounded wait.
    /// Soft failure: log at warn and continue on local state.
    #[error("Coordination store unavailable: {0}")]
    StoreUnavailable(String),

    /// A cluster payload failed arity or verb validation.
    #[error("Malformed cluster message: {0}")]
    MalformedMessage(String),

    /// Reading or writing a session snapshot file failed.
    #[error("Snapshot I/O failure: {0}")]
    SnapshotIo(String),

    /// The configured or derived server identity is not usable. Fatal at startup.
    #[error("Invalid server identity: {0}")]
    InvalidServerIdentity(String),

    /// The operation needs the player's live entity but the player is not connected here.
    #[error("Player {0} is not connected to this server")]
    PlayerOffline(PlayerId),

    /// A task descriptor failed validation.
    #[error("Invalid task descriptor: {0}")]
    InvalidTask(String),

    /// The host engine rejected an operation.
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// The primary execution context is no longer accepting work.
    #[error("Primary execution context has stopped")]
    SchedulerClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    /// True for failures the caller should treat as "store is down, keep going".
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, ClusterError::StoreUnavailable(_))
    }
}

/// Errors reported by a [`crate::host::HostAdapter`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    #[error("World {0} could not be loaded: {1}")]
    WorldLoad(String, String),

    #[error("Player {0} is not online")]
    PlayerNotOnline(PlayerId),

    #[error("Transfer failed: {0}")]
    Transfer(String),
}

/// Errors raised by local event listeners.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),

    #[error("Handler not found: {0}")]
    HandlerNotFound(String),
}
