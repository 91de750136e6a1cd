//! # Remote World Activator
//!
//! Brings a world up on this server at most once per process lifetime, no
//! matter how many `WORLD LOAD` requests arrive for it. The dedupe mark is
//! set before the host is asked to load and is only withdrawn when that
//! load fails, so a later request can retry.

use crate::host::HostAdapter;
use crate::scheduler::Scheduler;
use crate::types::{WorldEnvironment, WorldId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Result of an activation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// The host loaded the world during this call
    Activated,
    /// The world was already active or being activated; nothing was done
    AlreadyActive,
    /// The host failed to load the world; the mark was rolled back
    Failed(String),
}

/// Process-local world activation with dedupe.
#[derive(Debug, Clone)]
pub struct WorldActivator {
    active: Arc<Mutex<HashSet<WorldId>>>,
    host: Arc<dyn HostAdapter>,
    scheduler: Scheduler,
}

impl WorldActivator {
    pub fn new(host: Arc<dyn HostAdapter>, scheduler: Scheduler) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashSet::new())),
            host,
            scheduler,
        }
    }

    /// Activates `world` unless it is already marked.
    ///
    /// The host load runs on the primary context. Failures are logged and
    /// reported in the outcome; nothing is sent back to the requester.
    pub async fn activate(&self, world: WorldId, environment: WorldEnvironment) -> ActivationOutcome {
        if !self.mark(world) {
            debug!("World {} already active, ignoring activation request", world);
            return ActivationOutcome::AlreadyActive;
        }

        let host = self.host.clone();
        let result = self
            .scheduler
            .call_sync(move || host.load_world(world, environment))
            .await;

        let failure = match result {
            Ok(Ok(())) => {
                info!("🌍 Activated world {} ({})", world, environment);
                return ActivationOutcome::Activated;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };

        self.unmark(world);
        error!("❌ Failed to activate world {}: {}", world, failure);
        ActivationOutcome::Failed(failure)
    }

    pub fn is_active(&self, world: WorldId) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(&world))
            .unwrap_or(false)
    }

    pub fn active_worlds(&self) -> Vec<WorldId> {
        self.active
            .lock()
            .map(|active| active.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns `true` if this call placed the mark.
    fn mark(&self, world: WorldId) -> bool {
        match self.active.lock() {
            Ok(mut active) => active.insert(world),
            Err(poisoned) => poisoned.into_inner().insert(world),
        }
    }

    fn unmark(&self, world: WorldId) {
        match self.active.lock() {
            Ok(mut active) => active.remove(&world),
            Err(poisoned) => poisoned.into_inner().remove(&world),
        };
    }
}
