use super::{PlayerSessionSnapshot, SnapshotStore};
use crate::types::{PlayerId, WorldId};
use tracing::warn;

/// Open session that is saved and released when dropped.
///
/// Prefer [`SessionGuard::close`] where an `.await` is possible; dropping
/// the guard schedules the same close on the current runtime.
#[derive(Debug)]
pub struct SessionGuard {
    store: SnapshotStore,
    player: PlayerId,
    world: WorldId,
    closed: bool,
}

impl SessionGuard {
    pub(super) fn new(store: SnapshotStore, player: PlayerId, world: WorldId) -> Self {
        Self {
            store,
            player,
            world,
            closed: false,
        }
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    pub fn world(&self) -> WorldId {
        self.world
    }

    pub fn snapshot(&self) -> Option<PlayerSessionSnapshot> {
        self.store
            .session(self.player)
            .filter(|_| self.store.session_world(self.player) == Some(self.world))
    }

    pub async fn close(mut self) {
        self.closed = true;
        self.store.close_in(self.player, self.world).await;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let store = self.store.clone();
        let (player, world) = (self.player, self.world);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { store.close_in(player, world).await });
            }
            Err(_) => warn!(
                "⚠️ Session for {} in {} dropped outside a runtime; snapshot not saved",
                player, world
            ),
        }
    }
}
