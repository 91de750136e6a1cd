//! `WORLD LOAD` traffic between nodes

use super::{fast_config, start_core, start_node, wait_until};
use crate::bus::{ClusterMessage, WorldLoadRequestEvent};
use crate::error::HostError;
use crate::host::{HeadlessHost, HostAdapter};
use crate::store::MemoryStore;
use crate::types::{LivePlayerState, Location, PlayerId, PlayerVitals, ServerIdentity, WorldEnvironment, WorldId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

#[tokio::test]
async fn world_load_activates_target_exactly_once() {
    let store = MemoryStore::new();
    let a = start_node(&store, "A").await;
    let b = start_node(&store, "B").await;
    let keys = b.core.config().keys.clone();
    let world = WorldId::new();

    b.core
        .bus()
        .publish(ClusterMessage::world_load(&keys, a.core.identify(), world))
        .await
        .unwrap();
    wait_until("first activation", || a.host.is_world_loaded(world)).await;
    assert_eq!(a.host.load_calls(), vec![(world, WorldEnvironment::Normal)]);

    // Duplicate, then a load addressed elsewhere, then a marker
    let marker = WorldId::new();
    let bus = b.core.bus();
    bus.publish(ClusterMessage::world_load(&keys, a.core.identify(), world))
        .await
        .unwrap();
    bus.publish(ClusterMessage::world_load(&keys, b.core.identify(), WorldId::new()))
        .await
        .unwrap();
    bus.publish(ClusterMessage::world_load(&keys, a.core.identify(), marker))
        .await
        .unwrap();
    wait_until("marker activation", || a.host.is_world_loaded(marker)).await;

    let loads = a.host.load_calls();
    assert_eq!(loads.len(), 2);
    assert_eq!(loads[1], (marker, WorldEnvironment::Normal));
    wait_until("load addressed to B", || b.host.load_calls().len() == 1).await;
}

#[tokio::test]
async fn short_world_load_is_discarded() {
    let store = MemoryStore::new();
    let a = start_node(&store, "A").await;
    let b = start_node(&store, "B").await;
    let channel = a.core.config().keys.world_channel().to_string();
    let marker = WorldId::new();

    b.core.store().publish(&channel, "WORLD\0LOAD\0A").await.unwrap();
    b.core
        .store()
        .publish(&channel, &format!("world\0load\0A\0{marker}"))
        .await
        .unwrap();
    wait_until("marker activation", || a.host.is_world_loaded(marker)).await;

    assert_eq!(a.host.load_calls(), vec![(marker, WorldEnvironment::Normal)]);
    assert_eq!(a.core.bus().stats().malformed_messages, 1);
}

#[tokio::test]
async fn request_event_reaches_target_node() {
    let store = MemoryStore::new();
    let a = start_node(&store, "A").await;
    let b = start_node(&store, "B").await;
    let world = WorldId::new();

    let dispatched = a
        .core
        .call_event(WorldLoadRequestEvent {
            target: b.core.identify().clone(),
            world,
        })
        .await;
    assert!(!dispatched.is_cancelled());

    wait_until("activation on B", || b.host.is_world_loaded(world)).await;
    assert!(a.host.load_calls().is_empty());
}

#[tokio::test]
async fn cancelled_request_never_leaves_the_node() {
    let store = MemoryStore::new();
    let a = start_node(&store, "A").await;
    let b = start_node(&store, "B").await;
    let target = b.core.identify().clone();
    let vetoed = WorldId::new();
    let marker = WorldId::new();

    a.core.bus().on::<WorldLoadRequestEvent, _>("veto", move |event| {
        if event.event.world == vetoed {
            event.cancel();
        }
        Ok(())
    });

    let dispatched = a
        .core
        .call_event(WorldLoadRequestEvent {
            target: target.clone(),
            world: vetoed,
        })
        .await;
    assert!(dispatched.is_cancelled());

    a.core.call_event(WorldLoadRequestEvent { target, world: marker }).await;
    wait_until("marker activation", || b.host.is_world_loaded(marker)).await;
    assert_eq!(b.host.load_calls(), vec![(marker, WorldEnvironment::Normal)]);
    assert_eq!(a.core.bus().stats().events_cancelled, 1);
}

#[tokio::test]
async fn listener_can_redirect_a_request() {
    let store = MemoryStore::new();
    let a = start_node(&store, "A").await;
    let b = start_node(&store, "B").await;
    let world = WorldId::new();
    let b_id = b.core.identify().clone();

    a.core.bus().on::<WorldLoadRequestEvent, _>("reroute", move |event| {
        event.event.target = b_id.clone();
        Ok(())
    });
    a.core
        .call_event(WorldLoadRequestEvent {
            target: ServerIdentity::parse("nowhere").unwrap(),
            world,
        })
        .await;

    wait_until("activation on B", || b.host.is_world_loaded(world)).await;
}

#[tokio::test]
async fn failed_activation_can_be_requested_again() {
    let store = MemoryStore::new();
    let a = start_node(&store, "A").await;
    let b = start_node(&store, "B").await;
    let keys = b.core.config().keys.clone();
    let world = WorldId::new();
    a.host.fail_world_loads(world, "region files locked");

    b.core
        .bus()
        .publish(ClusterMessage::world_load(&keys, a.core.identify(), world))
        .await
        .unwrap();
    wait_until("failed attempt", || {
        a.host.load_calls().len() == 1 && !a.core.activator().is_active(world)
    })
    .await;

    a.host.clear_world_failures();
    b.core
        .bus()
        .publish(ClusterMessage::world_load(&keys, a.core.identify(), world))
        .await
        .unwrap();
    wait_until("second attempt", || a.host.is_world_loaded(world)).await;
    assert_eq!(a.host.load_calls().len(), 2);
}

/// Host whose load of one world stalls until the test opens the gate.
#[derive(Debug)]
struct GatedHost {
    inner: HeadlessHost,
    slow_world: WorldId,
    slow_load_started: AtomicBool,
    gate: Mutex<bool>,
    opened: Condvar,
}

impl GatedHost {
    fn open(&self) {
        *self.gate.lock().unwrap() = true;
        self.opened.notify_all();
    }
}

impl HostAdapter for GatedHost {
    fn max_players(&self) -> usize {
        self.inner.max_players()
    }

    fn online_players(&self) -> usize {
        self.inner.online_players()
    }

    fn load_world(&self, world: WorldId, environment: WorldEnvironment) -> Result<(), HostError> {
        if world == self.slow_world {
            self.slow_load_started.store(true, Ordering::SeqCst);
            let mut open = self.gate.lock().unwrap();
            while !*open {
                open = self.opened.wait(open).unwrap();
            }
        }
        self.inner.load_world(world, environment)
    }

    fn player_state(&self, player: PlayerId) -> Option<LivePlayerState> {
        self.inner.player_state(player)
    }

    fn apply_player_state(
        &self,
        player: PlayerId,
        vitals: &PlayerVitals,
        bed_location: Option<Location>,
    ) -> Result<(), HostError> {
        self.inner.apply_player_state(player, vitals, bed_location)
    }

    fn transfer_player(&self, player: PlayerId, address: &str) -> Result<(), HostError> {
        self.inner.transfer_player(player, address)
    }

    fn request_shutdown(&self) {
        self.inner.request_shutdown()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_world_load_does_not_stall_the_channel() {
    let store = MemoryStore::new();
    let snapshots = tempfile::tempdir().unwrap();
    let slow = WorldId::new();
    let host = Arc::new(GatedHost {
        inner: HeadlessHost::new(100),
        slow_world: slow,
        slow_load_started: AtomicBool::new(false),
        gate: Mutex::new(false),
        opened: Condvar::new(),
    });
    let a = start_core(fast_config("A", snapshots.path()), &store, host.clone()).await;
    let b = start_node(&store, "B").await;
    let keys = b.core.config().keys.clone();
    let next = WorldId::new();

    b.core
        .bus()
        .publish(ClusterMessage::world_load(&keys, a.identify(), slow))
        .await
        .unwrap();
    wait_until("slow load to start", || host.slow_load_started.load(Ordering::SeqCst)).await;

    b.core
        .bus()
        .publish(ClusterMessage::world_load(&keys, a.identify(), next))
        .await
        .unwrap();
    wait_until("second request taken while the first is loading", || {
        a.bus().stats().messages_received == 2 && a.activator().is_active(next)
    })
    .await;
    assert!(!host.inner.is_world_loaded(slow));

    host.open();
    wait_until("both worlds loaded", || {
        host.inner.is_world_loaded(slow) && host.inner.is_world_loaded(next)
    })
    .await;
    a.shutdown().await;
}
