//! Session state handed from one node to another through a shared snapshot root

use super::{fast_config, start_core};
use crate::host::{HeadlessHost, HostAdapter};
use crate::store::MemoryStore;
use crate::types::{Location, PlayerId, PlayerVitals, WorldId};
use std::sync::Arc;

#[tokio::test]
async fn session_follows_player_between_nodes() {
    let store = MemoryStore::new();
    let shared = tempfile::tempdir().unwrap();
    let host_a = HeadlessHost::new(10);
    let host_b = HeadlessHost::new(10);
    let a = start_core(fast_config("A", shared.path()), &store, Arc::new(host_a.clone())).await;
    let b = start_core(fast_config("B", shared.path()), &store, Arc::new(host_b.clone())).await;

    let player = PlayerId::new();
    let world = WorldId::new();
    let bed = Location::new(world, 10.0, 65.0, -4.0);
    let vitals = PlayerVitals {
        air: 120,
        fire: 0,
        food: 14,
        experience: 730,
        exhaustion: 1.25,
        saturation: 3.5,
        fall_distance: 0.0,
    };

    host_a.connect_player(player, Location::new(world, 0.0, 64.0, 0.0));
    host_a.update_player(player, |state| {
        state.vitals = vitals;
        state.bed_location = Some(bed);
    });
    a.player_joined(player, world).await;
    a.snapshots().open(player, world).await.unwrap();

    let last = Location::new(world, 52.5, 70.0, 18.25).with_rotation(90.0, -12.5);
    host_a.update_player(player, |state| state.location = last);
    a.player_exited(player, world).await;
    host_a.disconnect_player(player);
    assert!(a.snapshots().path_for(player, world).exists());

    host_b.connect_player(player, Location::new(world, 0.0, 64.0, 0.0));
    b.player_joined(player, world).await;
    let snapshot = b.snapshots().open(player, world).await.unwrap();
    assert_eq!(snapshot.last_location, Some(last));
    assert_eq!(snapshot.vitals(), vitals);

    b.snapshots().apply(player, &snapshot).await.unwrap();
    let restored = host_b.player_state(player).unwrap();
    assert_eq!(restored.vitals, vitals);
    assert_eq!(restored.bed_location, Some(bed));
}

#[tokio::test]
async fn shutdown_saves_open_sessions() {
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let host = HeadlessHost::new(10);
    let core = start_core(fast_config("A", dir.path()), &store, Arc::new(host.clone())).await;

    let worlds = [WorldId::new(), WorldId::new()];
    let players = [PlayerId::new(), PlayerId::new()];
    for (&player, &world) in players.iter().zip(&worlds) {
        host.connect_player(player, Location::new(world, 1.0, 2.0, 3.0));
        core.snapshots().open(player, world).await.unwrap();
    }
    assert_eq!(core.snapshots().open_sessions(), 2);

    core.shutdown().await;
    assert_eq!(core.snapshots().open_sessions(), 0);
    for (&player, &world) in players.iter().zip(&worlds) {
        let saved = core.snapshots().load(player, world).await.unwrap().unwrap();
        assert_eq!(saved.last_location, Some(Location::new(world, 1.0, 2.0, 3.0)));
    }
}
