//! Store outages, liveness records and the control channel

use super::{start_node, wait_until, wait_until_async};
use crate::bus::{ClusterMessage, WorldLoadRequestEvent};
use crate::error::ClusterError;
use crate::host::HostAdapter;
use crate::reconnect::ConnectDecision;
use crate::store::{CoordinationStore, MemoryStore};
use crate::types::{Location, PlayerId, ServerIdentity, WorldId};
use std::time::Duration;

#[tokio::test]
async fn outage_degrades_to_local_state() {
    let store = MemoryStore::new();
    let a = start_node(&store, "A").await;
    let player = PlayerId::new();
    let world = WorldId::new();
    a.host.connect_player(player, Location::new(world, 0.0, 64.0, 0.0));

    store.set_online(false);

    let bounded = Duration::from_secs(2);
    tokio::time::timeout(bounded, a.core.player_joined(player, world))
        .await
        .expect("join must not hang on a dead store");

    let published_before = a.core.bus().stats().messages_published;
    let dispatched = tokio::time::timeout(
        bounded,
        a.core.call_event(WorldLoadRequestEvent {
            target: ServerIdentity::parse("B").unwrap(),
            world,
        }),
    )
    .await
    .unwrap();
    assert!(!dispatched.is_cancelled());
    assert_eq!(a.core.bus().stats().messages_published, published_before);

    assert_eq!(a.core.get_player_count().await.unwrap(), 1);
    assert_eq!(
        a.core.reconnect().handle_connect(player, world).await,
        ConnectDecision::Stay
    );
    let redirect = a
        .core
        .reconnect()
        .redirect(player, &ServerIdentity::parse("B").unwrap(), Some(world))
        .await;
    assert!(matches!(redirect, Err(ClusterError::StoreUnavailable(_))));
    assert!(a.host.player_state(player).is_some());

    tokio::time::timeout(bounded, a.core.player_exited(player, world))
        .await
        .expect("exit must not hang on a dead store");
}

#[tokio::test]
async fn subscriptions_recover_after_outage() {
    let store = MemoryStore::new();
    let a = start_node(&store, "A").await;
    let keys = a.core.config().keys.clone();
    let channel = keys.world_channel().to_string();

    store.set_online(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.subscriber_count(&channel), 0);

    store.set_online(true);
    wait_until("re-subscription", || store.subscriber_count(&channel) == 1).await;

    let world = WorldId::new();
    let message = ClusterMessage::world_load(&keys, a.core.identify(), world);
    store.publish(&channel, &message.payload()).await.unwrap();
    wait_until("activation after recovery", || a.host.is_world_loaded(world)).await;
}

#[tokio::test]
async fn heartbeat_recreates_expired_records() {
    let store = MemoryStore::new();
    let a = start_node(&store, "A").await;
    let keys = a.core.config().keys.clone();
    let me = a.core.identify().clone();

    store.delete(&keys.server_last_seen(&me)).await.unwrap();
    store.delete(&keys.server_address(&me)).await.unwrap();
    assert!(!a.core.registry().is_alive(&me).await.unwrap());

    let registry = a.core.registry();
    let probe = me.clone();
    wait_until_async("heartbeat", move || {
        let probe = probe.clone();
        async move { matches!(registry.server_address(&probe).await, Ok(Some(_))) }
    })
    .await;
    assert!(registry.is_alive(&me).await.unwrap());
    assert_eq!(
        registry.server_address(&me).await.unwrap().as_deref(),
        Some(registry.address())
    );
}

#[tokio::test]
async fn shutdown_directive_reaches_host() {
    let store = MemoryStore::new();
    let a = start_node(&store, "A").await;
    let channel = a.core.config().keys.control_channel().to_string();

    store.publish(&channel, "SUICIDE\0extra\0fields").await.unwrap();
    store.publish(&channel, "suicide").await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), a.host.wait_for_shutdown_request())
        .await
        .expect("host never asked to shut down");
    assert_eq!(a.core.bus().stats().malformed_messages, 1);
}

#[tokio::test]
async fn orderly_shutdown_leaves_the_cluster() {
    let store = MemoryStore::new();
    let a = start_node(&store, "A").await;
    let b = start_node(&store, "B").await;
    let keys = a.core.config().keys.clone();
    let world_channel = keys.world_channel().to_string();
    wait_until("both subscribed", || store.subscriber_count(&world_channel) == 2).await;

    a.core.shutdown().await;
    assert!(!b.core.registry().is_alive(a.core.identify()).await.unwrap());
    assert_eq!(b.core.registry().server_address(a.core.identify()).await.unwrap(), None);
    wait_until("A unsubscribed", || store.subscriber_count(&world_channel) == 1).await;

    // Nothing reaches A any more
    let world = WorldId::new();
    b.core
        .bus()
        .publish(ClusterMessage::world_load(&keys, a.core.identify(), world))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(a.host.load_calls().is_empty());
}
