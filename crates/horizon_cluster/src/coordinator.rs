//! # Cluster Core
//!
//! Composition root that host integrations talk to. It owns every
//! coordination component, runs the inbound subscription loops and the
//! registry heartbeat, and exposes the small collaborator surface:
//! [`ClusterCore::identify`], [`ClusterCore::call_event`],
//! [`ClusterCore::player_joined`], [`ClusterCore::player_exited`],
//! [`ClusterCore::run_task`], the player counts and
//! [`ClusterCore::shutdown`].
//!
//! Store and decode failures stop here. They are logged and never returned
//! into host callbacks.

use crate::activator::{ActivationOutcome, WorldActivator};
use crate::bus::{ClusterCommand, ClusterEvent, Dispatched, EventBus};
use crate::directory::LocationDirectory;
use crate::error::ClusterError;
use crate::host::HostAdapter;
use crate::reconnect::ReconnectionHandler;
use crate::registry::{ServerRegistry, DEFAULT_RECORD_TTL};
use crate::scheduler::{Scheduler, TaskDescriptor, TaskHandle, DEFAULT_TICK};
use crate::shutdown::ShutdownState;
use crate::snapshot::SnapshotStore;
use crate::store::{CoordinationStore, KeySpace, StoreClient, StoreClientConfig, Subscription};
use crate::types::{PlayerId, ServerIdentity, WorldEnvironment, WorldId};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything needed to assemble a [`ClusterCore`].
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Advertised host of this server
    pub host: String,
    pub port: u16,
    /// Administrator override for the derived `host:port` identity
    pub server_id: Option<String>,
    pub keys: KeySpace,
    /// Lifetime of server records without a heartbeat
    pub record_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub snapshot_root: PathBuf,
    /// Host time quantum
    pub tick: Duration,
    /// Wait between attempts to re-establish a lost subscription
    pub resubscribe_backoff: Duration,
    /// When set, shutdown directives must carry this token
    pub shutdown_token: Option<String>,
    pub store: StoreClientConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 25565,
            server_id: None,
            keys: KeySpace::default(),
            record_ttl: DEFAULT_RECORD_TTL,
            heartbeat_interval: Duration::from_secs(10),
            snapshot_root: PathBuf::from("data/snapshots"),
            tick: DEFAULT_TICK,
            resubscribe_backoff: Duration::from_secs(2),
            shutdown_token: None,
            store: StoreClientConfig::default(),
        }
    }
}

#[derive(Debug)]
struct CoreInner {
    config: ClusterConfig,
    host: Arc<dyn HostAdapter>,
    store: StoreClient,
    scheduler: Scheduler,
    registry: ServerRegistry,
    directory: LocationDirectory,
    bus: Arc<EventBus>,
    activator: WorldActivator,
    reconnect: ReconnectionHandler,
    snapshots: SnapshotStore,
    shutdown: ShutdownState,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

/// The coordination layer of one server process.
#[derive(Debug, Clone)]
pub struct ClusterCore {
    inner: Arc<CoreInner>,
}

impl ClusterCore {
    /// Assembles the core. Must be called from within a tokio runtime.
    ///
    /// # Returns
    ///
    /// `InvalidServerIdentity` when neither the override nor the derived
    /// `host:port` is a usable identity. Startup must not continue then.
    pub fn new(
        config: ClusterConfig,
        backend: Arc<dyn CoordinationStore>,
        host: Arc<dyn HostAdapter>,
    ) -> Result<Self, ClusterError> {
        let identity = ServerIdentity::derive(&config.host, config.port, config.server_id.as_deref())?;
        let address = format!("{}:{}", config.host, config.port);

        let store = StoreClient::new(backend, config.store.clone());
        let scheduler = Scheduler::new(config.tick);
        let registry = ServerRegistry::new(
            identity,
            address,
            config.keys.clone(),
            store.clone(),
            host.clone(),
            scheduler.clone(),
            config.record_ttl,
        );
        let directory = LocationDirectory::new(config.keys.clone(), store.clone());
        let bus = Arc::new(EventBus::new(config.keys.clone(), store.clone()));
        let activator = WorldActivator::new(host.clone(), scheduler.clone());
        let reconnect = ReconnectionHandler::new(
            registry.clone(),
            directory.clone(),
            bus.clone(),
            host.clone(),
            scheduler.clone(),
        );
        let snapshots = SnapshotStore::new(config.snapshot_root.clone(), host.clone(), scheduler.clone());

        Ok(Self {
            inner: Arc::new(CoreInner {
                config,
                host,
                store,
                scheduler,
                registry,
                directory,
                bus,
                activator,
                reconnect,
                snapshots,
                shutdown: ShutdownState::new(),
                loops: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn identify(&self) -> &ServerIdentity {
        self.inner.registry.identify()
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &StoreClient {
        &self.inner.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.inner.registry
    }

    pub fn directory(&self) -> &LocationDirectory {
        &self.inner.directory
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn activator(&self) -> &WorldActivator {
        &self.inner.activator
    }

    pub fn reconnect(&self) -> &ReconnectionHandler {
        &self.inner.reconnect
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.inner.snapshots
    }

    pub fn shutdown_state(&self) -> &ShutdownState {
        &self.inner.shutdown
    }

    /// Registers this server, starts the heartbeat and subscribes to the
    /// world repository and control channels.
    ///
    /// An unreachable store is not fatal: the loops keep retrying and the
    /// heartbeat re-creates the records once the store is back.
    pub async fn start(&self) -> Result<(), ClusterError> {
        let keys = &self.inner.config.keys;
        info!(
            "🚀 Starting cluster coordination as '{}' (prefix '{}')",
            self.identify(),
            keys.prefix()
        );
        if self.inner.config.shutdown_token.is_none() {
            warn!(
                "⚠️ No shutdown token configured: any publisher on '{}' can stop this server",
                keys.control_channel()
            );
        }

        if let Err(e) = self.inner.registry.register().await {
            warn!("⚠️ Initial registration failed, heartbeat will retry: {}", e);
        }

        let heartbeat_ticks = duration_in_ticks(self.inner.config.heartbeat_interval, self.inner.config.tick);
        let registry = self.inner.registry.clone();
        self.inner.scheduler.run_future_task(
            TaskDescriptor::async_repeating(heartbeat_ticks, heartbeat_ticks),
            move || {
                let registry = registry.clone();
                async move {
                    if let Err(e) = registry.heartbeat().await {
                        warn!("⚠️ Heartbeat failed: {}", e);
                    }
                }
            },
        )?;

        for channel in [keys.world_channel().to_string(), keys.control_channel().to_string()] {
            // Subscribe before returning so messages published right after start are seen
            let initial = match self.inner.store.subscribe(&channel).await {
                Ok(subscription) => {
                    info!("📡 Subscribed to '{}'", channel);
                    Some(subscription)
                }
                Err(e) => {
                    warn!("⚠️ Could not subscribe to '{}' yet: {}", channel, e);
                    None
                }
            };
            let core = self.clone();
            let handle = tokio::spawn(async move { core.inbound_loop(channel, initial).await });
            if let Ok(mut loops) = self.inner.loops.lock() {
                loops.push(handle);
            }
        }
        Ok(())
    }

    /// Raises a local event; see [`EventBus::call_event`].
    pub async fn call_event<E: ClusterEvent>(&self, event: E) -> Dispatched<E> {
        self.inner.bus.call_event(event).await
    }

    /// Records a player joining this server in `world`.
    pub async fn player_joined(&self, player: PlayerId, world: WorldId) {
        let me = self.identify();
        if let Err(e) = self.inner.registry.incr_server_player_count(me, 1).await {
            warn!("⚠️ Could not count join of {}: {}", player, e);
        }
        if let Err(e) = self.inner.directory.set_server(player, me, Some(world)).await {
            warn!("⚠️ Could not record {} in the directory: {}", player, e);
        }
    }

    /// Records a player leaving this server.
    ///
    /// A player leaving because of a redirect keeps the directory entry
    /// that already names the target. Any open snapshot session is closed.
    pub async fn player_exited(&self, player: PlayerId, world: WorldId) {
        let me = self.identify();
        if let Err(e) = self.inner.registry.incr_server_player_count(me, -1).await {
            warn!("⚠️ Could not count exit of {}: {}", player, e);
        }
        if self.inner.reconnect.take_departing(player) {
            debug!("Player {} left {} via redirect; directory already updated", player, world);
        } else if let Err(e) = self.inner.directory.clear_server(player).await {
            warn!("⚠️ Could not clear {} from the directory: {}", player, e);
        }
        self.inner.snapshots.close(player).await;
    }

    pub fn run_task<F>(&self, descriptor: TaskDescriptor, task: F) -> Result<TaskHandle, ClusterError>
    where
        F: FnMut() + Send + 'static,
    {
        self.inner.scheduler.run_task(descriptor, task)
    }

    pub async fn get_max_players(&self) -> Result<usize, ClusterError> {
        self.inner.registry.get_max_players().await
    }

    pub async fn get_player_count(&self) -> Result<usize, ClusterError> {
        self.inner.registry.get_player_count().await
    }

    /// Acts on a decoded cluster command.
    pub async fn handle_command(&self, command: ClusterCommand) {
        match command {
            ClusterCommand::WorldLoad { target, world } => {
                if target != *self.identify() {
                    debug!("WORLD LOAD for '{}' is not for us", target);
                    return;
                }
                if let ActivationOutcome::Failed(reason) =
                    self.inner.activator.activate(world, WorldEnvironment::Normal).await
                {
                    debug!("Activation of {} requested over the bus failed: {}", world, reason);
                }
            }
            ClusterCommand::Shutdown { token } => {
                if let Some(expected) = &self.inner.config.shutdown_token {
                    if token.as_deref() != Some(expected.as_str()) {
                        warn!("🚫 Ignoring shutdown directive with a missing or wrong token");
                        return;
                    }
                }
                warn!("🛑 Shutdown directive received over the control channel");
                let host = self.inner.host.clone();
                if let Err(e) = self.inner.scheduler.call_sync(move || host.request_shutdown()).await {
                    error!("❌ Could not forward shutdown request to host: {}", e);
                }
            }
        }
    }

    /// Stops the loops, saves every open session and removes this server's
    /// records. Only the first call does anything.
    pub async fn shutdown(&self) {
        if !self.inner.shutdown.initiate_shutdown() {
            return;
        }
        info!("🛑 Shutting down cluster coordination for '{}'", self.identify());

        self.inner.scheduler.cancel_all();
        let loops = self
            .inner
            .loops
            .lock()
            .map(|mut loops| std::mem::take(&mut *loops))
            .unwrap_or_default();
        for handle in loops {
            handle.abort();
        }

        self.inner.snapshots.close_all().await;
        if let Err(e) = self.inner.registry.deregister().await {
            warn!("⚠️ Could not remove server records: {}", e);
        }

        self.inner.shutdown.complete_shutdown();
        info!("✅ Cluster coordination stopped");
    }

    async fn inbound_loop(self, channel: String, mut subscription: Option<Subscription>) {
        let shutdown = self.inner.shutdown.clone();
        loop {
            if shutdown.is_shutdown_initiated() {
                return;
            }

            if let Some(mut active) = subscription.take() {
                loop {
                    tokio::select! {
                        _ = shutdown.wait() => return,
                        payload = active.next() => {
                            let Some(payload) = payload else {
                                warn!("⚠️ Lost subscription to '{}', retrying", channel);
                                break;
                            };
                            if let Some(command) = self.inner.bus.receive(&channel, &payload) {
                                // A slow world load must not hold up later messages;
                                // the activation mark keeps duplicates out
                                let core = self.clone();
                                tokio::spawn(async move { core.handle_command(command).await });
                            }
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.wait() => return,
                _ = tokio::time::sleep(self.inner.config.resubscribe_backoff) => {}
            }

            match self.inner.store.subscribe(&channel).await {
                Ok(active) => {
                    info!("📡 Re-subscribed to '{}'", channel);
                    subscription = Some(active);
                }
                Err(e) => debug!("Subscribe to '{}' still failing: {}", channel, e),
            }
        }
    }
}

/// Whole ticks in `interval`, at least one.
fn duration_in_ticks(interval: Duration, tick: Duration) -> u64 {
    let tick = if tick.is_zero() { DEFAULT_TICK } else { tick };
    ((interval.as_millis() / tick.as_millis().max(1)) as u64).max(1)
}
