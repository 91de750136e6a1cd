//! Main application logic and lifecycle management.
//!
//! `Application` assembles the coordination core from the loaded
//! configuration, runs it until a termination signal or a shutdown
//! directive from the cluster arrives, then releases everything in order.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{setup_signal_handlers, setup_signal_handlers_silent},
};
use horizon_cluster::{ClusterCore, HeadlessHost};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Upper bound on the orderly part of shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Application {
    config: AppConfig,
    core: ClusterCore,
    host: HeadlessHost,
}

impl Application {
    /// Loads and validates configuration, applies CLI overrides and builds
    /// the cluster core. Nothing touches the store until [`Application::run`].
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }

        if let Some(server_id) = args.server_id {
            config.server.server_id = Some(server_id);
        }

        if let Some(store_url) = args.store_url {
            config.store.url = Some(store_url);
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        } else {
            info!("✅ Configuration loaded and validated successfully");
        }

        display_banner();

        let cluster_config = config.to_cluster_config()?;
        let store = config.create_store()?;
        let host = HeadlessHost::new(config.server.max_players);
        let core = ClusterCore::new(cluster_config, store, Arc::new(host.clone()))?;

        info!(
            "🚀 Horizon Cluster Node v{} as '{}'",
            env!("CARGO_PKG_VERSION"),
            core.identify()
        );

        Ok(Self { config, core, host })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Horizon Cluster Node");
        self.log_configuration_summary();

        self.core.start().await?;

        let monitoring_handle = {
            let core = self.core.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    log_health(&core).await;
                }
            })
        };

        info!("✅ Horizon Cluster Node is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            signal = setup_signal_handlers() => {
                signal?;
            }
            _ = self.host.wait_for_shutdown_request() => {
                info!("🛑 Shutdown requested over the control channel");
            }
        }

        // merciless shutdown
        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }

            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        monitoring_handle.abort();

        info!("💾 Saving open sessions and leaving the cluster...");
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.core.shutdown())
            .await
            .is_err()
        {
            warn!(
                "⏰ Cluster shutdown did not finish within {:?}; records will expire on their own",
                SHUTDOWN_TIMEOUT
            );
        }

        log_final_statistics(&self.core);

        info!("✅ Horizon Cluster Node shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Advertised address: {}", self.config.server.bind_address);
        info!("  🏷️ Server identity: {}", self.core.identify());
        info!(
            "  🔗 Store: {}",
            self.config.store.url.as_deref().unwrap_or("in-process (single node)")
        );
        info!("  🔑 Key prefix: {}", self.config.store.key_prefix);
        info!("  💾 Snapshots: {}", self.config.snapshots.directory);
        info!("  👥 Max players: {}", self.config.server.max_players);
        info!(
            "  ⏱️ Heartbeat every {}s, records live {}s",
            self.config.store.heartbeat_interval_secs, self.config.store.record_ttl_secs
        );
    }
}

async fn log_health(core: &ClusterCore) {
    let stats = core.bus().stats();
    let breaker = core.store().circuit_breaker().get_state().await;
    let shared_count = match core.registry().server_player_count(core.identify()).await {
        Ok(count) => count.to_string(),
        Err(_) => "unavailable".to_string(),
    };
    info!(
        "📊 Cluster Health - {} players (shared count {}) | {} sessions | {} active worlds | store {:?}",
        core.get_player_count().await.unwrap_or(0),
        shared_count,
        core.snapshots().open_sessions(),
        core.activator().active_worlds().len(),
        breaker
    );
    info!(
        "📨 Bus - {} published, {} received, {} malformed, {} cancelled",
        stats.messages_published, stats.messages_received, stats.malformed_messages, stats.events_cancelled
    );
}

fn log_final_statistics(core: &ClusterCore) {
    let stats = core.bus().stats();
    info!("📊 Final Statistics:");
    info!("  - Messages published: {}", stats.messages_published);
    info!("  - Messages received: {}", stats.messages_received);
    info!("  - Malformed messages dropped: {}", stats.malformed_messages);
    info!("  - Worlds activated: {}", core.activator().active_worlds().len());
}
