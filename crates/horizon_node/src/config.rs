//! Configuration management for the Horizon cluster node.
//!
//! This module handles loading, validation, and conversion of node
//! configuration from TOML files and command-line arguments.

use horizon_cluster::store::CircuitBreakerConfig;
use horizon_cluster::{
    ClusterConfig, CoordinationStore, KeySpace, MemoryStore, RedisConfig, RedisStore, ServerIdentity,
    StoreClientConfig,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

fn default_max_players() -> usize {
    100
}

fn default_tick_interval() -> u64 {
    50 // 20 ticks per second
}

fn default_key_prefix() -> String {
    "horizon".to_string()
}

fn default_pool_size() -> usize {
    16
}

fn default_acquire_timeout_ms() -> u64 {
    2000
}

fn default_operation_timeout_ms() -> u64 {
    500
}

fn default_record_ttl_secs() -> u64 {
    30
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_resubscribe_backoff_ms() -> u64 {
    2000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    10_000
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// This server's address, identity and capacity
    pub server: ServerSettings,
    /// Coordination store connection and record lifetimes
    pub store: StoreSettings,
    /// Where player session snapshots are kept
    pub snapshots: SnapshotSettings,
    /// Control channel authorization
    #[serde(default)]
    pub control: ControlSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Advertised `host:port`; other servers redirect players here
    pub bind_address: String,
    /// Identity override. Empty or absent means the bind address is used
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    /// Host time quantum in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

/// Coordination store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// `redis://` URL. Without one the node runs on an in-process store and
    /// cannot see any other server.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Channel name overrides; default to `<prefix>:world_repo` and `<prefix>:control`
    #[serde(default)]
    pub world_channel: Option<String>,
    #[serde(default)]
    pub control_channel: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    #[serde(default = "default_record_ttl_secs")]
    pub record_ttl_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_resubscribe_backoff_ms")]
    pub resubscribe_backoff_ms: u64,
    /// Consecutive failures before the store circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSettings {
    /// Root directory; snapshots live at `<directory>/<world>/<player>.json`
    pub directory: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlSettings {
    /// When set, `SUICIDE` directives must carry this token
    #[serde(default)]
    pub shutdown_token: Option<String>,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:25565".to_string(),
                server_id: None,
                max_players: default_max_players(),
                tick_interval_ms: default_tick_interval(),
            },
            store: StoreSettings {
                url: None,
                key_prefix: default_key_prefix(),
                world_channel: None,
                control_channel: None,
                pool_size: default_pool_size(),
                acquire_timeout_ms: default_acquire_timeout_ms(),
                operation_timeout_ms: default_operation_timeout_ms(),
                record_ttl_secs: default_record_ttl_secs(),
                heartbeat_interval_secs: default_heartbeat_interval_secs(),
                resubscribe_backoff_ms: default_resubscribe_backoff_ms(),
                failure_threshold: default_failure_threshold(),
                reset_timeout_ms: default_reset_timeout_ms(),
            },
            snapshots: SnapshotSettings {
                directory: "data/snapshots".to_string(),
            },
            control: ControlSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the specified path
    /// and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML configuration file
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Translates the file settings into what the coordination core expects.
    pub fn to_cluster_config(&self) -> Result<ClusterConfig, Box<dyn std::error::Error>> {
        let address: SocketAddr = self.server.bind_address.parse()?;

        let mut keys = KeySpace::new(self.store.key_prefix.clone());
        if self.store.world_channel.is_some() || self.store.control_channel.is_some() {
            let world = self
                .store
                .world_channel
                .clone()
                .unwrap_or_else(|| keys.world_channel().to_string());
            let control = self
                .store
                .control_channel
                .clone()
                .unwrap_or_else(|| keys.control_channel().to_string());
            keys = keys.with_channels(world, control);
        }

        Ok(ClusterConfig {
            host: address.ip().to_string(),
            port: address.port(),
            server_id: self.server.server_id.clone(),
            keys,
            record_ttl: Duration::from_secs(self.store.record_ttl_secs),
            heartbeat_interval: Duration::from_secs(self.store.heartbeat_interval_secs),
            snapshot_root: PathBuf::from(&self.snapshots.directory),
            tick: Duration::from_millis(self.server.tick_interval_ms),
            resubscribe_backoff: Duration::from_millis(self.store.resubscribe_backoff_ms),
            shutdown_token: self.control.shutdown_token.clone(),
            store: StoreClientConfig {
                operation_timeout: Duration::from_millis(self.store.operation_timeout_ms),
                breaker: CircuitBreakerConfig {
                    failure_threshold: self.store.failure_threshold,
                    reset_timeout: Duration::from_millis(self.store.reset_timeout_ms),
                    ..CircuitBreakerConfig::default()
                },
            },
        })
    }

    /// Builds the store backend: Redis when a URL is configured, otherwise
    /// an in-process store for single-node runs.
    pub fn create_store(&self) -> Result<Arc<dyn CoordinationStore>, Box<dyn std::error::Error>> {
        match self.store.url.as_deref().map(str::trim).filter(|url| !url.is_empty()) {
            Some(url) => {
                let mut redis = RedisConfig::from_url(url)?;
                redis.pool_size = self.store.pool_size;
                redis.acquire_timeout = Duration::from_millis(self.store.acquire_timeout_ms);
                info!("🔗 Using coordination store at {}", redis.address);
                Ok(Arc::new(RedisStore::new(redis)?))
            }
            None => {
                warn!("⚠️ No store URL configured; running as a single node on an in-process store");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }

    /// Validates the configuration settings.
    pub fn validate(&self) -> Result<(), String> {
        let address = self
            .server
            .bind_address
            .parse::<SocketAddr>()
            .map_err(|_| format!("Invalid bind address: {}", &self.server.bind_address))?;

        // The identity must be usable before anything touches the store
        let override_id = self.server.server_id.as_deref();
        ServerIdentity::derive(&address.ip().to_string(), address.port(), override_id)
            .map_err(|e| format!("Invalid server identity: {e}"))?;

        if self.server.max_players == 0 {
            return Err("server.max_players must be greater than 0".to_string());
        }
        if self.server.tick_interval_ms == 0 {
            return Err("server.tick_interval_ms must be greater than 0".to_string());
        }

        if let Some(url) = self.store.url.as_deref().filter(|url| !url.trim().is_empty()) {
            RedisConfig::from_url(url.trim()).map_err(|e| format!("Invalid store URL: {e}"))?;
        }
        if self.store.key_prefix.is_empty() {
            return Err("store.key_prefix cannot be empty".to_string());
        }
        if self.store.pool_size == 0 {
            return Err("store.pool_size must be greater than 0".to_string());
        }
        if self.store.record_ttl_secs <= self.store.heartbeat_interval_secs {
            return Err(format!(
                "store.record_ttl_secs ({}) must exceed store.heartbeat_interval_secs ({})",
                self.store.record_ttl_secs, self.store.heartbeat_interval_secs
            ));
        }
        if self.store.heartbeat_interval_secs == 0 {
            return Err("store.heartbeat_interval_secs must be greater than 0".to_string());
        }

        if self.snapshots.directory.is_empty() {
            return Err("Snapshot directory cannot be empty".to_string());
        }

        if let Some(token) = &self.control.shutdown_token {
            if token.is_empty() || token.contains('\0') {
                return Err("control.shutdown_token must be non-empty and free of NUL bytes".to_string());
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
