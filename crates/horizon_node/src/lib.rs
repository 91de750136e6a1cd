//! # Horizon Cluster Node - Main Entry Point
//!
//! Runs the session-coordination layer for one server of a Horizon cluster.
//! This entry point handles CLI parsing, configuration loading, and
//! application lifecycle management.
//!
//! ## Quick Start
//!
//! ```bash
//! # Single node on an in-process store
//! horizon-node
//!
//! # Join a cluster
//! horizon-node --store-url redis://10.0.0.2:6379/0 --bind 10.0.0.7:25565 --server-id lobby-1
//!
//! # JSON logging for production
//! horizon-node --json-logs --log-level debug
//! ```
//!
//! ## Configuration
//!
//! The node loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! SIGINT or SIGTERM (Ctrl+C on Windows) saves open sessions and removes the
//! server's records from the store. A second signal exits at once. A
//! `SUICIDE` directive on the control channel triggers the same shutdown.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Main entry point for the Horizon cluster node.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{ControlSettings, LoggingSettings, ServerSettings, SnapshotSettings, StoreSettings};
