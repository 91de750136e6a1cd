//! Signal handling for graceful node shutdown.
//!
//! The first SIGINT/SIGTERM (Ctrl+C on Windows) starts an orderly shutdown;
//! the application arms a second handler that exits immediately.

use horizon_cluster::ShutdownState;
use tokio::signal;
use tracing::info;

/// Waits for a termination signal.
///
/// # Returns
///
/// `Ok(shutdown_state)` with shutdown already initiated, or an error if
/// the signal handlers could not be installed.
pub async fn setup_signal_handlers() -> Result<ShutdownState, Box<dyn std::error::Error>> {
    let shutdown_state = setup_signal_handlers_silent().await?;
    info!("📡 Received shutdown signal - initiating graceful shutdown");
    Ok(shutdown_state)
}

pub async fn setup_signal_handlers_silent() -> Result<ShutdownState, Box<dyn std::error::Error>> {
    let shutdown_state = ShutdownState::new();

    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    shutdown_state.initiate_shutdown();
    Ok(shutdown_state)
}
