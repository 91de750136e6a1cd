//! Shutdown coordination for the cluster node.
//!
//! Shared state used to stop background loops (inbound subscriptions,
//! heartbeats) and to make [`crate::ClusterCore::shutdown`] idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared shutdown state for coordinating graceful shutdown across components.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    /// Set once shutdown starts - loops must stop picking up new work
    shutdown_initiated: Arc<AtomicBool>,
    /// Set once all sessions are persisted and records removed
    shutdown_complete: Arc<AtomicBool>,
    signal: Arc<watch::Sender<bool>>,
}

impl ShutdownState {
    /// Creates a new shutdown state with both flags set to false.
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_complete: Arc::new(AtomicBool::new(false)),
            signal: Arc::new(signal),
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Initiates shutdown. Returns `false` if it was already initiated.
    pub fn initiate_shutdown(&self) -> bool {
        let first = !self.shutdown_initiated.swap(true, Ordering::AcqRel);
        if first {
            self.signal.send_replace(true);
            info!("🛑 Shutdown initiated - background loops stopping");
        }
        first
    }

    /// Marks shutdown as complete.
    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("✅ Cluster state released - ready for final cleanup");
    }

    /// Resolves once shutdown has been initiated.
    pub async fn wait(&self) {
        let mut rx = self.signal.subscribe();
        if *rx.borrow_and_update() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}
