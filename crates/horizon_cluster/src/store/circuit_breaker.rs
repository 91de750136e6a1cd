//! Circuit breaker guarding the coordination store.
//!
//! After `failure_threshold` consecutive connectivity failures the breaker
//! opens and store operations fail fast instead of each waiting out the
//! full operation timeout. Once `reset_timeout` has elapsed one probe is let
//! through (half-open); `success_threshold` successes close it again.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitBreakerState {
    /// Store is considered healthy, every operation is attempted
    Closed,
    /// Store is considered down, operations fail fast
    Open,
    /// Probing whether the store came back
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing
    pub reset_timeout: Duration,
    /// Successful probes needed in half-open to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(10),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    last_success_time: Option<Instant>,
}

/// Circuit breaker for store operations.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                last_success_time: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks if the breaker lets an operation through, moving from open to
    /// half-open once the reset timeout has elapsed.
    pub async fn can_execute(&self) -> bool {
        {
            let inner = self.inner.read().await;
            match inner.state {
                CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => return true,
                CircuitBreakerState::Open => {
                    let waited = inner
                        .last_failure_time
                        .is_some_and(|at| at.elapsed() >= self.config.reset_timeout);
                    if !waited {
                        return false;
                    }
                }
            }
        }

        let mut inner = self.inner.write().await;
        // Another caller may have moved the state on while we waited for the lock
        if inner.state == CircuitBreakerState::Open {
            self.transition(&mut inner, CircuitBreakerState::HalfOpen);
        }
        inner.state != CircuitBreakerState::Open
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        inner.last_success_time = Some(Instant::now());
        match inner.state {
            CircuitBreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitBreakerState::Closed);
                }
            }
            CircuitBreakerState::Closed => inner.failure_count = 0,
            CircuitBreakerState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            CircuitBreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitBreakerState::Open);
                }
            }
            // Any failure while probing reopens
            CircuitBreakerState::HalfOpen => self.transition(&mut inner, CircuitBreakerState::Open),
            CircuitBreakerState::Open => {}
        }
    }

    pub async fn is_open(&self) -> bool {
        self.inner.read().await.state == CircuitBreakerState::Open
    }

    pub async fn get_state(&self) -> CircuitBreakerState {
        self.inner.read().await.state
    }

    pub async fn get_stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.read().await;
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
            last_success_time: inner.last_success_time,
        }
    }

    /// Manually closes the circuit.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        self.transition(&mut inner, CircuitBreakerState::Closed);
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitBreakerState) {
        inner.state = to;
        inner.success_count = 0;
        match to {
            CircuitBreakerState::Closed => {
                inner.failure_count = 0;
                info!("✅ Circuit breaker '{}' transitioned to CLOSED", self.name);
            }
            CircuitBreakerState::Open => {
                warn!("🚫 Circuit breaker '{}' transitioned to OPEN", self.name);
            }
            CircuitBreakerState::HalfOpen => {
                info!("🔄 Circuit breaker '{}' transitioned to HALF-OPEN", self.name);
            }
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitBreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    #[serde(skip)]
    pub last_failure_time: Option<Instant>,
    #[serde(skip)]
    pub last_success_time: Option<Instant>,
}
