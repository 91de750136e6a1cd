//! Guarded access to a [`CoordinationStore`] backend.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::{CoordinationStore, StoreError, Subscription};
use crate::error::ClusterError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Settings for [`StoreClient`].
#[derive(Debug, Clone)]
pub struct StoreClientConfig {
    /// Upper bound on any single store operation
    pub operation_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for StoreClientConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(500),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// The store handle every component holds.
///
/// Every call is bounded by the operation timeout and passes through the
/// circuit breaker. All failures come back as
/// [`ClusterError::StoreUnavailable`]; callers log them at warn and carry on.
#[derive(Debug, Clone)]
pub struct StoreClient {
    backend: Arc<dyn CoordinationStore>,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

impl StoreClient {
    pub fn new(backend: Arc<dyn CoordinationStore>, config: StoreClientConfig) -> Self {
        Self {
            backend,
            breaker: Arc::new(CircuitBreaker::new("coordination-store", config.breaker)),
            timeout: config.operation_timeout,
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn backend(&self) -> &Arc<dyn CoordinationStore> {
        &self.backend
    }

    async fn guarded<T, F>(&self, op: &str, fut: F) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if !self.breaker.can_execute().await {
            return Err(ClusterError::StoreUnavailable(format!(
                "{op}: circuit '{}' is open",
                self.breaker.name()
            )));
        }

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => {
                self.breaker.record_success().await;
                Ok(value)
            }
            Ok(Err(e)) => {
                if e.is_connectivity() {
                    self.breaker.record_failure().await;
                } else {
                    // The store answered; it is reachable even if the request was bad
                    self.breaker.record_success().await;
                }
                debug!("Store operation {} failed: {}", op, e);
                Err(ClusterError::StoreUnavailable(format!("{op}: {e}")))
            }
            Err(_) => {
                self.breaker.record_failure().await;
                Err(ClusterError::StoreUnavailable(format!(
                    "{op}: timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, ClusterError> {
        self.guarded("GET", self.backend.get(key)).await
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), ClusterError> {
        self.guarded("SET", self.backend.set(key, value, ttl)).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, ClusterError> {
        self.guarded("DEL", self.backend.delete(key)).await
    }

    pub async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, ClusterError> {
        self.guarded("INCRBY", self.backend.incr_by(key, delta)).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, ClusterError> {
        self.guarded("EXPIRE", self.backend.expire(key, ttl)).await
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<usize, ClusterError> {
        self.guarded("PUBLISH", self.backend.publish(channel, payload)).await
    }

    pub async fn subscribe(&self, channel: &str) -> Result<Subscription, ClusterError> {
        self.guarded("SUBSCRIBE", self.backend.subscribe(channel)).await
    }
}
