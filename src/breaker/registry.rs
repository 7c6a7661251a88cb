use super::breakers::{
    CircuitBreaker, DiskCircuitBreaker, MemoryCircuitBreaker, NativeMemoryCircuitBreaker,
};
use super::stats::{ResourceStats, StatsError};
use crate::config::BreakerConfig;

use parking_lot::RwLock;
use std::sync::Arc;

/// Named set of breakers consulted before a node accepts new work.
///
/// Registration order is preserved so `check_open` always reports the same
/// breaker when several are open at once.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<Vec<(String, Arc<dyn CircuitBreaker>)>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory, disk and native-memory breakers with the configured thresholds.
    pub fn with_defaults(config: &BreakerConfig, stats: Arc<dyn ResourceStats>) -> Self {
        let registry = Self::new();
        let memory = MemoryCircuitBreaker::new(config.memory_threshold_percent, stats.clone());
        let disk = DiskCircuitBreaker::new(
            config.disk_free_threshold_gb,
            config.disk_path.clone(),
            stats.clone(),
        );
        let native = NativeMemoryCircuitBreaker::new(config.native_memory_threshold_percent, stats);

        let defaults: [Arc<dyn CircuitBreaker>; 3] =
            [Arc::new(memory), Arc::new(disk), Arc::new(native)];
        for breaker in defaults {
            let name = breaker.name().to_string();
            registry.register(name, breaker);
        }
        registry
    }

    /// Inserts `breaker` under `name` unless the name is taken.
    /// Returns whether the breaker was added.
    pub fn register(&self, name: impl Into<String>, breaker: Arc<dyn CircuitBreaker>) -> bool {
        let name = name.into();
        let mut breakers = self.breakers.write();
        if breakers.iter().any(|(existing, _)| *existing == name) {
            tracing::debug!("Circuit breaker {} already registered", name);
            return false;
        }
        tracing::info!("Registered circuit breaker {} (threshold {})", name, breaker.threshold());
        breakers.push((name, breaker));
        true
    }

    pub fn unregister(&self, name: &str) {
        self.breakers.write().retain(|(existing, _)| existing != name);
    }

    /// Name of the first open breaker in registration order.
    ///
    /// A stat that cannot be read is returned as an error rather than being
    /// treated as a closed breaker.
    pub fn check_open(&self) -> Result<Option<String>, StatsError> {
        let breakers = self.breakers.read();
        for (name, breaker) in breakers.iter() {
            if breaker.is_open()? {
                tracing::warn!("Circuit breaker {} is open", name);
                return Ok(Some(name.clone()));
            }
        }
        Ok(None)
    }

    pub fn clear(&self) {
        self.breakers.write().clear();
    }

    pub fn names(&self) -> Vec<String> {
        self.breakers.read().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }
}
