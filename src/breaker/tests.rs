//! Circuit Breaker Tests
//!
//! ## Test Scopes
//! - **Breakers**: threshold comparison per resource, stat errors surface as errors.
//! - **Registry**: first-wins registration, ordering of `check_open`, unregister/clear.
//! - **Proc parsing**: `/proc` field extraction.

#[cfg(test)]
mod tests {
    use crate::breaker::breakers::{
        CircuitBreaker, DISK_CB, DiskCircuitBreaker, MEMORY_CB, MemoryCircuitBreaker,
        NATIVE_MEMORY_CB, NativeMemoryCircuitBreaker,
    };
    use crate::breaker::registry::CircuitBreakerRegistry;
    use crate::breaker::stats::{ResourceStats, StatsError, parse_kb_field};
    use crate::config::BreakerConfig;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::Arc;

    /// Stats whose values the test controls.
    struct FakeStats {
        memory: Mutex<f64>,
        disk_free: Mutex<f64>,
        native: Mutex<f64>,
        broken: Mutex<bool>,
    }

    impl FakeStats {
        fn new(memory: f64, disk_free: f64, native: f64) -> Arc<Self> {
            Arc::new(Self {
                memory: Mutex::new(memory),
                disk_free: Mutex::new(disk_free),
                native: Mutex::new(native),
                broken: Mutex::new(false),
            })
        }

        fn check(&self) -> Result<(), StatsError> {
            if *self.broken.lock() {
                return Err(StatsError::Unavailable {
                    stat: "fake".to_string(),
                    reason: "offline".to_string(),
                });
            }
            Ok(())
        }
    }

    impl ResourceStats for FakeStats {
        fn memory_used_percent(&self) -> Result<f64, StatsError> {
            self.check()?;
            Ok(*self.memory.lock())
        }

        fn disk_free_gb(&self, _path: &Path) -> Result<f64, StatsError> {
            self.check()?;
            Ok(*self.disk_free.lock())
        }

        fn native_memory_used_percent(&self) -> Result<f64, StatsError> {
            self.check()?;
            Ok(*self.native.lock())
        }
    }

    fn default_registry(stats: Arc<FakeStats>) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::with_defaults(&BreakerConfig::default(), stats)
    }

    // ============================================================
    // BREAKERS
    // ============================================================

    #[test]
    fn test_memory_breaker_threshold() {
        let stats = FakeStats::new(50.0, 100.0, 10.0);
        let breaker = MemoryCircuitBreaker::new(85.0, stats.clone());

        assert_eq!(breaker.name(), MEMORY_CB);
        assert!(!breaker.is_open().unwrap());

        *stats.memory.lock() = 92.5;
        assert!(breaker.is_open().unwrap());
    }

    #[test]
    fn test_disk_breaker_opens_below_free_space() {
        let stats = FakeStats::new(10.0, 4.0, 10.0);
        let breaker = DiskCircuitBreaker::new(5.0, "/", stats.clone());

        assert!(breaker.is_open().unwrap());

        *stats.disk_free.lock() = 5.5;
        assert!(!breaker.is_open().unwrap());
    }

    #[test]
    fn test_native_memory_breaker_threshold() {
        let stats = FakeStats::new(10.0, 100.0, 95.0);
        let breaker = NativeMemoryCircuitBreaker::new(90.0, stats);

        assert_eq!(breaker.name(), NATIVE_MEMORY_CB);
        assert!(breaker.is_open().unwrap());
    }

    #[test]
    fn test_unavailable_stats_are_not_treated_as_closed() {
        let stats = FakeStats::new(10.0, 100.0, 10.0);
        *stats.broken.lock() = true;
        let breaker = MemoryCircuitBreaker::new(85.0, stats);

        assert!(breaker.is_open().is_err());
    }

    // ============================================================
    // REGISTRY
    // ============================================================

    #[test]
    fn test_check_open_returns_first_open_breaker() {
        // ARRANGE: memory open, disk closed
        let stats = FakeStats::new(99.0, 100.0, 10.0);
        let registry = default_registry(stats.clone());

        // ACT & ASSERT
        assert_eq!(registry.check_open().unwrap(), Some(MEMORY_CB.to_string()));

        // ARRANGE: everything open, memory still wins by registration order
        *stats.disk_free.lock() = 0.5;
        *stats.native.lock() = 99.0;
        assert_eq!(registry.check_open().unwrap(), Some(MEMORY_CB.to_string()));

        // ARRANGE: only disk open
        *stats.memory.lock() = 10.0;
        *stats.native.lock() = 10.0;
        assert_eq!(registry.check_open().unwrap(), Some(DISK_CB.to_string()));
    }

    #[test]
    fn test_check_open_all_closed() {
        let registry = default_registry(FakeStats::new(10.0, 100.0, 10.0));

        assert_eq!(registry.check_open().unwrap(), None);
        assert_eq!(registry.names(), vec![MEMORY_CB, DISK_CB, NATIVE_MEMORY_CB]);
    }

    #[test]
    fn test_check_open_propagates_stat_errors() {
        let stats = FakeStats::new(10.0, 100.0, 10.0);
        let registry = default_registry(stats.clone());
        *stats.broken.lock() = true;

        assert!(registry.check_open().is_err());
    }

    #[test]
    fn test_register_first_wins() {
        let registry = CircuitBreakerRegistry::new();
        let closed = FakeStats::new(10.0, 100.0, 10.0);
        let open = FakeStats::new(99.0, 100.0, 10.0);

        assert!(registry.register("memory", Arc::new(MemoryCircuitBreaker::new(85.0, closed))));
        assert!(!registry.register("memory", Arc::new(MemoryCircuitBreaker::new(85.0, open))));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.check_open().unwrap(), None);
    }

    #[test]
    fn test_unregister_and_clear() {
        let registry = default_registry(FakeStats::new(99.0, 100.0, 10.0));

        registry.unregister("not-registered");
        assert_eq!(registry.len(), 3);

        registry.unregister(MEMORY_CB);
        assert_eq!(registry.check_open().unwrap(), None);

        registry.clear();
        assert!(registry.is_empty());
    }

    // ============================================================
    // PROC PARSING
    // ============================================================

    #[test]
    fn test_parse_kb_field() {
        let meminfo = "MemTotal:       16314684 kB\nMemFree:         1234567 kB\nMemAvailable:    8000000 kB\n";

        assert_eq!(parse_kb_field(meminfo, "MemTotal"), Some(16314684));
        assert_eq!(parse_kb_field(meminfo, "MemAvailable"), Some(8000000));
        assert_eq!(parse_kb_field(meminfo, "SwapTotal"), None);
    }
}
