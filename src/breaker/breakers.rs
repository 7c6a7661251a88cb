use super::stats::{ResourceStats, StatsError};

use std::path::PathBuf;
use std::sync::Arc;

pub const MEMORY_CB: &str = "memory";
pub const DISK_CB: &str = "disk";
pub const NATIVE_MEMORY_CB: &str = "native_memory";

/// A boolean gate over one resource metric.
///
/// `is_open` compares a fresh stat read against a fixed threshold and keeps no
/// other state.
pub trait CircuitBreaker: Send + Sync {
    fn name(&self) -> &str;

    fn threshold(&self) -> f64;

    fn is_open(&self) -> Result<bool, StatsError>;
}

/// Opens when used memory exceeds `threshold` percent.
pub struct MemoryCircuitBreaker {
    threshold: f64,
    stats: Arc<dyn ResourceStats>,
}

impl MemoryCircuitBreaker {
    pub fn new(threshold: f64, stats: Arc<dyn ResourceStats>) -> Self {
        Self { threshold, stats }
    }
}

impl CircuitBreaker for MemoryCircuitBreaker {
    fn name(&self) -> &str {
        MEMORY_CB
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn is_open(&self) -> Result<bool, StatsError> {
        Ok(self.stats.memory_used_percent()? > self.threshold)
    }
}

/// Opens when the process resident set exceeds `threshold` percent of memory.
pub struct NativeMemoryCircuitBreaker {
    threshold: f64,
    stats: Arc<dyn ResourceStats>,
}

impl NativeMemoryCircuitBreaker {
    pub fn new(threshold: f64, stats: Arc<dyn ResourceStats>) -> Self {
        Self { threshold, stats }
    }
}

impl CircuitBreaker for NativeMemoryCircuitBreaker {
    fn name(&self) -> &str {
        NATIVE_MEMORY_CB
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn is_open(&self) -> Result<bool, StatsError> {
        Ok(self.stats.native_memory_used_percent()? > self.threshold)
    }
}

/// Opens when free space under `path` drops below `threshold` GB.
pub struct DiskCircuitBreaker {
    threshold: f64,
    path: PathBuf,
    stats: Arc<dyn ResourceStats>,
}

impl DiskCircuitBreaker {
    pub fn new(threshold: f64, path: impl Into<PathBuf>, stats: Arc<dyn ResourceStats>) -> Self {
        Self {
            threshold,
            path: path.into(),
            stats,
        }
    }
}

impl CircuitBreaker for DiskCircuitBreaker {
    fn name(&self) -> &str {
        DISK_CB
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn is_open(&self) -> Result<bool, StatsError> {
        Ok(self.stats.disk_free_gb(&self.path)? < self.threshold)
    }
}
