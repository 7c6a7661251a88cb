//! Resource statistics feeding the circuit breakers.
//!
//! `ProcStats` reads Linux `/proc` and `statvfs`. A stat that cannot be read
//! is an error, never a zero.

use std::ffi::CString;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("resource stat {stat} unavailable: {reason}")]
    Unavailable { stat: String, reason: String },

    #[error("malformed resource stat {stat}: {line}")]
    Malformed { stat: String, line: String },
}

impl StatsError {
    fn unavailable(stat: &str, reason: impl ToString) -> Self {
        StatsError::Unavailable {
            stat: stat.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub trait ResourceStats: Send + Sync {
    /// Used physical memory as a percentage of total memory.
    fn memory_used_percent(&self) -> Result<f64, StatsError>;

    fn disk_free_gb(&self, path: &Path) -> Result<f64, StatsError>;

    /// Resident set size of this process as a percentage of total memory.
    fn native_memory_used_percent(&self) -> Result<f64, StatsError>;
}

/// Stats read from the running Linux host.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcStats;

const MEMINFO: &str = "/proc/meminfo";
const SELF_STATUS: &str = "/proc/self/status";

impl ProcStats {
    fn read_kb_field(file: &str, field: &str) -> Result<u64, StatsError> {
        let contents = std::fs::read_to_string(file).map_err(|e| StatsError::unavailable(file, e))?;
        parse_kb_field(&contents, field).ok_or_else(|| StatsError::Malformed {
            stat: format!("{}:{}", file, field),
            line: contents.lines().find(|l| l.starts_with(field)).unwrap_or("").to_string(),
        })
    }
}

/// Parses a `Name:   12345 kB` line out of a `/proc` style file.
pub(crate) fn parse_kb_field(contents: &str, field: &str) -> Option<u64> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix(field)?.strip_prefix(':'))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
}

impl ResourceStats for ProcStats {
    fn memory_used_percent(&self) -> Result<f64, StatsError> {
        let total = Self::read_kb_field(MEMINFO, "MemTotal")?;
        let available = Self::read_kb_field(MEMINFO, "MemAvailable")?;
        if total == 0 {
            return Err(StatsError::unavailable(MEMINFO, "MemTotal is zero"));
        }
        Ok(total.saturating_sub(available) as f64 * 100.0 / total as f64)
    }

    fn disk_free_gb(&self, path: &Path) -> Result<f64, StatsError> {
        let display = path.display().to_string();
        let c_path = CString::new(display.as_bytes()).map_err(|e| StatsError::unavailable(&display, e))?;

        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(StatsError::unavailable(&display, std::io::Error::last_os_error()));
        }

        let free_bytes = stat.f_bavail as f64 * stat.f_frsize as f64;
        Ok(free_bytes / (1024.0 * 1024.0 * 1024.0))
    }

    fn native_memory_used_percent(&self) -> Result<f64, StatsError> {
        let rss = Self::read_kb_field(SELF_STATUS, "VmRSS")?;
        let total = Self::read_kb_field(MEMINFO, "MemTotal")?;
        if total == 0 {
            return Err(StatsError::unavailable(MEMINFO, "MemTotal is zero"));
        }
        Ok(rss as f64 * 100.0 / total as f64)
    }
}
