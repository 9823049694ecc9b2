//! OS resource sampling backed by `sysinfo`

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("no mounted volume contains {0}")]
    NoVolume(PathBuf),

    #[error("volume at {0} reports zero capacity")]
    EmptyVolume(PathBuf),

    #[error("boot time unavailable")]
    BootTimeUnavailable,

    #[error("memory statistics unavailable")]
    MemoryUnavailable,
}

/// Memory counters in bytes, `percent` is the share in use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: u64,
    pub available: u64,
    pub percent: f64,
    pub used: u64,
    pub free: u64,
}

/// Volume counters in bytes, `percent` is the share in use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

impl DiskUsage {
    pub fn from_total_and_free(total: u64, free: u64) -> Self {
        let used = total.saturating_sub(free);
        let percent = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        Self {
            total,
            used,
            free,
            percent,
        }
    }

    /// Free share of the volume, in percent
    pub fn free_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.free as f64 / self.total as f64 * 100.0
    }
}

/// Source of host resource figures
///
/// Implementations may block briefly (CPU sampling needs two readings), so
/// callers run them on the blocking pool.
pub trait ResourceSampler: Send + Sync {
    fn cpu_percent(&self) -> Result<f32, SamplerError>;

    fn memory(&self) -> Result<MemoryStats, SamplerError>;

    fn disk_usage(&self, path: &Path) -> Result<DiskUsage, SamplerError>;

    fn boot_time(&self) -> Result<DateTime<Utc>, SamplerError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoSampler;

impl SysinfoSampler {
    pub fn new() -> Self {
        Self
    }
}

impl ResourceSampler for SysinfoSampler {
    fn cpu_percent(&self) -> Result<f32, SamplerError> {
        let mut system = System::new();
        system.refresh_cpu();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_cpu();
        Ok(system.global_cpu_info().cpu_usage())
    }

    fn memory(&self) -> Result<MemoryStats, SamplerError> {
        let mut system = System::new();
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return Err(SamplerError::MemoryUnavailable);
        }
        let available = system.available_memory();

        Ok(MemoryStats {
            total,
            available,
            percent: total.saturating_sub(available) as f64 / total as f64 * 100.0,
            used: system.used_memory(),
            free: system.free_memory(),
        })
    }

    fn disk_usage(&self, path: &Path) -> Result<DiskUsage, SamplerError> {
        let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let disks = Disks::new_with_refreshed_list();

        // Deepest mount point containing the path
        let disk = disks
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .ok_or_else(|| SamplerError::NoVolume(target.clone()))?;

        if disk.total_space() == 0 {
            return Err(SamplerError::EmptyVolume(disk.mount_point().to_path_buf()));
        }

        Ok(DiskUsage::from_total_and_free(
            disk.total_space(),
            disk.available_space(),
        ))
    }

    fn boot_time(&self) -> Result<DateTime<Utc>, SamplerError> {
        match System::boot_time() {
            0 => Err(SamplerError::BootTimeUnavailable),
            secs => DateTime::<Utc>::from_timestamp(secs as i64, 0)
                .ok_or(SamplerError::BootTimeUnavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_disk_usage_percentages() {
        let usage = DiskUsage::from_total_and_free(100 * GB, 5 * GB);
        assert_eq!(usage.used, 95 * GB);
        assert!((usage.percent - 95.0).abs() < f64::EPSILON);
        assert!((usage.free_percent() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_disk_usage_zero_total() {
        let usage = DiskUsage::from_total_and_free(0, 0);
        assert_eq!(usage.percent, 0.0);
        assert_eq!(usage.free_percent(), 0.0);
    }
}
