use serde::{Deserialize, Serialize};

/// A worker pool: a homogeneous group of VMs sharing a machine shape.
///
/// Design Notes (spec.md §9): "Config as named options ... load at startup
/// and on explicit refresh." Pools are not rows in the Persistent Store;
/// they're a small record loaded from [`crate::Config`] once at startup.
/// Staging counters and instances reference a pool by `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub worker_type: String,
    pub worker_cores: u32,
    pub worker_memory_gib: f64,
    pub local_ssd: bool,
    pub pd_ssd_gb: Option<u32>,
    pub boot_disk_gb: u32,
    pub max_instances: u32,
    pub max_live_instances: u32,
    pub standing_worker_enabled: bool,
    pub standing_worker_cores: u32,
}

impl PoolConfig {
    pub fn worker_cores_mcpu(&self) -> i64 {
        self.worker_cores as i64 * 1000
    }

    /// Gibibytes of memory available per core on this pool's worker type.
    pub fn memory_per_core_gib(&self) -> f64 {
        self.worker_memory_gib / self.worker_cores as f64
    }
}
