//! Resource-request normalization.
//!
//! Grounded on `inst_coll_config.py::PoolConfig.convert_requests_to_resources`
//! (see SPEC_FULL.md §3): cores are rounded up to satisfy the pool's
//! memory-per-core ratio, then to a packable granularity, and storage is
//! rounded up to whole GiB with a 10 GiB floor.

use super::pool::PoolConfig;

/// Packability granularity: cores are only ever scheduled in quarter-core
/// increments so the bin-packing math in the scheduler loop deals with a
/// small, fixed set of reservation sizes.
const PACKABILITY_GRANULARITY_MCPU: i64 = 250;

/// Storage is rounded up to whole GiB with this floor (spec.md §4.1).
const MIN_STORAGE_GIB: i64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct JobResources {
    pub cores_mcpu: i64,
    pub storage_gib: i64,
}

/// Normalize a job's raw resource request against the pool it will run on.
///
/// Returns an error describing why the request is unsatisfiable (spec.md
/// scenario 5: "400 ValidationError \"resource requests ... are
/// unsatisfiable\"") rather than an [`crate::error::AppError`] directly, so
/// this stays a pure function callers can unit test without constructing an
/// HTTP error type.
pub fn compute_job_resources(
    requested_cores_mcpu: i64,
    requested_memory_gib: f64,
    requested_storage_gib: f64,
    pool: &PoolConfig,
) -> Result<JobResources, String> {
    if requested_cores_mcpu <= 0 {
        return Err("cpu request must be > 0".to_string());
    }
    if requested_memory_gib < 0.0 || requested_storage_gib < 0.0 {
        return Err("memory and storage requests must be non-negative".to_string());
    }

    // Step 1: round cores up to satisfy the worker type's memory-per-core ratio.
    let memory_per_core = pool.memory_per_core_gib();
    let cores_for_memory_mcpu = if requested_memory_gib > 0.0 {
        (requested_memory_gib / memory_per_core * 1000.0).ceil() as i64
    } else {
        0
    };
    let cores_mcpu = requested_cores_mcpu.max(cores_for_memory_mcpu);

    // Step 2: round to packable granularity.
    let cores_mcpu = round_up_to(cores_mcpu, PACKABILITY_GRANULARITY_MCPU);

    if cores_mcpu > pool.worker_cores_mcpu() {
        return Err(format!(
            "resource requests (cpu={cores_mcpu}mcpu, memory={requested_memory_gib}Gi) are unsatisfiable on pool '{}' ({} cores)",
            pool.name, pool.worker_cores
        ));
    }

    // Step 3: storage rounds up to whole GiB with a floor.
    let storage_gib = requested_storage_gib.ceil() as i64;
    let storage_gib = storage_gib.max(MIN_STORAGE_GIB);

    Ok(JobResources {
        cores_mcpu,
        storage_gib,
    })
}

fn round_up_to(value: i64, granularity: i64) -> i64 {
    ((value + granularity - 1) / granularity) * granularity
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool() -> PoolConfig {
        PoolConfig {
            name: "default".to_string(),
            worker_type: "standard".to_string(),
            worker_cores: 16,
            worker_memory_gib: 60.0,
            local_ssd: true,
            pd_ssd_gb: None,
            boot_disk_gb: 10,
            max_instances: 8,
            max_live_instances: 4,
            standing_worker_enabled: false,
            standing_worker_cores: 0,
        }
    }

    #[test]
    fn rounds_cores_to_packability_granularity() {
        let resources = compute_job_resources(100, 0.0, 0.0, &test_pool()).unwrap();
        assert_eq!(resources.cores_mcpu, 250);
    }

    #[test]
    fn bumps_cores_to_satisfy_memory_ratio() {
        // 60 GiB / 16 cores = 3.75 GiB/core; requesting 7.5 GiB needs 2 cores.
        let resources = compute_job_resources(1000, 7.5, 0.0, &test_pool()).unwrap();
        assert_eq!(resources.cores_mcpu, 2000);
    }

    #[test]
    fn floors_storage_at_ten_gib() {
        let resources = compute_job_resources(1000, 0.0, 1.0, &test_pool()).unwrap();
        assert_eq!(resources.storage_gib, MIN_STORAGE_GIB);
    }

    #[test]
    fn rejects_oversized_request() {
        let err = compute_job_resources(200_000, 0.0, 0.0, &test_pool()).unwrap_err();
        assert!(err.contains("unsatisfiable"));
    }

    #[test]
    fn rejects_non_positive_cpu() {
        assert!(compute_job_resources(0, 0.0, 0.0, &test_pool()).is_err());
    }
}
