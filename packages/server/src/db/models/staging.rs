use serde::Serialize;
use sqlx::FromRow;

use crate::common::BatchId;

/// Per-(batch, pool) aggregates the scheduler reads to size its ready
/// queue without scanning the jobs table (spec.md §3, GLOSSARY: "Staging
/// counters"). Kept consistent with job-state transitions inside the same
/// transaction as every procedure in [`crate::db::procedures`].
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StagingCounters {
    pub batch_id: BatchId,
    pub pool_name: String,
    pub n_jobs: i64,
    pub n_ready_jobs: i64,
    pub ready_cores_mcpu: i64,
    pub n_ready_cancellable_jobs: i64,
    pub ready_cancellable_cores_mcpu: i64,
}
