//! Scheduler loop (spec.md §4.3): one logical loop per pool, ready-queue
//! drain to worker dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::common::{retry_with_backoff, AttemptId, BackoffPolicy};
use crate::db::models::{AttemptReason, JobState};
use crate::db::procedures;
use crate::error::AppError;
use crate::worker_client::create_job_body;

use super::DriverDeps;

/// Jobs sampled per iteration (spec.md §4.3 step 1: "limited by a batch
/// size").
const BATCH_SIZE: i64 = 50;

pub async fn run(deps: DriverDeps, pool_name: String, shutdown: Arc<AtomicBool>) {
    tracing::info!(pool = %pool_name, "scheduler loop starting");
    let poll_interval = Duration::from_millis(deps.config.scheduler_poll_interval_ms);

    while !shutdown.load(Ordering::Relaxed) {
        match iterate(&deps, &pool_name).await {
            Ok(dispatched) if dispatched > 0 => {
                tracing::debug!(pool = %pool_name, dispatched, "scheduler iteration dispatched jobs");
                continue;
            }
            Ok(_) => {}
            Err(err) => tracing::error!(pool = %pool_name, error = %err, "scheduler iteration failed"),
        }
        deps.signal.wait(poll_interval).await;
    }
    tracing::info!(pool = %pool_name, "scheduler loop stopped");
}

/// One scheduling pass: returns the number of jobs successfully
/// dispatched, for the caller to decide whether to immediately loop again
/// (draining a deep ready queue) or wait for a signal.
async fn iterate(deps: &DriverDeps, pool_name: &str) -> Result<usize, AppError> {
    let ready_jobs = fetch_ready_jobs(deps, pool_name).await?;
    let mut dispatched = 0;

    for job in ready_jobs {
        match dispatch_one(deps, pool_name, &job).await {
            Ok(true) => dispatched += 1,
            Ok(false) => {}
            Err(err) => tracing::warn!(
                batch_id = job.batch_id,
                job_id = job.job_id,
                error = %err,
                "failed to dispatch job"
            ),
        }
    }
    Ok(dispatched)
}

struct ReadyJob {
    batch_id: i64,
    job_id: i64,
    cores_mcpu: i64,
    spec: serde_json::Value,
    owner: String,
}

/// spec.md §4.3 step 1: deterministic `(batch_id, job_id)` order gives
/// approximate FIFO per pool.
async fn fetch_ready_jobs(deps: &DriverDeps, pool_name: &str) -> Result<Vec<ReadyJob>, AppError> {
    let rows: Vec<(i64, i64, i64, Option<serde_json::Value>, String)> = sqlx::query_as(
        "SELECT j.batch_id, j.job_id, j.cores_mcpu, j.spec, b.owner
         FROM jobs j JOIN batches b ON b.id = j.batch_id
         WHERE j.pool_name = $1 AND j.state = 'ready' AND b.cancelled = false AND b.deleted = false
         ORDER BY j.batch_id, j.job_id
         LIMIT $2",
    )
    .bind(pool_name)
    .bind(BATCH_SIZE)
    .fetch_all(&deps.db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(batch_id, job_id, cores_mcpu, spec, owner)| ReadyJob {
            batch_id,
            job_id,
            cores_mcpu,
            spec: spec.unwrap_or(serde_json::json!({})),
            owner,
        })
        .collect())
}

/// Returns `Ok(true)` if the job was dispatched this iteration.
async fn dispatch_one(deps: &DriverDeps, pool_name: &str, job: &ReadyJob) -> Result<bool, AppError> {
    // Steps 2-3: first-fit selection and in-memory reservation happen
    // together inside the IPR actor so no other caller can observe a
    // half-reserved instance between selection and reservation.
    let Some(instance_name) = deps.ipr.reserve(pool_name, job.cores_mcpu).await else {
        return Ok(false);
    };

    let attempt_id = AttemptId::new();
    let body = create_job_body(job.batch_id, job.job_id, &attempt_id, job.spec.clone(), &job.owner);

    let instance_address = deps
        .ipr
        .snapshot()
        .await
        .into_iter()
        .find(|i| i.name == instance_name)
        .map(|i| i.address);
    let Some(instance_address) = instance_address else {
        deps.ipr.release(&instance_name, job.cores_mcpu).await;
        return Ok(false);
    };

    // Step 5: classified-transient WC failures get the shared
    // backoff-and-retry treatment (spec.md §4.3 step 5: "start 0.1s, cap,
    // ~10 tries").
    let create_result = retry_with_backoff(BackoffPolicy::default(), || {
        deps.worker_client.create(&instance_address, &body)
    })
    .await;

    match create_result {
        Ok(()) => match procedures::schedule_job(&deps.db, job.batch_id, job.job_id, &attempt_id, &instance_name).await {
            Ok(()) => {
                deps.signal.fire();
                Ok(true)
            }
            Err(AppError::WrongState(_)) => {
                // Step 4: the job was cancelled between sampling and
                // dispatch. Best-effort delete and release the reservation.
                let _ = deps.worker_client.delete(&instance_address, job.batch_id, job.job_id).await;
                deps.ipr.release(&instance_name, job.cores_mcpu).await;
                Ok(false)
            }
            Err(other) => {
                deps.ipr.release(&instance_name, job.cores_mcpu).await;
                Err(other)
            }
        },
        Err(err) => {
            deps.ipr.record_failure(&instance_name).await;
            deps.ipr.release(&instance_name, job.cores_mcpu).await;
            // Retry budget on the WC call itself is exhausted; the job is
            // marked Error and the attempt budget (spec.md §7) is charged
            // the same way instance loss is.
            let status = serde_json::json!({ "error": err.to_string() });
            let outcome = procedures::mark_job_complete(
                &deps.db,
                job.batch_id,
                job.job_id,
                &attempt_id,
                JobState::Error,
                &status,
                None,
                Utc::now(),
                AttemptReason::Error,
            )
            .await?;
            if let Some(batch_id) = outcome.batch_completed {
                crate::callback::notify_batch_complete(&deps.http_client, &deps.db, batch_id).await;
            }
            deps.signal.fire();
            Ok(false)
        }
    }
}
