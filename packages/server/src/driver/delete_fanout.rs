//! Delete-fan-out loop (spec.md §4.4): releases any in-flight work for
//! batches marked deleted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::common::BatchId;

use super::DriverDeps;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub async fn run(deps: DriverDeps, shutdown: Arc<AtomicBool>) {
    tracing::info!("delete-fanout loop starting");
    while !shutdown.load(Ordering::Relaxed) {
        match fetch_pending_deletes(&deps).await {
            Ok(batches) => {
                for batch_id in batches {
                    if let Err(err) = fan_out_one(&deps, batch_id).await {
                        tracing::error!(batch_id, error = %err, "delete fan-out failed for batch");
                    }
                }
            }
            Err(err) => tracing::error!(error = %err, "failed to list deleted batches"),
        }
        deps.signal.wait(POLL_INTERVAL).await;
    }
    tracing::info!("delete-fanout loop stopped");
}

/// Deleted batches that still have live attempts (the worker hasn't been
/// told to abort them yet). `delete-batch` never waits for jobs to reach a
/// terminal state, unlike `cancel-batch` — it is a harder stop.
async fn fetch_pending_deletes(deps: &DriverDeps) -> Result<Vec<BatchId>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT DISTINCT b.id FROM batches b
         JOIN jobs j ON j.batch_id = b.id
         JOIN attempts a ON a.batch_id = j.batch_id AND a.job_id = j.job_id AND a.attempt_id = j.current_attempt_id
         WHERE b.deleted = true AND a.end_time IS NULL",
    )
    .fetch_all(&deps.db)
    .await
}

async fn fan_out_one(deps: &DriverDeps, batch_id: BatchId) -> Result<(), sqlx::Error> {
    let running: Vec<(i64, String)> = sqlx::query_as(
        "SELECT j.job_id, a.instance_name
         FROM jobs j JOIN attempts a ON a.batch_id = j.batch_id AND a.job_id = j.job_id AND a.attempt_id = j.current_attempt_id
         WHERE j.batch_id = $1 AND j.state = 'running'",
    )
    .bind(batch_id)
    .fetch_all(&deps.db)
    .await?;

    for (job_id, instance_name) in running {
        let address = deps
            .ipr
            .snapshot()
            .await
            .into_iter()
            .find(|i| i.name == instance_name)
            .map(|i| i.address);
        let Some(address) = address else {
            continue;
        };
        if let Err(err) = deps.worker_client.delete(&address, batch_id, job_id).await {
            tracing::warn!(batch_id, job_id, instance = %instance_name, error = %err, "delete-job failed during batch delete");
        }
    }

    deps.signal.fire();
    Ok(())
}
