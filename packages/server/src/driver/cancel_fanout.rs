//! Cancel-fan-out loop (spec.md §4.4): drains cancelled batches and tells
//! every live attempt's worker to abort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::common::BatchId;
use crate::db::procedures;

use super::DriverDeps;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub async fn run(deps: DriverDeps, shutdown: Arc<AtomicBool>) {
    tracing::info!("cancel-fanout loop starting");
    while !shutdown.load(Ordering::Relaxed) {
        match fetch_newly_cancelled(&deps).await {
            Ok(batches) => {
                for batch_id in batches {
                    if let Err(err) = fan_out_one(&deps, batch_id).await {
                        tracing::error!(batch_id, error = %err, "cancel fan-out failed for batch");
                    }
                }
            }
            Err(err) => tracing::error!(error = %err, "failed to list cancelled batches"),
        }
        deps.signal.wait(POLL_INTERVAL).await;
    }
    tracing::info!("cancel-fanout loop stopped");
}

/// Batches marked `cancelled` that still have non-terminal jobs: once a
/// cancelled batch is fully terminal there's nothing left to fan out.
async fn fetch_newly_cancelled(deps: &DriverDeps) -> Result<Vec<BatchId>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT id FROM batches WHERE cancelled = true AND state != 'complete'",
    )
    .fetch_all(&deps.db)
    .await
}

async fn fan_out_one(deps: &DriverDeps, batch_id: BatchId) -> Result<(), sqlx::Error> {
    let outcome = procedures::cancel_batch(&deps.db, batch_id)
        .await
        .map_err(|_| sqlx::Error::Protocol("cancel_batch procedure failed".into()))?;

    for (job_id, instance_name) in outcome.running {
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
        // Idempotent verb; 404 is success (spec.md §4.5). This races a
        // concurrent success completion — `mark_job_complete`'s
        // idempotence rule resolves it (spec.md §5).
        if let Err(err) = deps.worker_client.delete(&address, batch_id, job_id).await {
            tracing::warn!(batch_id, job_id, instance = %instance_name, error = %err, "cancel delete-job failed");
        }
    }

    if let Some(completed) = outcome.batch_completed {
        crate::callback::notify_batch_complete(&deps.http_client, &deps.db, completed).await;
    }

    deps.signal.fire();
    Ok(())
}
