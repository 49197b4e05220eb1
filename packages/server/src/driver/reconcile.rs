//! Instance-reconcile loop (spec.md §4.4): periodically probes each active
//! instance's health endpoint. On sustained failure the instance is
//! retired (`active → inactive → deleted`) and every Running attempt bound
//! to it is unscheduled with `reason=preempted`, subject to the job's
//! attempt budget (spec.md §7).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use crate::common::{AttemptId, BatchId, JobId};
use crate::db::models::{AttemptReason, InstanceState, JobState};
use crate::db::procedures;

use super::DriverDeps;

pub async fn run(deps: DriverDeps, shutdown: Arc<AtomicBool>) {
    tracing::info!("instance-reconcile loop starting");
    let poll_interval = Duration::from_millis(deps.config.reconcile_interval_ms);

    while !shutdown.load(Ordering::Relaxed) {
        if let Err(err) = reconcile_once(&deps).await {
            tracing::error!(error = %err, "instance reconcile pass failed");
        }
        deps.signal.wait(poll_interval).await;
    }
    tracing::info!("instance-reconcile loop stopped");
}

async fn reconcile_once(deps: &DriverDeps) -> Result<(), sqlx::Error> {
    for instance in deps.ipr.snapshot().await {
        if instance.state == InstanceState::Deleted {
            continue;
        }

        let probe = deps.worker_client.health(&instance.address).await;
        match probe {
            Ok(()) => {
                deps.ipr.heartbeat(&instance.name).await;
                sqlx::query("UPDATE instances SET last_heartbeat = NOW(), failed_request_count = 0 WHERE name = $1")
                    .bind(&instance.name)
                    .execute(&deps.db)
                    .await?;
                if instance.state == InstanceState::Pending {
                    set_instance_state(deps, &instance.name, InstanceState::Active).await?;
                }
                continue;
            }
            Err(err) => {
                tracing::warn!(instance = %instance.name, error = %err, "health probe failed");
            }
        }

        let failures = deps.ipr.record_failure(&instance.name).await;
        sqlx::query("UPDATE instances SET failed_request_count = $2 WHERE name = $1")
            .bind(&instance.name)
            .bind(failures as i32)
            .execute(&deps.db)
            .await?;

        if failures < deps.config.reconcile_failure_threshold {
            continue;
        }

        match instance.state {
            InstanceState::Active => {
                tracing::warn!(instance = %instance.name, failures, "instance failing sustained health checks, marking inactive");
                set_instance_state(deps, &instance.name, InstanceState::Inactive).await?;
                drain_instance(deps, &instance.name).await?;
            }
            InstanceState::Inactive => {
                tracing::warn!(instance = %instance.name, "inactive instance still unhealthy, marking deleted");
                set_instance_state(deps, &instance.name, InstanceState::Deleted).await?;
                drain_instance(deps, &instance.name).await?;
                deps.ipr.remove(&instance.name).await;
            }
            InstanceState::Pending | InstanceState::Deleted => {}
        }
    }

    Ok(())
}

async fn set_instance_state(
    deps: &DriverDeps,
    name: &str,
    state: InstanceState,
) -> Result<(), sqlx::Error> {
    deps.ipr.set_state(name, state).await;
    sqlx::query("UPDATE instances SET state = $2 WHERE name = $1")
        .bind(name)
        .bind(state)
        .execute(&deps.db)
        .await?;
    Ok(())
}

/// Unschedules every Running job bound to `instance_name`. A job that has
/// already burned its attempt budget goes to `Error` instead of back to
/// `Ready` (spec.md §7: "a job has a bounded attempt budget ... when
/// exceeded, the job transitions to Error with reason too_many_attempts").
async fn drain_instance(deps: &DriverDeps, instance_name: &str) -> Result<(), sqlx::Error> {
    let running: Vec<(BatchId, JobId, AttemptId, i64)> = sqlx::query_as::<_, (i64, i64, String, i64)>(
        "SELECT j.batch_id, j.job_id, j.current_attempt_id, j.cores_mcpu
         FROM jobs j
         WHERE j.state = 'running'
           AND j.current_attempt_id IS NOT NULL
           AND EXISTS (
               SELECT 1 FROM attempts a
               WHERE a.batch_id = j.batch_id AND a.job_id = j.job_id
                 AND a.attempt_id = j.current_attempt_id AND a.instance_name = $1
           )",
    )
    .bind(instance_name)
    .fetch_all(&deps.db)
    .await?
    .into_iter()
    .map(|(batch_id, job_id, attempt_id, cores_mcpu)| (batch_id, job_id, AttemptId::from(attempt_id), cores_mcpu))
    .collect();

    for (batch_id, job_id, attempt_id, cores_mcpu) in running {
        let attempt_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM attempts WHERE batch_id = $1 AND job_id = $2",
        )
        .bind(batch_id)
        .bind(job_id)
        .fetch_one(&deps.db)
        .await?;

        if attempt_count >= deps.config.max_attempts_per_job as i64 {
            let status = json!({ "reason": "too_many_attempts" });
            let outcome = procedures::mark_job_complete(
                &deps.db,
                batch_id,
                job_id,
                &attempt_id,
                JobState::Error,
                &status,
                None,
                Utc::now(),
                AttemptReason::Preempted,
            )
            .await
            .map_err(|_| sqlx::Error::Protocol("mark_job_complete failed during drain".into()))?;
            if let Some(instance_name) = &outcome.instance_name {
                deps.ipr.release(instance_name, outcome.cores_mcpu).await;
            }
            if let Some(completed) = outcome.batch_completed {
                crate::callback::notify_batch_complete(&deps.http_client, &deps.db, completed).await;
            }
        } else if let Err(err) =
            procedures::unschedule_job(&deps.db, batch_id, job_id, instance_name, Utc::now(), AttemptReason::Preempted).await
        {
            tracing::warn!(batch_id, job_id, instance = %instance_name, error = %err, "failed to unschedule job during instance drain");
        } else {
            // Job went back to Ready; the instance no longer holds its cores.
            deps.ipr.release(instance_name, cores_mcpu).await;
        }
        deps.signal.fire();
    }

    Ok(())
}
