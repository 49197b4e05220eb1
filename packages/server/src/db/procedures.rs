//! Persistent-Store transactional procedures (spec.md §4.2).
//!
//! Design Notes (spec.md §9): "Stored procedures used for atomic multi-row
//! transitions may be replaced by application-side transactions, provided
//! the same invariants are preserved." Each function here runs inside a
//! single `SERIALIZABLE`-safe transaction (Postgres `REPEATABLE READ` plus
//! row locks is sufficient given the access pattern) and is wrapped by
//! [`crate::common::retry_transaction`] so a deadlock or serialization
//! failure retries the whole procedure rather than surfacing to the
//! caller — the Postgres analogue of the original service's
//! `retry_deadlock`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};

use crate::common::{retry_transaction, AttemptId, BatchId, JobId};
use crate::db::models::{AttemptReason, BatchState, JobState};
use crate::error::AppError;

/// A single job within a `create-jobs` bunch, already resource-normalized
/// by the caller (spec.md §4.1: "Computes the effective `cores_mcpu`").
#[derive(Debug, Clone)]
pub struct CreateJobSpec {
    pub job_id: JobId,
    pub pool_name: String,
    pub cores_mcpu: i64,
    pub always_run: bool,
    pub parent_ids: Vec<JobId>,
    /// `None` when the spec was large enough to be written to LS instead
    /// (spec.md §3).
    pub spec: Option<Value>,
    pub attributes: Value,
}

#[derive(Debug, Clone)]
pub struct MarkCompleteOutcome {
    pub old_state: JobState,
    pub cores_mcpu: i64,
    pub instance_name: Option<String>,
    /// Set once, the moment the batch transitions to `Complete` as a
    /// result of this call — the driver's completion-ingest loop uses this
    /// to fire the user callback exactly once.
    pub batch_completed: Option<BatchId>,
}

#[derive(Debug, Clone)]
pub struct CloseBatchError {
    pub expected_n_jobs: i32,
    pub actual_n_jobs: i32,
}

/// spec.md §4.1 `create-batch`: idempotent on `(owner, token)`.
pub async fn create_batch(
    pool: &PgPool,
    owner: &str,
    billing_project: &str,
    token: &str,
    n_jobs: i32,
    callback_url: Option<&str>,
    attributes: &Value,
) -> Result<BatchId, AppError> {
    retry_transaction(|| async {
        let mut tx = pool.begin().await?;

        if let Some(existing) = sqlx::query_scalar::<_, BatchId>(
            "SELECT id FROM batches WHERE owner = $1 AND token = $2",
        )
        .bind(owner)
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?
        {
            tx.commit().await?;
            return Ok(existing);
        }

        let project = sqlx::query_as::<_, (String, Option<f64>, f64)>(
            "SELECT status::text, spend_limit, accrued_cost FROM billing_projects WHERE name = $1 FOR UPDATE",
        )
        .bind(billing_project)
        .fetch_optional(&mut *tx)
        .await?;

        let (status, spend_limit, accrued_cost) = match project {
            Some(row) => row,
            None => {
                return Err(sqlx::Error::RowNotFound);
            }
        };
        if status != "open" || spend_limit.is_some_and(|limit| accrued_cost >= limit) {
            return Err(sqlx::Error::Protocol("billing project is not accepting batches".into()));
        }

        let id: BatchId = sqlx::query_scalar(
            "INSERT INTO batches (owner, billing_project, token, n_jobs, state, callback_url, attributes)
             VALUES ($1, $2, $3, $4, 'open', $5, $6)
             RETURNING id",
        )
        .bind(owner)
        .bind(billing_project)
        .bind(token)
        .bind(n_jobs)
        .bind(callback_url)
        .bind(attributes)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    })
    .await
    .map_err(map_create_batch_error)
}

fn map_create_batch_error(err: sqlx::Error) -> AppError {
    match err {
        sqlx::Error::RowNotFound => AppError::not_found("billing project not found"),
        sqlx::Error::Protocol(msg) => AppError::Forbidden(msg),
        other => AppError::from(other),
    }
}

/// spec.md §4.1 `create-jobs`: only while the batch is open; idempotent by
/// first-job primary-key collision.
pub async fn create_jobs(
    pool: &PgPool,
    batch_id: BatchId,
    jobs: &[CreateJobSpec],
) -> Result<(), AppError> {
    if jobs.is_empty() {
        return Ok(());
    }

    retry_transaction(|| async {
        let mut tx = pool.begin().await?;

        let (state, closed): (String, bool) = sqlx::query_as(
            "SELECT state::text, closed FROM batches WHERE id = $1 FOR UPDATE",
        )
        .bind(batch_id)
        .fetch_one(&mut *tx)
        .await?;
        if state != "open" || closed {
            return Err(sqlx::Error::Protocol("batch is not open".into()));
        }

        // Idempotent retry: if the first job in this bunch already exists,
        // the whole bunch was already inserted.
        let first = &jobs[0];
        let already_inserted: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM jobs WHERE batch_id = $1 AND job_id = $2)",
        )
        .bind(batch_id)
        .bind(first.job_id)
        .fetch_one(&mut *tx)
        .await?;
        if already_inserted {
            tx.commit().await?;
            return Ok(());
        }

        for job in jobs {
            let n_pending_parents = job.parent_ids.len() as i32;
            let initial_state = if n_pending_parents == 0 {
                JobState::Ready
            } else {
                JobState::Pending
            };

            sqlx::query(
                "INSERT INTO jobs (batch_id, job_id, state, cores_mcpu, pool_name, always_run, n_pending_parents, spec, attributes)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(batch_id)
            .bind(job.job_id)
            .bind(initial_state)
            .bind(job.cores_mcpu)
            .bind(&job.pool_name)
            .bind(job.always_run)
            .bind(n_pending_parents)
            .bind(&job.spec)
            .bind(&job.attributes)
            .execute(&mut *tx)
            .await?;

            for parent_id in &job.parent_ids {
                sqlx::query(
                    "INSERT INTO job_parents (batch_id, job_id, parent_id) VALUES ($1, $2, $3)",
                )
                .bind(batch_id)
                .bind(job.job_id)
                .bind(parent_id)
                .execute(&mut *tx)
                .await?;
            }

            bump_staging_counters(&mut tx, batch_id, &job.pool_name, 1, 0, 0, 0, 0).await?;
            if initial_state == JobState::Ready {
                let cancellable = if job.always_run { 0 } else { 1 };
                let cancellable_cores = if job.always_run { 0 } else { job.cores_mcpu };
                bump_staging_counters(
                    &mut tx,
                    batch_id,
                    &job.pool_name,
                    0,
                    1,
                    job.cores_mcpu,
                    cancellable,
                    cancellable_cores,
                )
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    })
    .await
    .map_err(|err| match err {
        sqlx::Error::Protocol(msg) => AppError::wrong_state(msg),
        other => AppError::from(other),
    })
}

/// spec.md §4.2 `schedule_job`: precondition `job.state = Ready ∧ batch not
/// cancelled`.
pub async fn schedule_job(
    pool: &PgPool,
    batch_id: BatchId,
    job_id: JobId,
    attempt_id: &AttemptId,
    instance_name: &str,
) -> Result<(), AppError> {
    retry_transaction(|| async {
        let mut tx = pool.begin().await?;

        let row = sqlx::query_as::<_, (String, String, i64, bool)>(
            "SELECT j.state::text, j.pool_name, j.cores_mcpu, b.cancelled
             FROM jobs j JOIN batches b ON b.id = j.batch_id
             WHERE j.batch_id = $1 AND j.job_id = $2 FOR UPDATE OF j",
        )
        .bind(batch_id)
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;
        let (state, pool_name, cores_mcpu, batch_cancelled) = row;
        if state != "ready" || batch_cancelled {
            return Err(sqlx::Error::Protocol("job is not ready to schedule".into()));
        }

        sqlx::query(
            "INSERT INTO attempts (batch_id, job_id, attempt_id, instance_name, start_time)
             VALUES ($1, $2, $3, $4, NOW())",
        )
        .bind(batch_id)
        .bind(job_id)
        .bind(attempt_id.as_str())
        .bind(instance_name)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE jobs SET state = 'running', current_attempt_id = $3
             WHERE batch_id = $1 AND job_id = $2",
        )
        .bind(batch_id)
        .bind(job_id)
        .bind(attempt_id.as_str())
        .execute(&mut *tx)
        .await?;

        bump_staging_counters(&mut tx, batch_id, &pool_name, 0, -1, -cores_mcpu, 0, 0).await?;

        tx.commit().await?;
        Ok(())
    })
    .await
    .map_err(|err| match err {
        sqlx::Error::Protocol(msg) => AppError::wrong_state(msg),
        other => AppError::from(other),
    })
}

/// spec.md §4.2 `unschedule_job`: precondition `job.state = Running` on
/// `instance_name`. Used by cancel and by instance-loss reconciliation.
pub async fn unschedule_job(
    pool: &PgPool,
    batch_id: BatchId,
    job_id: JobId,
    instance_name: &str,
    end_time: DateTime<Utc>,
    reason: AttemptReason,
) -> Result<(), AppError> {
    retry_transaction(|| async {
        let mut tx = pool.begin().await?;

        let row = sqlx::query_as::<_, (String, String, i64, Option<String>)>(
            "SELECT state::text, pool_name, cores_mcpu, current_attempt_id
             FROM jobs WHERE batch_id = $1 AND job_id = $2 FOR UPDATE",
        )
        .bind(batch_id)
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;
        let (state, pool_name, cores_mcpu, attempt_id) = row;
        let Some(attempt_id) = attempt_id else {
            return Err(sqlx::Error::Protocol("job has no live attempt".into()));
        };
        if state != "running" {
            return Err(sqlx::Error::Protocol("job is not running".into()));
        }

        sqlx::query(
            "UPDATE attempts SET end_time = $4, reason = $5
             WHERE batch_id = $1 AND job_id = $2 AND attempt_id = $3 AND instance_name = $6",
        )
        .bind(batch_id)
        .bind(job_id)
        .bind(&attempt_id)
        .bind(end_time)
        .bind(reason)
        .bind(instance_name)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE jobs SET state = 'ready', current_attempt_id = NULL
             WHERE batch_id = $1 AND job_id = $2",
        )
        .bind(batch_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        let (always_run,): (bool,) = sqlx::query_as(
            "SELECT always_run FROM jobs WHERE batch_id = $1 AND job_id = $2",
        )
        .bind(batch_id)
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;
        let cancellable = if always_run { 0 } else { 1 };
        let cancellable_cores = if always_run { 0 } else { cores_mcpu };
        bump_staging_counters(
            &mut tx,
            batch_id,
            &pool_name,
            0,
            1,
            cores_mcpu,
            cancellable,
            cancellable_cores,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    })
    .await
    .map_err(|err| match err {
        sqlx::Error::Protocol(msg) => AppError::wrong_state(msg),
        other => AppError::from(other),
    })
}

/// spec.md §4.2 `mark_job_complete`. Idempotent: replayed on an
/// already-terminal job is a no-op returning the prior terminal state.
#[allow(clippy::too_many_arguments)]
pub async fn mark_job_complete(
    pool: &PgPool,
    batch_id: BatchId,
    job_id: JobId,
    attempt_id: &AttemptId,
    new_state: JobState,
    status: &Value,
    start: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
    reason: AttemptReason,
) -> Result<MarkCompleteOutcome, AppError> {
    if !new_state.is_terminal() {
        return Err(AppError::validation("mark_job_complete requires a terminal state"));
    }

    retry_transaction(|| async {
        let mut tx = pool.begin().await?;

        let row = sqlx::query_as::<_, (String, i64, Option<String>, String, bool)>(
            "SELECT j.state::text, j.cores_mcpu, a.instance_name, j.pool_name, j.always_run
             FROM jobs j
             LEFT JOIN attempts a ON a.batch_id = j.batch_id AND a.job_id = j.job_id AND a.attempt_id = $3
             WHERE j.batch_id = $1 AND j.job_id = $2 FOR UPDATE OF j",
        )
        .bind(batch_id)
        .bind(job_id)
        .bind(attempt_id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let (old_state_str, cores_mcpu, instance_name, pool_name, always_run) = row;
        let old_state = parse_job_state(&old_state_str);

        if old_state.is_terminal() {
            tx.commit().await?;
            return Ok(MarkCompleteOutcome {
                old_state,
                cores_mcpu,
                instance_name,
                batch_completed: None,
            });
        }

        sqlx::query(
            "UPDATE attempts SET end_time = $4, reason = $5, start_time = COALESCE(start_time, $6)
             WHERE batch_id = $1 AND job_id = $2 AND attempt_id = $3",
        )
        .bind(batch_id)
        .bind(job_id)
        .bind(attempt_id.as_str())
        .bind(end)
        .bind(reason)
        .bind(start)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE jobs SET state = $3, current_attempt_id = NULL, spec = jsonb_set(COALESCE(spec, '{}'::jsonb), '{status}', $4)
             WHERE batch_id = $1 AND job_id = $2",
        )
        .bind(batch_id)
        .bind(job_id)
        .bind(new_state)
        .bind(status)
        .execute(&mut *tx)
        .await?;

        // A job can reach a terminal state directly from Ready (the WC
        // retry budget in the scheduler loop was exhausted before
        // `schedule_job` ever ran); its slot in the ready staging counters
        // must be released the same as if it had been scheduled.
        if old_state == JobState::Ready {
            let cancellable = if always_run { 0 } else { 1 };
            let cancellable_cores = if always_run { 0 } else { cores_mcpu };
            bump_staging_counters(
                &mut tx,
                batch_id,
                &pool_name,
                0,
                -1,
                -cores_mcpu,
                -cancellable,
                -cancellable_cores,
            )
            .await?;
        }

        // Propagate to children: decrement pending-parent counts; any
        // child that reaches zero becomes Ready and its cores join the
        // ready staging counters (spec.md §4.2(i)).
        let children: Vec<(JobId,)> = sqlx::query_as(
            "UPDATE jobs SET n_pending_parents = n_pending_parents - 1
             WHERE batch_id = $1 AND job_id IN (
                 SELECT job_id FROM job_parents WHERE batch_id = $1 AND parent_id = $2
             )
             RETURNING job_id",
        )
        .bind(batch_id)
        .bind(job_id)
        .fetch_all(&mut *tx)
        .await?;

        for (child_id,) in children {
            let (n_pending, child_state, pool_name, child_cores, always_run): (
                i32,
                String,
                String,
                i64,
                bool,
            ) = sqlx::query_as(
                "SELECT n_pending_parents, state::text, pool_name, cores_mcpu, always_run
                 FROM jobs WHERE batch_id = $1 AND job_id = $2",
            )
            .bind(batch_id)
            .bind(child_id)
            .fetch_one(&mut *tx)
            .await?;

            if n_pending <= 0 && child_state == "pending" {
                sqlx::query("UPDATE jobs SET state = 'ready' WHERE batch_id = $1 AND job_id = $2")
                    .bind(batch_id)
                    .bind(child_id)
                    .execute(&mut *tx)
                    .await?;

                let cancellable = if always_run { 0 } else { 1 };
                let cancellable_cores = if always_run { 0 } else { child_cores };
                bump_staging_counters(
                    &mut tx,
                    batch_id,
                    &pool_name,
                    0,
                    1,
                    child_cores,
                    cancellable,
                    cancellable_cores,
                )
                .await?;
            }
        }

        let (succeeded, failed, cancelled) = match new_state {
            JobState::Success => (1, 0, 0),
            JobState::Failed | JobState::Error => (0, 1, 0),
            JobState::Cancelled => (0, 0, 1),
            _ => unreachable!("checked terminal above"),
        };

        sqlx::query(
            "UPDATE batches
             SET n_completed = n_completed + 1,
                 n_succeeded = n_succeeded + $2,
                 n_failed = n_failed + $3,
                 n_cancelled = n_cancelled + $4
             WHERE id = $1",
        )
        .bind(batch_id)
        .bind(succeeded)
        .bind(failed)
        .bind(cancelled)
        .execute(&mut *tx)
        .await?;

        let (n_jobs, n_completed): (i32, i32) = sqlx::query_as(
            "SELECT n_jobs, n_completed FROM batches WHERE id = $1",
        )
        .bind(batch_id)
        .fetch_one(&mut *tx)
        .await?;

        let batch_completed = if n_completed >= n_jobs {
            sqlx::query(
                "UPDATE batches SET state = 'complete', completed_at = NOW()
                 WHERE id = $1 AND state != 'complete'",
            )
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;
            Some(batch_id)
        } else {
            None
        };

        tx.commit().await?;
        Ok(MarkCompleteOutcome {
            old_state,
            cores_mcpu,
            instance_name,
            batch_completed,
        })
    })
    .await
    .map_err(AppError::from)
}

/// Outcome of [`cancel_batch`]: the running attempts the driver must tell
/// to abort, plus the batch id if this call is what completed the batch
/// (cancelling its last non-terminal jobs synchronously, with no later
/// `mark_job_complete` to report it).
#[derive(Debug, Clone)]
pub struct CancelBatchOutcome {
    pub running: Vec<(JobId, String)>,
    pub batch_completed: Option<BatchId>,
}

/// spec.md §4.2 `cancel_batch`: transitions all non-terminal,
/// non-always-run jobs to `Cancelled`; returns `(job_id, instance_name)`
/// pairs whose running attempts the driver must tell to abort.
pub async fn cancel_batch(
    pool: &PgPool,
    batch_id: BatchId,
) -> Result<CancelBatchOutcome, AppError> {
    retry_transaction(|| async {
        let mut tx = pool.begin().await?;

        sqlx::query("UPDATE batches SET cancelled = true WHERE id = $1")
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;

        // Ready/Pending jobs that don't run-through-cancel become Cancelled
        // directly; a Pending job never joined the ready counters
        // (`create_jobs` only bumps them `if initial_state == Ready`), so
        // only a job that was actually Ready leaves them here. The CTE
        // captures each job's state before the UPDATE overwrites it —
        // RETURNING alone would only see the post-update 'cancelled' row.
        let newly_cancelled: Vec<(JobId, String, i64, String)> = sqlx::query_as(
            "WITH prior AS (
                 SELECT job_id, pool_name, cores_mcpu, state::text AS prior_state
                 FROM jobs
                 WHERE batch_id = $1 AND state IN ('pending', 'ready') AND always_run = false
                 FOR UPDATE
             )
             UPDATE jobs SET state = 'cancelled', n_pending_parents = 0
             FROM prior
             WHERE jobs.batch_id = $1 AND jobs.job_id = prior.job_id
             RETURNING jobs.job_id, prior.pool_name, prior.cores_mcpu, prior.prior_state",
        )
        .bind(batch_id)
        .fetch_all(&mut *tx)
        .await?;

        for (_job_id, pool_name, cores_mcpu, prior_state) in &newly_cancelled {
            sqlx::query(
                "UPDATE batches SET n_completed = n_completed + 1, n_cancelled = n_cancelled + 1 WHERE id = $1",
            )
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;
            if prior_state == "ready" {
                bump_staging_counters(&mut tx, batch_id, pool_name, 0, -1, -cores_mcpu, -1, -cores_mcpu)
                    .await?;
            }
        }

        let running: Vec<(JobId, String)> = sqlx::query_as(
            "SELECT j.job_id, a.instance_name
             FROM jobs j JOIN attempts a ON a.batch_id = j.batch_id AND a.job_id = j.job_id AND a.attempt_id = j.current_attempt_id
             WHERE j.batch_id = $1 AND j.state = 'running' AND j.always_run = false",
        )
        .bind(batch_id)
        .fetch_all(&mut *tx)
        .await?;

        let just_completed = maybe_complete_batch(&mut tx, batch_id).await?;

        tx.commit().await?;
        Ok(CancelBatchOutcome {
            running,
            batch_completed: just_completed.then_some(batch_id),
        })
    })
    .await
    .map_err(AppError::from)
}

/// spec.md §4.2 `close_batch`.
pub async fn close_batch(pool: &PgPool, batch_id: BatchId) -> Result<(), CloseBatchOutcome> {
    retry_transaction(|| async {
        let mut tx = pool.begin().await?;

        let (n_jobs_declared, actual_n_jobs): (i32, i64) = sqlx::query_as(
            "SELECT b.n_jobs, (SELECT COUNT(*) FROM jobs WHERE batch_id = $1)
             FROM batches b WHERE b.id = $1 FOR UPDATE",
        )
        .bind(batch_id)
        .fetch_one(&mut *tx)
        .await?;

        if n_jobs_declared as i64 != actual_n_jobs {
            tx.rollback().await?;
            return Ok(Err(CloseBatchOutcome::WrongJobCount {
                expected: n_jobs_declared,
                actual: actual_n_jobs as i32,
            }));
        }

        sqlx::query("UPDATE batches SET state = 'running', closed = true WHERE id = $1")
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Ok(()))
    })
    .await
    .map_err(|err| CloseBatchOutcome::Db(AppError::from(err)))?
}

/// Distinguishes the user-facing `wrong number of jobs` mismatch
/// (spec.md §6) from ordinary persistence errors.
#[derive(Debug)]
pub enum CloseBatchOutcome {
    WrongJobCount { expected: i32, actual: i32 },
    Db(AppError),
}

impl From<CloseBatchOutcome> for AppError {
    fn from(outcome: CloseBatchOutcome) -> Self {
        match outcome {
            CloseBatchOutcome::WrongJobCount { expected, actual } => AppError::validation(
                format!("wrong number of jobs: expected {expected}, actual {actual}"),
            ),
            CloseBatchOutcome::Db(err) => err,
        }
    }
}

/// Returns `true` iff this call is what flipped the batch to `complete`.
async fn maybe_complete_batch(
    tx: &mut Transaction<'_, Postgres>,
    batch_id: BatchId,
) -> Result<bool, sqlx::Error> {
    let (n_jobs, n_completed): (i32, i32) =
        sqlx::query_as("SELECT n_jobs, n_completed FROM batches WHERE id = $1")
            .bind(batch_id)
            .fetch_one(&mut **tx)
            .await?;
    if n_completed >= n_jobs {
        let result = sqlx::query(
            "UPDATE batches SET state = 'complete', completed_at = NOW() WHERE id = $1 AND state != 'complete'",
        )
        .bind(batch_id)
        .execute(&mut **tx)
        .await?;
        return Ok(result.rows_affected() > 0);
    }
    Ok(false)
}

#[allow(clippy::too_many_arguments)]
async fn bump_staging_counters(
    tx: &mut Transaction<'_, Postgres>,
    batch_id: BatchId,
    pool_name: &str,
    d_n_jobs: i64,
    d_n_ready_jobs: i64,
    d_ready_cores_mcpu: i64,
    d_n_ready_cancellable_jobs: i64,
    d_ready_cancellable_cores_mcpu: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO staging_counters (batch_id, pool_name, n_jobs, n_ready_jobs, ready_cores_mcpu, n_ready_cancellable_jobs, ready_cancellable_cores_mcpu)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (batch_id, pool_name) DO UPDATE SET
             n_jobs = staging_counters.n_jobs + EXCLUDED.n_jobs,
             n_ready_jobs = staging_counters.n_ready_jobs + EXCLUDED.n_ready_jobs,
             ready_cores_mcpu = staging_counters.ready_cores_mcpu + EXCLUDED.ready_cores_mcpu,
             n_ready_cancellable_jobs = staging_counters.n_ready_cancellable_jobs + EXCLUDED.n_ready_cancellable_jobs,
             ready_cancellable_cores_mcpu = staging_counters.ready_cancellable_cores_mcpu + EXCLUDED.ready_cancellable_cores_mcpu",
    )
    .bind(batch_id)
    .bind(pool_name)
    .bind(d_n_jobs)
    .bind(d_n_ready_jobs)
    .bind(d_ready_cores_mcpu)
    .bind(d_n_ready_cancellable_jobs)
    .bind(d_ready_cancellable_cores_mcpu)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn parse_job_state(s: &str) -> JobState {
    match s {
        "pending" => JobState::Pending,
        "ready" => JobState::Ready,
        "running" => JobState::Running,
        "cancelled" => JobState::Cancelled,
        "error" => JobState::Error,
        "failed" => JobState::Failed,
        "success" => JobState::Success,
        other => unreachable!("unknown job_state enum value: {other}"),
    }
}
