//! Job-level Front-End operations (spec.md §4.1, §6): bunch creation,
//! reads, logs, attempts, and worker-to-service callbacks.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::QueryBuilder;

use crate::common::{
    decode_cursor, parse_query, trim_page, validate_keywords, AttemptId, BatchId, JobId, Page,
    TermTarget, JOB_STATE_KEYWORDS, PAGE_SIZE,
};
use crate::db::models::{compute_job_resources, AttemptReason, Job, JobState};
use crate::db::procedures::{self, CreateJobSpec, MarkCompleteOutcome};
use crate::error::{AppError, AppResult};
use crate::ls::LogTask;

use super::auth::Identity;
use super::batches::ensure_batch_owned;
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct JobSpecInput {
    pub job_id: JobId,
    pub pool: String,
    #[serde(default)]
    pub always_run: bool,
    #[serde(default)]
    pub parent_ids: Vec<JobId>,
    /// Cores, in whole or fractional units (spec.md §4.1 example: `cpu=1`).
    pub cpu: f64,
    #[serde(default)]
    pub memory_gib: f64,
    #[serde(default)]
    pub storage_gib: f64,
    #[serde(default)]
    pub secrets: Vec<String>,
    pub network: Option<String>,
    pub spec: Value,
    #[serde(default)]
    pub attributes: Value,
}

#[derive(Debug, Deserialize)]
pub struct CreateJobsRequest {
    pub jobs: Vec<JobSpecInput>,
}

/// `POST /batches/{id}/jobs/create` (spec.md §4.1, §6).
///
/// Validates every job before inserting any of them (spec.md scenario 5:
/// "no jobs inserted" on a rejected bunch), then hands the normalized
/// specs to the single atomic [`procedures::create_jobs`] transaction.
pub async fn create_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(batch_id): Path<BatchId>,
    Json(body): Json<CreateJobsRequest>,
) -> AppResult<()> {
    let identity = Identity::from_headers(&headers).map_err(|(_, msg)| AppError::Forbidden(msg))?;
    ensure_batch_owned(&state, batch_id, &identity.owner).await?;

    if body.jobs.is_empty() {
        return Ok(());
    }

    validate_contiguous_ids(&body.jobs)?;
    validate_unique_parents(&body.jobs)?;

    let max_existing: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(job_id), 0) FROM jobs WHERE batch_id = $1",
    )
    .bind(batch_id)
    .fetch_one(&state.db)
    .await
    .map_err(AppError::from)?;

    let first_id = body.jobs[0].job_id;
    if first_id != max_existing + 1 && first_id > max_existing {
        return Err(AppError::validation(format!(
            "job ids must be contiguous starting at {}: got {}",
            max_existing + 1,
            first_id
        )));
    }

    let mut specs = Vec::with_capacity(body.jobs.len());
    for job in &body.jobs {
        if !job.secrets.is_empty() && !identity.privileged {
            return Err(AppError::Forbidden(
                "non-privileged users cannot mount secrets".to_string(),
            ));
        }
        if let Some(network) = &job.network {
            if network != "public" && !identity.privileged {
                return Err(AppError::Forbidden(format!(
                    "non-privileged users cannot request network mode '{network}'"
                )));
            }
        }

        let pool = state
            .config
            .pool(&job.pool)
            .ok_or_else(|| AppError::validation(format!("unknown pool '{}'", job.pool)))?;

        let requested_cores_mcpu = (job.cpu * 1000.0).round() as i64;
        let resources = compute_job_resources(requested_cores_mcpu, job.memory_gib, job.storage_gib, pool)
            .map_err(AppError::validation)?;

        specs.push(CreateJobSpec {
            job_id: job.job_id,
            pool_name: job.pool.clone(),
            cores_mcpu: resources.cores_mcpu,
            always_run: job.always_run,
            parent_ids: job.parent_ids.clone(),
            spec: Some(job.spec.clone()),
            attributes: job.attributes.clone(),
        });
    }

    procedures::create_jobs(&state.db, batch_id, &specs).await?;
    state.signal.fire();
    Ok(())
}

fn validate_contiguous_ids(jobs: &[JobSpecInput]) -> AppResult<()> {
    for window in jobs.windows(2) {
        if window[1].job_id != window[0].job_id + 1 {
            return Err(AppError::validation(
                "job ids within a bunch must be contiguous",
            ));
        }
    }
    Ok(())
}

fn validate_unique_parents(jobs: &[JobSpecInput]) -> AppResult<()> {
    for job in jobs {
        let mut seen = std::collections::HashSet::new();
        for parent in &job.parent_ids {
            if !seen.insert(parent) {
                return Err(AppError::validation(format!(
                    "job {} lists parent {parent} more than once",
                    job.job_id
                )));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub q: String,
    pub last_job_id: Option<String>,
}

/// `GET /batches/{id}/jobs` (spec.md §6).
pub async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(batch_id): Path<BatchId>,
    Query(params): Query<ListJobsQuery>,
) -> AppResult<Json<Page<Job>>> {
    let identity = Identity::from_headers(&headers).map_err(|(_, msg)| AppError::Forbidden(msg))?;
    ensure_batch_owned(&state, batch_id, &identity.owner).await?;

    let terms = parse_query(&params.q);
    validate_keywords(&terms, JOB_STATE_KEYWORDS)?;

    let mut qb = QueryBuilder::new(
        "SELECT batch_id, job_id, state, cores_mcpu, pool_name, always_run, n_pending_parents,
                current_attempt_id, spec, attributes, created_at
         FROM jobs WHERE batch_id = ",
    );
    qb.push_bind(batch_id);

    for term in &terms {
        push_job_term(&mut qb, term)?;
    }

    if let Some(cursor) = &params.last_job_id {
        let after = decode_cursor(cursor).map_err(|e| AppError::validation(e.to_string()))?;
        qb.push(" AND job_id > ").push_bind(after);
    }

    qb.push(" ORDER BY job_id LIMIT ").push_bind(PAGE_SIZE + 1);

    let jobs: Vec<Job> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(AppError::from)?;

    Ok(Json(trim_page(jobs, PAGE_SIZE, |j| j.job_id)))
}

fn push_job_term(qb: &mut QueryBuilder<sqlx::Postgres>, term: &crate::common::QueryTerm) -> AppResult<()> {
    match &term.target {
        TermTarget::Attribute { key, value } => {
            qb.push(" AND ");
            if term.negated {
                qb.push("NOT ");
            }
            qb.push("(attributes ->> ")
                .push_bind(key.clone())
                .push(") = ")
                .push_bind(value.clone());
            Ok(())
        }
        TermTarget::HasKey(key) => {
            qb.push(" AND ");
            if term.negated {
                qb.push("NOT ");
            }
            qb.push("attributes ? ").push_bind(key.clone());
            Ok(())
        }
        TermTarget::Keyword(word) => {
            let sql = match word.as_str() {
                "pending" => "state = 'pending'",
                "ready" => "state = 'ready'",
                "running" | "live" => "state = 'running'",
                "cancelled" => "state = 'cancelled'",
                "error" => "state = 'error'",
                "failed" => "state = 'failed'",
                "success" => "state = 'success'",
                "bad" => "state IN ('error', 'failed')",
                "done" => "state IN ('success', 'failed', 'error', 'cancelled')",
                other => return Err(AppError::validation(format!("unknown query term: {other}"))),
            };
            qb.push(" AND ");
            if term.negated {
                qb.push("NOT (").push(sql).push(")");
            } else {
                qb.push(sql);
            }
            Ok(())
        }
    }
}

/// `GET /batches/{id}/jobs/{jid}` (spec.md §6).
pub async fn get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((batch_id, job_id)): Path<(BatchId, JobId)>,
) -> AppResult<Json<Job>> {
    let identity = Identity::from_headers(&headers).map_err(|(_, msg)| AppError::Forbidden(msg))?;
    ensure_batch_owned(&state, batch_id, &identity.owner).await?;
    fetch_job(&state, batch_id, job_id).await.map(Json)
}

async fn fetch_job(state: &AppState, batch_id: BatchId, job_id: JobId) -> AppResult<Job> {
    sqlx::query_as::<_, Job>(
        "SELECT batch_id, job_id, state, cores_mcpu, pool_name, always_run, n_pending_parents,
                current_attempt_id, spec, attributes, created_at
         FROM jobs WHERE batch_id = $1 AND job_id = $2",
    )
    .bind(batch_id)
    .bind(job_id)
    .fetch_optional(&state.db)
    .await
    .map_err(AppError::from)?
    .ok_or_else(|| AppError::not_found(format!("job {batch_id}/{job_id} not found")))
}

/// `GET /batches/{id}/jobs/{jid}/log` (spec.md §4.1, §6): live from the
/// worker for a Running attempt, from LS otherwise.
pub async fn get_job_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((batch_id, job_id)): Path<(BatchId, JobId)>,
) -> AppResult<Json<Value>> {
    let identity = Identity::from_headers(&headers).map_err(|(_, msg)| AppError::Forbidden(msg))?;
    ensure_batch_owned(&state, batch_id, &identity.owner).await?;
    let job = fetch_job(&state, batch_id, job_id).await?;

    if job.state == JobState::Running {
        if let Some(attempt_id) = &job.current_attempt_id {
            let instance_name: Option<String> = sqlx::query_scalar(
                "SELECT instance_name FROM attempts WHERE batch_id = $1 AND job_id = $2 AND attempt_id = $3",
            )
            .bind(batch_id)
            .bind(job_id)
            .bind(attempt_id)
            .fetch_optional(&state.db)
            .await
            .map_err(AppError::from)?;
            if let Some(instance_name) = instance_name {
                let address = state
                    .ipr
                    .snapshot()
                    .await
                    .into_iter()
                    .find(|i| i.name == instance_name)
                    .map(|i| i.address);
                if let Some(address) = address {
                    let main = state.worker_client.log(&address, batch_id, job_id, "main").await?;
                    return Ok(Json(serde_json::json!({ "main": String::from_utf8_lossy(&main) })));
                }
            }
        }
    }

    // Terminal job (or a Running job whose instance vanished from the
    // IPR): fall back to its last attempt for the LS read.
    let attempt_id = match job.current_attempt_id.clone() {
        Some(id) => id,
        None => latest_attempt_id(&state, batch_id, job_id).await?,
    };
    let attempt_id = AttemptId::from(attempt_id);

    let instance_name: String = sqlx::query_scalar(
        "SELECT instance_name FROM attempts WHERE batch_id = $1 AND job_id = $2 AND attempt_id = $3",
    )
    .bind(batch_id)
    .bind(job_id)
    .bind(attempt_id.as_str())
    .fetch_one(&state.db)
    .await
    .map_err(AppError::from)?;

    let mut streams = serde_json::Map::new();
    for task in [LogTask::Input, LogTask::Main, LogTask::Output] {
        if let Some(bytes) = state
            .log_store
            .read_log(&instance_name, batch_id, job_id, &attempt_id, task)
            .await?
        {
            streams.insert(task.as_str().to_string(), Value::String(String::from_utf8_lossy(&bytes).to_string()));
        }
    }
    Ok(Json(Value::Object(streams)))
}

async fn latest_attempt_id(state: &AppState, batch_id: BatchId, job_id: JobId) -> AppResult<String> {
    sqlx::query_scalar(
        "SELECT attempt_id FROM attempts WHERE batch_id = $1 AND job_id = $2 ORDER BY start_time DESC NULLS LAST LIMIT 1",
    )
    .bind(batch_id)
    .bind(job_id)
    .fetch_optional(&state.db)
    .await
    .map_err(AppError::from)?
    .ok_or_else(|| AppError::not_found("job has no attempts"))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AttemptView {
    pub attempt_id: String,
    pub instance_name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub reason: Option<AttemptReason>,
}

/// `GET /batches/{id}/jobs/{jid}/attempts` (spec.md §6).
pub async fn get_attempts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((batch_id, job_id)): Path<(BatchId, JobId)>,
) -> AppResult<Json<Vec<AttemptView>>> {
    let identity = Identity::from_headers(&headers).map_err(|(_, msg)| AppError::Forbidden(msg))?;
    ensure_batch_owned(&state, batch_id, &identity.owner).await?;

    let attempts: Vec<AttemptView> = sqlx::query_as(
        "SELECT attempt_id, instance_name, start_time, end_time, reason
         FROM attempts WHERE batch_id = $1 AND job_id = $2 ORDER BY start_time",
    )
    .bind(batch_id)
    .bind(job_id)
    .fetch_all(&state.db)
    .await
    .map_err(AppError::from)?;

    Ok(Json(attempts))
}

#[derive(Debug, Deserialize)]
pub struct MarkStartedRequest {
    pub attempt_id: String,
    pub start_time: DateTime<Utc>,
}

/// `POST /batches/{id}/jobs/{jid}/started`: worker callback (spec.md §4.1,
/// §6), idempotent by `(batch, job, attempt)`.
pub async fn mark_job_started(
    State(state): State<AppState>,
    Path((batch_id, job_id)): Path<(BatchId, JobId)>,
    Json(body): Json<MarkStartedRequest>,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE attempts SET start_time = $4
         WHERE batch_id = $1 AND job_id = $2 AND attempt_id = $3 AND end_time IS NULL",
    )
    .bind(batch_id)
    .bind(job_id)
    .bind(&body.attempt_id)
    .bind(body.start_time)
    .execute(&state.db)
    .await
    .map_err(AppError::from)?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct MarkCompleteRequest {
    pub attempt_id: String,
    pub new_state: JobState,
    #[serde(default)]
    pub status: Value,
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
    pub reason: AttemptReason,
}

#[derive(Debug, Serialize)]
pub struct MarkCompleteResponse {
    pub old_state: JobState,
}

/// `POST /batches/{id}/jobs/{jid}/complete`: worker callback (spec.md
/// §4.1, §4.2, §6). Idempotent: replayed on an already-terminal job is a
/// no-op returning the prior terminal state (spec.md §8 law).
pub async fn mark_job_complete(
    State(state): State<AppState>,
    Path((batch_id, job_id)): Path<(BatchId, JobId)>,
    Json(body): Json<MarkCompleteRequest>,
) -> AppResult<Json<MarkCompleteResponse>> {
    let attempt_id = AttemptId::from(body.attempt_id);

    let MarkCompleteOutcome {
        old_state,
        cores_mcpu,
        instance_name,
        batch_completed,
    } = procedures::mark_job_complete(
        &state.db,
        batch_id,
        job_id,
        &attempt_id,
        body.new_state,
        &body.status,
        body.start,
        body.end,
        body.reason,
    )
    .await?;

    // Release the instance's reserved cores in IPR now that the attempt is
    // over (spec.md §3: `free_cores_mcpu` is the in-memory gauge the
    // scheduler reads; PS itself never stores it).
    if let Some(instance_name) = instance_name {
        state.ipr.release(&instance_name, cores_mcpu).await;
    }

    if let Some(completed) = batch_completed {
        crate::callback::notify_batch_complete(&state.http_client, &state.db, completed).await;
    }

    state.signal.fire();
    Ok(Json(MarkCompleteResponse { old_state }))
}
