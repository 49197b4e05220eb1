//! Batch-level Front-End operations (spec.md §4.1, §6).

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::QueryBuilder;

use crate::common::{
    decode_cursor, parse_query, trim_page, validate_keywords, BatchId, Page,
    BATCH_STATE_KEYWORDS, PAGE_SIZE,
};
use crate::common::TermTarget;
use crate::db::models::Batch;
use crate::db::procedures::{self, CloseBatchOutcome};
use crate::error::{AppError, AppResult};

use super::auth::Identity;
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    pub n_jobs: i32,
    pub token: String,
    pub billing_project: String,
    pub callback_url: Option<String>,
    #[serde(default)]
    pub attributes: Value,
}

#[derive(Debug, Serialize)]
pub struct CreateBatchResponse {
    pub id: BatchId,
}

/// `POST /batches/create` (spec.md §4.1, §6). Idempotent on `(owner, token)`.
pub async fn create_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateBatchRequest>,
) -> AppResult<Json<CreateBatchResponse>> {
    let identity = Identity::from_headers(&headers).map_err(|(_, msg)| AppError::Forbidden(msg))?;
    if body.n_jobs < 0 {
        return Err(AppError::validation("n_jobs must be non-negative"));
    }

    let id = procedures::create_batch(
        &state.db,
        &identity.owner,
        &body.billing_project,
        &body.token,
        body.n_jobs,
        body.callback_url.as_deref(),
        &body.attributes,
    )
    .await?;

    Ok(Json(CreateBatchResponse { id }))
}

/// `PATCH /batches/{id}/close` (spec.md §4.1, §6). 400 with
/// `wrong number of jobs: expected N, actual M` on mismatch.
pub async fn close_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(batch_id): Path<BatchId>,
) -> AppResult<()> {
    let identity = Identity::from_headers(&headers).map_err(|(_, msg)| AppError::Forbidden(msg))?;
    require_owned_batch(&state, batch_id, &identity.owner).await?;

    match procedures::close_batch(&state.db, batch_id).await {
        Ok(()) => {
            state.signal.fire();
            Ok(())
        }
        Err(outcome @ CloseBatchOutcome::WrongJobCount { .. }) => Err(outcome.into()),
        Err(CloseBatchOutcome::Db(err)) => Err(err),
    }
}

/// `PATCH /batches/{id}/cancel` (spec.md §4.1). Only sets the `cancelled`
/// flag here — the actual job-state fan-out is the cancel-fanout Driver
/// loop's job (spec.md §4.4), signalled immediately after.
pub async fn cancel_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(batch_id): Path<BatchId>,
) -> AppResult<()> {
    let identity = Identity::from_headers(&headers).map_err(|(_, msg)| AppError::Forbidden(msg))?;
    require_owned_batch(&state, batch_id, &identity.owner).await?;

    sqlx::query("UPDATE batches SET cancelled = true WHERE id = $1")
        .bind(batch_id)
        .execute(&state.db)
        .await
        .map_err(AppError::from)?;
    state.signal.fire();
    Ok(())
}

/// `DELETE /batches/{id}` (spec.md §4.1). Marks deleted; the delete-fanout
/// loop (spec.md §4.4) releases any in-flight work.
pub async fn delete_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(batch_id): Path<BatchId>,
) -> AppResult<()> {
    let identity = Identity::from_headers(&headers).map_err(|(_, msg)| AppError::Forbidden(msg))?;
    require_owned_batch(&state, batch_id, &identity.owner).await?;

    sqlx::query("UPDATE batches SET deleted = true, cancelled = true WHERE id = $1")
        .bind(batch_id)
        .execute(&state.db)
        .await
        .map_err(AppError::from)?;
    state.signal.fire();
    Ok(())
}

/// `GET /batches/{id}` (spec.md §4.1, §6).
pub async fn get_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(batch_id): Path<BatchId>,
) -> AppResult<Json<Value>> {
    let identity = Identity::from_headers(&headers).map_err(|(_, msg)| AppError::Forbidden(msg))?;
    let batch = fetch_owned_batch(&state, batch_id, &identity.owner).await?;
    Ok(Json(batch.status_json()))
}

#[derive(Debug, Deserialize)]
pub struct ListBatchesQuery {
    #[serde(default)]
    pub q: String,
    pub last_batch_id: Option<String>,
}

/// `GET /batches` (spec.md §6): query grammar + opaque cursor pagination.
pub async fn list_batches(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListBatchesQuery>,
) -> AppResult<Json<Page<Value>>> {
    let identity = Identity::from_headers(&headers).map_err(|(_, msg)| AppError::Forbidden(msg))?;
    let terms = parse_query(&params.q);
    validate_keywords(&terms, BATCH_STATE_KEYWORDS)?;

    let mut qb = QueryBuilder::new(
        "SELECT id, owner, billing_project, token, n_jobs, n_completed, n_succeeded, n_failed,
                n_cancelled, state, closed, deleted, cancelled, callback_url, attributes,
                created_at, completed_at, format_version
         FROM batches WHERE owner = ",
    );
    qb.push_bind(&identity.owner).push(" AND deleted = false");

    for term in &terms {
        push_batch_term(&mut qb, term)?;
    }

    if let Some(cursor) = &params.last_batch_id {
        let after = decode_cursor(cursor).map_err(|e| AppError::validation(e.to_string()))?;
        qb.push(" AND id > ").push_bind(after);
    }

    qb.push(" ORDER BY id LIMIT ").push_bind(PAGE_SIZE + 1);

    let batches: Vec<Batch> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(AppError::from)?;

    let page = trim_page(batches, PAGE_SIZE, |b| b.id);
    Ok(Json(Page {
        items: page.items.into_iter().map(|b| b.status_json()).collect(),
        next_cursor: page.next_cursor,
    }))
}

fn push_batch_term(qb: &mut QueryBuilder<sqlx::Postgres>, term: &crate::common::QueryTerm) -> AppResult<()> {
    let word = match &term.target {
        TermTarget::Attribute { key, value } => {
            qb.push(" AND ");
            if term.negated {
                qb.push("NOT ");
            }
            qb.push("(attributes ->> ")
                .push_bind(key.clone())
                .push(") = ")
                .push_bind(value.clone());
            return Ok(());
        }
        TermTarget::HasKey(key) => {
            qb.push(" AND ");
            if term.negated {
                qb.push("NOT ");
            }
            qb.push("attributes ? ").push_bind(key.clone());
            return Ok(());
        }
        TermTarget::Keyword(word) => word.as_str(),
    };

    let sql = match word {
        "open" => "state = 'open'",
        "running" => "state = 'running'",
        "complete" => "state = 'complete'",
        "closed" => "closed = true",
        "cancelled" => "cancelled = true",
        "failure" => "state = 'complete' AND n_failed > 0",
        "success" => "state = 'complete' AND n_failed = 0 AND n_cancelled = 0",
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

async fn fetch_owned_batch(state: &AppState, batch_id: BatchId, owner: &str) -> AppResult<Batch> {
    sqlx::query_as::<_, Batch>(
        "SELECT id, owner, billing_project, token, n_jobs, n_completed, n_succeeded, n_failed,
                n_cancelled, state, closed, deleted, cancelled, callback_url, attributes,
                created_at, completed_at, format_version
         FROM batches WHERE id = $1 AND owner = $2 AND deleted = false",
    )
    .bind(batch_id)
    .bind(owner)
    .fetch_optional(&state.db)
    .await
    .map_err(AppError::from)?
    .ok_or_else(|| AppError::not_found(format!("batch {batch_id} not found")))
}

async fn require_owned_batch(state: &AppState, batch_id: BatchId, owner: &str) -> AppResult<()> {
    fetch_owned_batch(state, batch_id, owner).await.map(|_| ())
}

/// `jobs.rs` needs the same ownership check before touching a batch's jobs.
pub(super) async fn ensure_batch_owned(state: &AppState, batch_id: BatchId, owner: &str) -> AppResult<()> {
    require_owned_batch(state, batch_id, owner).await
}
