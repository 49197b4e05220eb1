//! User-supplied batch-completion callback (spec.md §6, §9).
//!
//! Grounded on `batch.py::notify_batch_job_complete`: a single best-effort
//! POST, fired once a batch transitions to `complete` and only if it has a
//! `callback_url`. Design Notes §9 resolves the delivery-semantics open
//! question by keeping this at-most-once with no retry and no outbox,
//! matching the original exactly — failures are logged, never retried.

use sqlx::PgPool;

use crate::common::BatchId;
use crate::db::models::Batch;

/// Fetches the batch's current counters and, if it has a `callback_url`,
/// POSTs its status JSON. Errors are swallowed after logging: the caller
/// (completion ingest) must not fail the job-completion path because a
/// user's webhook is unreachable.
pub async fn notify_batch_complete(client: &reqwest::Client, db: &PgPool, batch_id: BatchId) {
    let batch: Option<Batch> = match sqlx::query_as::<_, Batch>(
        "SELECT id, owner, billing_project, token, n_jobs, n_completed, n_succeeded, n_failed,
                n_cancelled, state, closed, deleted, cancelled, callback_url, attributes,
                created_at, completed_at, format_version
         FROM batches WHERE id = $1 AND deleted = false AND callback_url IS NOT NULL",
    )
    .bind(batch_id)
    .fetch_optional(db)
    .await
    {
        Ok(batch) => batch,
        Err(err) => {
            tracing::error!(batch_id, error = %err, "failed to load batch for completion callback");
            return;
        }
    };

    let Some(batch) = batch else {
        return;
    };
    let Some(url) = batch.callback_url.clone() else {
        return;
    };

    let body = batch.status_json();
    tracing::info!(batch_id, url = %url, "making completion callback");
    match client
        .post(&url)
        .timeout(std::time::Duration::from_secs(60))
        .json(&body)
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => {
            tracing::info!(batch_id, "completion callback succeeded");
        }
        Ok(resp) => {
            tracing::warn!(batch_id, status = %resp.status(), "completion callback failed, will not retry");
        }
        Err(err) => {
            tracing::warn!(batch_id, error = %err, "completion callback failed, will not retry");
        }
    }
}

