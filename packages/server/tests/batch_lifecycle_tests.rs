//! End-to-end exercise of the Persistent Store procedures against a real
//! Postgres instance (spec.md §4.2).

mod common;

use batch_core::common::AttemptId;
use batch_core::db::models::{AttemptReason, JobState};
use batch_core::db::procedures::{self, CreateJobSpec};
use common::TestHarness;
use serde_json::json;
use test_context::test_context;

fn job(job_id: i64, parents: Vec<i64>) -> CreateJobSpec {
    CreateJobSpec {
        job_id,
        pool_name: "default".to_string(),
        cores_mcpu: 1_000,
        always_run: false,
        parent_ids: parents,
        spec: Some(json!({"image": "ubuntu:22.04"})),
        attributes: json!({}),
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn create_batch_is_idempotent_on_owner_and_token(ctx: &TestHarness) {
    let project = ctx.billing_project("proj-idempotent").await.unwrap();

    let first = procedures::create_batch(&ctx.db, "alice", &project, "tok-1", 0, None, &json!({}))
        .await
        .unwrap();
    let second = procedures::create_batch(&ctx.db, "alice", &project, "tok-1", 0, None, &json!({}))
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn job_with_no_parents_starts_ready(ctx: &TestHarness) {
    let project = ctx.billing_project("proj-ready").await.unwrap();
    let batch_id = procedures::create_batch(&ctx.db, "alice", &project, "tok-ready", 1, None, &json!({}))
        .await
        .unwrap();

    procedures::create_jobs(&ctx.db, batch_id, &[job(1, vec![])]).await.unwrap();

    let state: (String,) = sqlx::query_as("SELECT state::text FROM jobs WHERE batch_id = $1 AND job_id = 1")
        .bind(batch_id)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(state.0, "ready");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn child_becomes_ready_only_once_every_parent_completes(ctx: &TestHarness) {
    let project = ctx.billing_project("proj-dag").await.unwrap();
    let batch_id = procedures::create_batch(&ctx.db, "alice", &project, "tok-dag", 3, None, &json!({}))
        .await
        .unwrap();

    procedures::create_jobs(
        &ctx.db,
        batch_id,
        &[job(1, vec![]), job(2, vec![]), job(3, vec![1, 2])],
    )
    .await
    .unwrap();

    let state: (String,) = sqlx::query_as("SELECT state::text FROM jobs WHERE batch_id = $1 AND job_id = 3")
        .bind(batch_id)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(state.0, "pending");

    complete_job(ctx, batch_id, 1).await;

    let state: (String,) = sqlx::query_as("SELECT state::text FROM jobs WHERE batch_id = $1 AND job_id = 3")
        .bind(batch_id)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(state.0, "pending", "job 3 still waits on job 2");

    complete_job(ctx, batch_id, 2).await;

    let state: (String,) = sqlx::query_as("SELECT state::text FROM jobs WHERE batch_id = $1 AND job_id = 3")
        .bind(batch_id)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(state.0, "ready");
}

/// Schedules a job directly to Running and marks it Success, bypassing
/// the attempt-id generation a real dispatch would use — good enough to
/// exercise the completion/DAG-propagation path this test cares about.
async fn complete_job(ctx: &TestHarness, batch_id: i64, job_id: i64) {
    let attempt_id = AttemptId::new();
    procedures::schedule_job(&ctx.db, batch_id, job_id, &attempt_id, "instance-a")
        .await
        .unwrap();
    procedures::mark_job_complete(
        &ctx.db,
        batch_id,
        job_id,
        &attempt_id,
        JobState::Success,
        &json!({"exit_code": 0}),
        None,
        chrono::Utc::now(),
        AttemptReason::Success,
    )
    .await
    .unwrap();
}

#[test_context(TestHarness)]
#[tokio::test]
async fn mark_job_complete_is_idempotent_once_terminal(ctx: &TestHarness) {
    let project = ctx.billing_project("proj-complete-once").await.unwrap();
    let batch_id = procedures::create_batch(&ctx.db, "alice", &project, "tok-complete", 1, None, &json!({}))
        .await
        .unwrap();
    procedures::create_jobs(&ctx.db, batch_id, &[job(1, vec![])]).await.unwrap();

    let attempt_id = AttemptId::new();
    procedures::schedule_job(&ctx.db, batch_id, 1, &attempt_id, "instance-a")
        .await
        .unwrap();

    let first = procedures::mark_job_complete(
        &ctx.db,
        batch_id,
        1,
        &attempt_id,
        JobState::Success,
        &json!({"exit_code": 0}),
        None,
        chrono::Utc::now(),
        AttemptReason::Success,
    )
    .await
    .unwrap();
    assert_eq!(first.old_state, JobState::Running);
    assert_eq!(first.batch_completed, Some(batch_id));

    // Replaying the worker's callback (e.g. after a dropped response)
    // must not double-count the batch's completion counters.
    let replay = procedures::mark_job_complete(
        &ctx.db,
        batch_id,
        1,
        &attempt_id,
        JobState::Success,
        &json!({"exit_code": 0}),
        None,
        chrono::Utc::now(),
        AttemptReason::Success,
    )
    .await
    .unwrap();
    assert_eq!(replay.old_state, JobState::Success);
    assert_eq!(replay.batch_completed, None);

    let n_completed: (i32,) = sqlx::query_as("SELECT n_completed FROM batches WHERE id = $1")
        .bind(batch_id)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(n_completed.0, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn cancel_batch_cancels_pending_jobs_but_spares_always_run(ctx: &TestHarness) {
    let project = ctx.billing_project("proj-cancel").await.unwrap();
    let batch_id = procedures::create_batch(&ctx.db, "alice", &project, "tok-cancel", 2, None, &json!({}))
        .await
        .unwrap();

    let mut always_run_job = job(2, vec![]);
    always_run_job.always_run = true;
    procedures::create_jobs(&ctx.db, batch_id, &[job(1, vec![]), always_run_job])
        .await
        .unwrap();

    procedures::cancel_batch(&ctx.db, batch_id).await.unwrap();

    let states: Vec<(i64, String)> = sqlx::query_as(
        "SELECT job_id, state::text FROM jobs WHERE batch_id = $1 ORDER BY job_id",
    )
    .bind(batch_id)
    .fetch_all(&ctx.db)
    .await
    .unwrap();
    assert_eq!(states[0], (1, "cancelled".to_string()));
    assert_eq!(states[1], (2, "ready".to_string()), "always_run jobs are not cancelled");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn close_batch_rejects_wrong_job_count(ctx: &TestHarness) {
    let project = ctx.billing_project("proj-close").await.unwrap();
    let batch_id = procedures::create_batch(&ctx.db, "alice", &project, "tok-close", 2, None, &json!({}))
        .await
        .unwrap();
    procedures::create_jobs(&ctx.db, batch_id, &[job(1, vec![])]).await.unwrap();

    let err = procedures::close_batch(&ctx.db, batch_id).await.unwrap_err();
    match err {
        procedures::CloseBatchOutcome::WrongJobCount { expected, actual } => {
            assert_eq!(expected, 2);
            assert_eq!(actual, 1);
        }
        other => panic!("expected WrongJobCount, got {other:?}"),
    }
}
