//! Exercises the scheduler Driver loop (spec.md §4.3) end to end: a ready
//! job in Postgres, a registered instance in the IPR, a mocked worker.

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use batch_core::db::models::PoolConfig;
use batch_core::db::procedures::{self, CreateJobSpec};
use batch_core::driver::signal::SchedulerSignal;
use batch_core::driver::{scheduler, DriverDeps};
use batch_core::ipr::IprHandle;
use batch_core::ls::memory::MemoryLogStore;
use batch_core::worker_client::mock::MockWorkerClient;
use batch_core::worker_client::WorkerClient;
use batch_core::Config;
use common::TestHarness;
use serde_json::json;
use test_context::test_context;

fn test_pool() -> PoolConfig {
    PoolConfig {
        name: "default".to_string(),
        worker_type: "standard".to_string(),
        worker_cores: 16,
        worker_memory_gib: 60.0,
        local_ssd: true,
        pd_ssd_gb: None,
        boot_disk_gb: 10,
        max_instances: 8,
        max_live_instances: 4,
        standing_worker_enabled: false,
        standing_worker_cores: 0,
    }
}

fn test_config(db_url: &str) -> Config {
    Config {
        database_url: db_url.to_string(),
        port: 0,
        worker_bearer_token: "test-token".to_string(),
        ls_root: "memory://".to_string(),
        max_attempts_per_job: 5,
        pools: vec![test_pool()],
        scheduler_poll_interval_ms: 1_000,
        reconcile_interval_ms: 5_000,
        reconcile_failure_threshold: 3,
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn scheduler_dispatches_ready_job_to_the_best_fit_instance(ctx: &TestHarness) {
    let project = ctx.billing_project("proj-dispatch").await.unwrap();
    let batch_id = procedures::create_batch(&ctx.db, "alice", &project, "tok-dispatch", 1, None, &json!({}))
        .await
        .unwrap();
    procedures::create_jobs(
        &ctx.db,
        batch_id,
        &[CreateJobSpec {
            job_id: 1,
            pool_name: "default".to_string(),
            cores_mcpu: 1_000,
            always_run: false,
            parent_ids: vec![],
            spec: Some(json!({"image": "ubuntu:22.04"})),
            attributes: json!({}),
        }],
    )
    .await
    .unwrap();

    let ipr = IprHandle::spawn();
    ipr.register("inst-1".into(), "default".into(), "10.0.0.5:5000".into(), 16_000)
        .await;
    ipr.set_state("inst-1", batch_core::db::models::InstanceState::Active)
        .await;

    let worker_client = Arc::new(MockWorkerClient::new());
    let deps = DriverDeps {
        db: ctx.db.clone(),
        ipr: ipr.clone(),
        worker_client: worker_client.clone() as Arc<dyn WorkerClient>,
        log_store: Arc::new(MemoryLogStore::new()),
        config: Arc::new(test_config("unused")),
        signal: SchedulerSignal::new(),
        http_client: reqwest::Client::new(),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(scheduler::run(deps, "default".to_string(), shutdown.clone()));

    // The loop dispatches immediately on first iteration; give it a moment
    // rather than depending on its 1s idle poll interval.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;

    assert!(worker_client.was_created(batch_id, 1));

    let state: (String,) = sqlx::query_as("SELECT state::text FROM jobs WHERE batch_id = $1 AND job_id = 1")
        .bind(batch_id)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(state.0, "running");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn scheduler_leaves_job_ready_when_no_instance_has_capacity(ctx: &TestHarness) {
    let project = ctx.billing_project("proj-no-capacity").await.unwrap();
    let batch_id = procedures::create_batch(&ctx.db, "alice", &project, "tok-no-cap", 1, None, &json!({}))
        .await
        .unwrap();
    procedures::create_jobs(
        &ctx.db,
        batch_id,
        &[CreateJobSpec {
            job_id: 1,
            pool_name: "default".to_string(),
            cores_mcpu: 1_000,
            always_run: false,
            parent_ids: vec![],
            spec: Some(json!({})),
            attributes: json!({}),
        }],
    )
    .await
    .unwrap();

    // No instances registered at all: nothing can satisfy the reservation.
    let ipr = IprHandle::spawn();
    let worker_client = Arc::new(MockWorkerClient::new());
    let deps = DriverDeps {
        db: ctx.db.clone(),
        ipr,
        worker_client: worker_client.clone() as Arc<dyn WorkerClient>,
        log_store: Arc::new(MemoryLogStore::new()),
        config: Arc::new(test_config("unused")),
        signal: SchedulerSignal::new(),
        http_client: reqwest::Client::new(),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(scheduler::run(deps, "default".to_string(), shutdown.clone()));
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;

    assert!(!worker_client.was_created(batch_id, 1));
    let state: (String,) = sqlx::query_as("SELECT state::text FROM jobs WHERE batch_id = $1 AND job_id = 1")
        .bind(batch_id)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(state.0, "ready");
}
