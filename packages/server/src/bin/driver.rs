//! Driver (DR) binary: the scheduler, cancel/delete fan-out, and instance
//! reconcile loops (spec.md §2, §4.3, §4.4).

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use batch_core::db;
use batch_core::driver::signal::SchedulerSignal;
use batch_core::driver::{spawn_all, DriverDeps};
use batch_core::ipr::IprHandle;
use batch_core::ls::filesystem::{root_from_url, FilesystemLogStore};
use batch_core::ls::memory::MemoryLogStore;
use batch_core::ls::LogStore;
use batch_core::worker_client::{ReqwestWorkerClient, WorkerClient};
use batch_core::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(Config::from_env()?);
    let db = db::connect(&config.database_url).await?;
    let ipr = IprHandle::spawn();
    let worker_client: Arc<dyn WorkerClient> = Arc::new(ReqwestWorkerClient::new());
    let log_store: Arc<dyn LogStore> = build_log_store(&config.ls_root)?;

    let deps = DriverDeps {
        db,
        ipr,
        worker_client,
        log_store,
        config,
        signal: SchedulerSignal::new(),
        http_client: reqwest::Client::new(),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_all(deps, shutdown.clone());

    tracing::info!("driver loops started, awaiting shutdown signal");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping driver loops");
    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);

    // Loops poll `shutdown` on their own cadence (bounded by the longest
    // configured poll interval); give them a moment to notice before exit.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    Ok(())
}

fn build_log_store(ls_root: &str) -> anyhow::Result<Arc<dyn LogStore>> {
    if ls_root.starts_with("memory://") {
        Ok(Arc::new(MemoryLogStore::new()))
    } else {
        Ok(Arc::new(FilesystemLogStore::new(root_from_url(ls_root)?)))
    }
}
