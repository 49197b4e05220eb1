//! Front-End (FE) binary: the stateless REST gateway (spec.md §2, §4.1).

use std::sync::Arc;

use batch_core::api::{self, AppState};
use batch_core::db;
use batch_core::driver::signal::SchedulerSignal;
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

    let state = AppState {
        db,
        ipr,
        worker_client,
        log_store,
        config: config.clone(),
        signal: SchedulerSignal::new(),
        http_client: reqwest::Client::new(),
    };

    let app = api::router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "front end listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_log_store(ls_root: &str) -> anyhow::Result<Arc<dyn LogStore>> {
    if ls_root.starts_with("memory://") {
        Ok(Arc::new(MemoryLogStore::new()))
    } else {
        Ok(Arc::new(FilesystemLogStore::new(root_from_url(ls_root)?)))
    }
}
