//! Front-End (FE): the request gateway (spec.md §2, §4.1, §6).
//!
//! Stateless per request; every handler reads/writes through [`AppState`]
//! and the transactional procedures in [`crate::db::procedures`]. Multiple
//! replicas of this router can run behind a load balancer and coordinate
//! only through the Persistent Store (spec.md §5).

pub mod auth;
pub mod batches;
pub mod instances;
pub mod jobs;

use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{get, patch, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::driver::signal::SchedulerSignal;
use crate::ipr::IprHandle;
use crate::ls::LogStore;
use crate::worker_client::WorkerClient;

/// Dependencies every Front-End handler needs. Deliberately the same
/// shape as [`crate::driver::DriverDeps`] — both processes share the same
/// Persistent Store, Instance Pool Registry, and scheduler signal.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub ipr: IprHandle,
    pub worker_client: Arc<dyn WorkerClient>,
    pub log_store: Arc<dyn LogStore>,
    pub config: Arc<Config>,
    pub signal: SchedulerSignal,
    pub http_client: reqwest::Client,
}

pub fn router(state: AppState) -> Router {
    let worker_callbacks = Router::new()
        .route("/batches/:batch_id/jobs/:job_id/started", post(jobs::mark_job_started))
        .route("/batches/:batch_id/jobs/:job_id/complete", post(jobs::mark_job_complete))
        .route("/instances/register", post(instances::register_instance))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_worker_bearer));

    let user_routes = Router::new()
        .route("/batches/create", post(batches::create_batch))
        .route("/batches", get(batches::list_batches))
        .route("/batches/:batch_id", get(batches::get_batch).delete(batches::delete_batch))
        .route("/batches/:batch_id/close", patch(batches::close_batch))
        .route("/batches/:batch_id/cancel", patch(batches::cancel_batch))
        .route("/batches/:batch_id/jobs/create", post(jobs::create_jobs))
        .route("/batches/:batch_id/jobs", get(jobs::list_jobs))
        .route("/batches/:batch_id/jobs/:job_id", get(jobs::get_job))
        .route("/batches/:batch_id/jobs/:job_id/log", get(jobs::get_job_log))
        .route("/batches/:batch_id/jobs/:job_id/attempts", get(jobs::get_attempts))
        .route("/instances/:name", get(instances::get_instance));

    Router::new()
        .route("/healthcheck", get(healthcheck))
        .nest("/api/v1alpha", user_routes.merge(worker_callbacks))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthcheck() -> &'static str {
    "ok"
}
