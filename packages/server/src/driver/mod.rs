//! Driver (DR): the scheduler and controller loops (spec.md §2, §4.3, §4.4).
//!
//! One `tokio::spawn`ed task per loop, all sharing [`DriverDeps`]. Design
//! Notes (spec.md §9): "Per-request cooperative concurrency ... becomes
//! either goroutines + channels or explicit task loops" — here, tasks.

pub mod cancel_fanout;
pub mod delete_fanout;
pub mod reconcile;
pub mod scheduler;
pub mod signal;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::ipr::IprHandle;
use crate::ls::LogStore;
use crate::worker_client::WorkerClient;

use self::signal::SchedulerSignal;

/// Dependencies shared by every Driver loop.
#[derive(Clone)]
pub struct DriverDeps {
    pub db: PgPool,
    pub ipr: IprHandle,
    pub worker_client: Arc<dyn WorkerClient>,
    pub log_store: Arc<dyn LogStore>,
    pub config: Arc<Config>,
    pub signal: SchedulerSignal,
    /// Shared client for the user-supplied completion callback (spec.md
    /// §6, §9) — separate from [`WorkerClient`], which talks to workers
    /// over their own address space, not arbitrary user URLs.
    pub http_client: reqwest::Client,
}

/// Spawns all Driver loops: one scheduler per configured pool, plus the
/// cancel-fan-out, delete-fan-out, and instance-reconcile loops.
pub fn spawn_all(deps: DriverDeps, shutdown: Arc<std::sync::atomic::AtomicBool>) {
    for pool in deps.config.pools.clone() {
        let deps = deps.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(scheduler::run(deps, pool.name, shutdown));
    }

    {
        let deps = deps.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(cancel_fanout::run(deps, shutdown));
    }
    {
        let deps = deps.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(delete_fanout::run(deps, shutdown));
    }
    tokio::spawn(reconcile::run(deps, shutdown));
}
