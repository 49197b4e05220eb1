use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

use crate::db::models::pool::PoolConfig;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Port the front end listens on.
    pub port: u16,
    /// Bearer token workers must present on the `/jobs/{jid}/started` and
    /// `/jobs/{jid}/complete` callbacks.
    pub worker_bearer_token: String,
    /// Root of the log/spec store. `file://` for a filesystem-backed LS,
    /// `memory://` for the in-memory LS used by tests.
    pub ls_root: String,
    /// Attempts a job may burn (instance loss + worker 5xx, combined)
    /// before it is moved to Error with reason `too_many_attempts`.
    pub max_attempts_per_job: u32,
    /// Worker-pool definitions, loaded once at startup.
    pub pools: Vec<PoolConfig>,
    /// Driver scheduler loop poll interval when no signal arrives.
    pub scheduler_poll_interval_ms: u64,
    /// Instance reconcile probe interval.
    pub reconcile_interval_ms: u64,
    /// Missed-heartbeat threshold before an instance is marked inactive.
    pub reconcile_failure_threshold: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let pools_json = env::var("BATCH_POOLS").unwrap_or_else(|_| default_pools_json());
        let pools: Vec<PoolConfig> = serde_json::from_str(&pools_json)
            .context("BATCH_POOLS must be a JSON array of pool configs")?;
        if pools.is_empty() {
            anyhow::bail!("at least one pool must be configured");
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            worker_bearer_token: env::var("WORKER_BEARER_TOKEN")
                .context("WORKER_BEARER_TOKEN must be set")?,
            ls_root: env::var("LS_ROOT").unwrap_or_else(|_| "file://./ls-data".to_string()),
            max_attempts_per_job: env::var("MAX_ATTEMPTS_PER_JOB")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("MAX_ATTEMPTS_PER_JOB must be a valid number")?,
            pools,
            scheduler_poll_interval_ms: env::var("SCHEDULER_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("SCHEDULER_POLL_INTERVAL_MS must be a valid number")?,
            reconcile_interval_ms: env::var("RECONCILE_INTERVAL_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("RECONCILE_INTERVAL_MS must be a valid number")?,
            reconcile_failure_threshold: env::var("RECONCILE_FAILURE_THRESHOLD")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("RECONCILE_FAILURE_THRESHOLD must be a valid number")?,
        })
    }

    pub fn pool(&self, name: &str) -> Option<&PoolConfig> {
        self.pools.iter().find(|p| p.name == name)
    }
}

fn default_pools_json() -> String {
    r#"[{"name":"default","worker_type":"standard","worker_cores":16,"worker_memory_gib":60.0,"local_ssd":true,"pd_ssd_gb":null,"boot_disk_gb":10,"max_instances":8,"max_live_instances":4,"standing_worker_enabled":false,"standing_worker_cores":0}]"#
        .to_string()
}
