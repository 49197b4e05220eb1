//! Worker Client (WC): thin RPC layer to workers (spec.md §4.5).
//!
//! All calls are idempotent by `(batch_id, job_id, attempt_id)`, carry a
//! 60s ceiling, and are retried through the shared
//! [`crate::common::backoff`] helper when classified transient.

pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{AttemptId, BatchId, JobId};
use crate::error::AppError;

pub const RPC_TIMEOUT: Duration = Duration::from_secs(60);

/// Instance-reconcile health probe deadline (spec.md §5): tighter than
/// [`RPC_TIMEOUT`] because a slow health check should fail fast rather than
/// hold up the reconcile loop's sweep over every instance in a pool.
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct CreateJobBody {
    pub batch_id: BatchId,
    pub job_id: JobId,
    pub attempt_id: String,
    pub spec: serde_json::Value,
    pub user: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveStatus {
    pub state: String,
    pub status: serde_json::Value,
}

/// RPC surface a worker exposes to the Driver. `delete` treats 404 as
/// success (spec.md §4.5) since the job may already have finished or never
/// been dispatched.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn create(
        &self,
        instance_address: &str,
        body: &CreateJobBody,
    ) -> Result<(), AppError>;

    async fn delete(
        &self,
        instance_address: &str,
        batch_id: BatchId,
        job_id: JobId,
    ) -> Result<(), AppError>;

    async fn log(
        &self,
        instance_address: &str,
        batch_id: BatchId,
        job_id: JobId,
        task: &str,
    ) -> Result<Vec<u8>, AppError>;

    async fn status(
        &self,
        instance_address: &str,
        batch_id: BatchId,
        job_id: JobId,
    ) -> Result<LiveStatus, AppError>;

    /// Instance-reconcile health probe (spec.md §4.4, §5): a bare
    /// liveness check distinct from `status`, which is scoped to one job.
    async fn health(&self, instance_address: &str) -> Result<(), AppError>;
}

/// Production implementation: plain HTTP over `reqwest`, one client shared
/// across all worker addresses.
pub struct ReqwestWorkerClient {
    client: reqwest::Client,
}

impl ReqwestWorkerClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .expect("failed to build worker HTTP client");
        Self { client }
    }

    fn classify(&self, status: reqwest::StatusCode) -> Option<AppError> {
        if status.is_success() {
            None
        } else if status.as_u16() == 404 {
            None
        } else if status.is_server_error() {
            Some(AppError::Transient(format!("worker returned {status}")))
        } else {
            Some(AppError::validation(format!("worker returned {status}")))
        }
    }
}

impl Default for ReqwestWorkerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerClient for ReqwestWorkerClient {
    async fn create(&self, instance_address: &str, body: &CreateJobBody) -> Result<(), AppError> {
        let url = format!("http://{instance_address}/api/v1alpha/batches/{}/jobs/create", body.batch_id);
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Transient(e.to_string()))?;
        match self.classify(resp.status()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn delete(&self, instance_address: &str, batch_id: BatchId, job_id: JobId) -> Result<(), AppError> {
        let url = format!("http://{instance_address}/api/v1alpha/batches/{batch_id}/jobs/{job_id}/delete");
        let resp = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| AppError::Transient(e.to_string()))?;
        match self.classify(resp.status()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn log(&self, instance_address: &str, batch_id: BatchId, job_id: JobId, task: &str) -> Result<Vec<u8>, AppError> {
        let url = format!("http://{instance_address}/api/v1alpha/batches/{batch_id}/jobs/{job_id}/log/{task}");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Transient(e.to_string()))?;
        if let Some(err) = self.classify(resp.status()) {
            return Err(err);
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| AppError::Transient(e.to_string()))
    }

    async fn status(&self, instance_address: &str, batch_id: BatchId, job_id: JobId) -> Result<LiveStatus, AppError> {
        let url = format!("http://{instance_address}/api/v1alpha/batches/{batch_id}/jobs/{job_id}/status");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Transient(e.to_string()))?;
        if let Some(err) = self.classify(resp.status()) {
            return Err(err);
        }
        resp.json()
            .await
            .map_err(|e| AppError::Transient(e.to_string()))
    }

    async fn health(&self, instance_address: &str) -> Result<(), AppError> {
        let url = format!("http://{instance_address}/healthcheck");
        let resp = self
            .client
            .get(url)
            .timeout(HEALTH_PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::Transient(e.to_string()))?;
        match self.classify(resp.status()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Helper so callers can construct a [`CreateJobBody`] without threading
/// attempt-id stringification everywhere.
pub fn create_job_body(batch_id: BatchId, job_id: JobId, attempt_id: &AttemptId, spec: serde_json::Value, user: &str) -> CreateJobBody {
    CreateJobBody {
        batch_id,
        job_id,
        attempt_id: attempt_id.to_string(),
        spec,
        user: user.to_string(),
    }
}
