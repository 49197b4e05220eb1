use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CreateJobBody, LiveStatus, WorkerClient};
use crate::common::{BatchId, JobId};
use crate::error::AppError;

/// In-memory [`WorkerClient`] for driver-loop tests: records every job
/// it was told to create or delete instead of making network calls.
#[derive(Default)]
pub struct MockWorkerClient {
    created: Mutex<HashSet<(BatchId, JobId)>>,
    deleted: Mutex<HashSet<(BatchId, JobId)>>,
    pub fail_create: Mutex<bool>,
    pub fail_health: Mutex<bool>,
}

impl MockWorkerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn was_created(&self, batch_id: BatchId, job_id: JobId) -> bool {
        self.created.lock().unwrap().contains(&(batch_id, job_id))
    }

    pub fn was_deleted(&self, batch_id: BatchId, job_id: JobId) -> bool {
        self.deleted.lock().unwrap().contains(&(batch_id, job_id))
    }
}

#[async_trait]
impl WorkerClient for MockWorkerClient {
    async fn create(&self, _instance_address: &str, body: &CreateJobBody) -> Result<(), AppError> {
        if *self.fail_create.lock().unwrap() {
            return Err(AppError::Transient("mock failure".to_string()));
        }
        self.created.lock().unwrap().insert((body.batch_id, body.job_id));
        Ok(())
    }

    async fn delete(&self, _instance_address: &str, batch_id: BatchId, job_id: JobId) -> Result<(), AppError> {
        self.deleted.lock().unwrap().insert((batch_id, job_id));
        Ok(())
    }

    async fn log(&self, _instance_address: &str, _batch_id: BatchId, _job_id: JobId, _task: &str) -> Result<Vec<u8>, AppError> {
        Ok(Vec::new())
    }

    async fn status(&self, _instance_address: &str, _batch_id: BatchId, _job_id: JobId) -> Result<LiveStatus, AppError> {
        Ok(LiveStatus {
            state: "running".to_string(),
            status: serde_json::json!({}),
        })
    }

    async fn health(&self, _instance_address: &str) -> Result<(), AppError> {
        if *self.fail_health.lock().unwrap() {
            return Err(AppError::Transient("mock health failure".to_string()));
        }
        Ok(())
    }
}
