use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{log_path, specs_path, status_path, LogStore, LogTask};
use crate::common::{AttemptId, BatchId, JobId};
use crate::error::AppResult;

/// In-memory Log/Spec Store used by unit tests and local development.
#[derive(Default)]
pub struct MemoryLogStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn write_log(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        job_id: JobId,
        attempt_id: &AttemptId,
        task: LogTask,
        content: &[u8],
    ) -> AppResult<()> {
        self.blobs.lock().unwrap().insert(
            log_path(instance_id, batch_id, job_id, attempt_id, task),
            content.to_vec(),
        );
        Ok(())
    }

    async fn read_log(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        job_id: JobId,
        attempt_id: &AttemptId,
        task: LogTask,
    ) -> AppResult<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .get(&log_path(instance_id, batch_id, job_id, attempt_id, task))
            .cloned())
    }

    async fn write_status(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        job_id: JobId,
        attempt_id: &AttemptId,
        status: &serde_json::Value,
    ) -> AppResult<()> {
        self.blobs.lock().unwrap().insert(
            status_path(instance_id, batch_id, job_id, attempt_id),
            serde_json::to_vec(status).unwrap(),
        );
        Ok(())
    }

    async fn read_status(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        job_id: JobId,
        attempt_id: &AttemptId,
    ) -> AppResult<Option<serde_json::Value>> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .get(&status_path(instance_id, batch_id, job_id, attempt_id))
            .map(|bytes| serde_json::from_slice(bytes).unwrap()))
    }

    async fn write_specs(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        token: &str,
        specs: &serde_json::Value,
    ) -> AppResult<()> {
        self.blobs.lock().unwrap().insert(
            specs_path(instance_id, batch_id, token),
            serde_json::to_vec(specs).unwrap(),
        );
        Ok(())
    }

    async fn read_specs(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        token: &str,
    ) -> AppResult<Option<serde_json::Value>> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .get(&specs_path(instance_id, batch_id, token))
            .map(|bytes| serde_json::from_slice(bytes).unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_log() {
        let ls = MemoryLogStore::new();
        let attempt = AttemptId::from("abc123".to_string());
        ls.write_log("inst-1", 1, 1, &attempt, LogTask::Main, b"hello")
            .await
            .unwrap();
        let read = ls.read_log("inst-1", 1, 1, &attempt, LogTask::Main).await.unwrap();
        assert_eq!(read, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn missing_log_is_none() {
        let ls = MemoryLogStore::new();
        let attempt = AttemptId::from("abc123".to_string());
        let read = ls.read_log("inst-1", 1, 1, &attempt, LogTask::Main).await.unwrap();
        assert_eq!(read, None);
    }
}
