use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{log_path, specs_path, status_path, LogStore, LogTask};
use crate::common::{AttemptId, BatchId, JobId};
use crate::error::{AppError, AppResult};

/// Filesystem-backed Log/Spec Store. Production deployments point this at
/// a mounted bucket (`gcsfuse`/`s3fs` or equivalent); the trait itself
/// knows nothing about the backing object store.
pub struct FilesystemLogStore {
    root: PathBuf,
}

impl FilesystemLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    async fn write(&self, relative: &str, content: &[u8]) -> AppResult<()> {
        let path = self.full_path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Fatal(e.into()))?;
        }
        fs::write(&path, content)
            .await
            .map_err(|e| AppError::Fatal(e.into()))
    }

    async fn read(&self, relative: &str) -> AppResult<Option<Vec<u8>>> {
        let path = self.full_path(relative);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Fatal(e.into())),
        }
    }
}

#[async_trait]
impl LogStore for FilesystemLogStore {
    async fn write_log(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        job_id: JobId,
        attempt_id: &AttemptId,
        task: LogTask,
        content: &[u8],
    ) -> AppResult<()> {
        self.write(&log_path(instance_id, batch_id, job_id, attempt_id, task), content)
            .await
    }

    async fn read_log(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        job_id: JobId,
        attempt_id: &AttemptId,
        task: LogTask,
    ) -> AppResult<Option<Vec<u8>>> {
        self.read(&log_path(instance_id, batch_id, job_id, attempt_id, task))
            .await
    }

    async fn write_status(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        job_id: JobId,
        attempt_id: &AttemptId,
        status: &serde_json::Value,
    ) -> AppResult<()> {
        let body = serde_json::to_vec(status).map_err(|e| AppError::Fatal(e.into()))?;
        self.write(&status_path(instance_id, batch_id, job_id, attempt_id), &body)
            .await
    }

    async fn read_status(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        job_id: JobId,
        attempt_id: &AttemptId,
    ) -> AppResult<Option<serde_json::Value>> {
        match self.read(&status_path(instance_id, batch_id, job_id, attempt_id)).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| AppError::Fatal(e.into()))?,
            )),
            None => Ok(None),
        }
    }

    async fn write_specs(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        token: &str,
        specs: &serde_json::Value,
    ) -> AppResult<()> {
        let body = serde_json::to_vec(specs).map_err(|e| AppError::Fatal(e.into()))?;
        self.write(&specs_path(instance_id, batch_id, token), &body).await
    }

    async fn read_specs(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        token: &str,
    ) -> AppResult<Option<serde_json::Value>> {
        match self.read(&specs_path(instance_id, batch_id, token)).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| AppError::Fatal(e.into()))?,
            )),
            None => Ok(None),
        }
    }
}

/// Parses the `file://` form of `Config::ls_root` into a filesystem path.
pub fn root_from_url(url: &str) -> AppResult<PathBuf> {
    url.strip_prefix("file://")
        .map(Path::new)
        .map(Path::to_path_buf)
        .ok_or_else(|| AppError::validation(format!("not a file:// LS root: {url}")))
}
