//! Log/Spec Store (LS): a content-addressed object store for per-job
//! specs, per-attempt logs, and per-attempt terminal status blobs
//! (spec.md §2, §6 "Persisted layout").

pub mod filesystem;
pub mod memory;

use async_trait::async_trait;

use crate::common::{AttemptId, BatchId, JobId};
use crate::error::AppResult;

/// One of the three log streams a worker writes per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTask {
    Input,
    Main,
    Output,
}

impl LogTask {
    pub fn as_str(self) -> &'static str {
        match self {
            LogTask::Input => "input",
            LogTask::Main => "main",
            LogTask::Output => "output",
        }
    }
}

/// Object store abstraction over the paths in spec.md §6:
/// `{bucket}/{instance_id}/batch/{batch}/{job}/{attempt}/{task}/log`,
/// `.../status`, and `{bucket}/{instance_id}/batch/{batch}/bunch/{token}/specs`.
///
/// The scheduler never reads LS blobs (spec.md §3): only the Front-End
/// (serving `get-job-log`/`get-job`) and workers (writing them) touch this
/// trait.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn write_log(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        job_id: JobId,
        attempt_id: &AttemptId,
        task: LogTask,
        content: &[u8],
    ) -> AppResult<()>;

    async fn read_log(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        job_id: JobId,
        attempt_id: &AttemptId,
        task: LogTask,
    ) -> AppResult<Option<Vec<u8>>>;

    async fn write_status(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        job_id: JobId,
        attempt_id: &AttemptId,
        status: &serde_json::Value,
    ) -> AppResult<()>;

    async fn read_status(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        job_id: JobId,
        attempt_id: &AttemptId,
    ) -> AppResult<Option<serde_json::Value>>;

    async fn write_specs(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        token: &str,
        specs: &serde_json::Value,
    ) -> AppResult<()>;

    async fn read_specs(
        &self,
        instance_id: &str,
        batch_id: BatchId,
        token: &str,
    ) -> AppResult<Option<serde_json::Value>>;
}

/// Builds an LS path. Shared by every backend so the layout (and its
/// `format_version` dispatch point) lives in one place.
pub fn log_path(instance_id: &str, batch_id: BatchId, job_id: JobId, attempt_id: &AttemptId, task: LogTask) -> String {
    format!("{instance_id}/batch/{batch_id}/{job_id}/{attempt_id}/{}/log", task.as_str())
}

pub fn status_path(instance_id: &str, batch_id: BatchId, job_id: JobId, attempt_id: &AttemptId) -> String {
    format!("{instance_id}/batch/{batch_id}/{job_id}/{attempt_id}/status")
}

pub fn specs_path(instance_id: &str, batch_id: BatchId, token: &str) -> String {
    format!("{instance_id}/batch/{batch_id}/bunch/{token}/specs")
}
