use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::{AttemptId, JobId};

/// Terminal reason for an attempt (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attempt_reason", rename_all = "snake_case")]
pub enum AttemptReason {
    Success,
    Error,
    Failed,
    Cancelled,
    Preempted,
}

/// One execution of a job on a specific instance.
///
/// spec.md §3 invariants: attempts are append-only; at most one attempt per
/// job is without `end_time`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Attempt {
    pub batch_id: i64,
    pub job_id: JobId,
    pub attempt_id: String,
    /// Weak reference by name (SPEC_FULL.md / Design Notes §9: "Cyclic
    /// references ... avoided by using identifiers ... for the instance
    /// link in attempts"); the row survives instance deletion.
    pub instance_name: String,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub reason: Option<AttemptReason>,
}

impl Attempt {
    pub fn is_live(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn id(&self) -> AttemptId {
        AttemptId::from(self.attempt_id.clone())
    }
}
