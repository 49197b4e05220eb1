use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::JobId;

/// Job lifecycle (spec.md §4.6).
///
/// `Pending → Ready` fires when `n_pending_parents` hits zero. `Running →
/// Ready` is permitted (unschedule from a lost instance, spec.md §4.2
/// `unschedule_job`). `Cancelled` may be reached directly from `Pending` or
/// `Ready` during batch cancel unless the job is `always_run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "job_state", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Ready,
    Running,
    Cancelled,
    Error,
    Failed,
    Success,
}

impl JobState {
    /// spec.md §3: "state ∈ {Error, Failed, Success, Cancelled} is terminal".
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Error | JobState::Failed | JobState::Success | JobState::Cancelled
        )
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub batch_id: i64,
    pub job_id: JobId,
    pub state: JobState,
    pub cores_mcpu: i64,
    pub pool_name: String,
    pub always_run: bool,
    pub n_pending_parents: i32,
    pub current_attempt_id: Option<String>,
    /// Inline spec for small jobs; `None` when the spec was written to LS
    /// instead (spec.md §3: "spec blob (inline for small, in LS
    /// otherwise)").
    pub spec: Option<serde_json::Value>,
    pub attributes: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Job {
    /// spec.md §3 invariant (a): `state=Pending ⇔ n_pending_parents > 0`.
    pub fn is_ready(&self) -> bool {
        self.state == JobState::Ready
            || (self.state == JobState::Pending && self.n_pending_parents == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_correct() {
        assert!(JobState::Success.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Error.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Ready.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }
}
