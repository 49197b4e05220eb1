use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::BatchId;

/// Batch state machine (spec.md §4.6): `open → running (on close) →
/// complete (when n_completed = n_jobs)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "batch_state", rename_all = "snake_case")]
pub enum BatchState {
    Open,
    Running,
    Complete,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Batch {
    pub id: BatchId,
    pub owner: String,
    pub billing_project: String,
    pub token: String,
    pub n_jobs: i32,
    pub n_completed: i32,
    pub n_succeeded: i32,
    pub n_failed: i32,
    pub n_cancelled: i32,
    pub state: BatchState,
    pub closed: bool,
    pub deleted: bool,
    pub cancelled: bool,
    pub callback_url: Option<String>,
    pub attributes: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub format_version: i32,
}

/// User-facing outcome, derived from counters rather than stored
/// redundantly (grounded on `batch.py::batch_record_to_dict`, SPEC_FULL.md
/// §3: kept alongside the stored `state` column for scheduling control
/// flow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Open,
    Running,
    Cancelled,
    Failure,
    Success,
}

impl BatchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchOutcome::Open => "open",
            BatchOutcome::Running => "running",
            BatchOutcome::Cancelled => "cancelled",
            BatchOutcome::Failure => "failure",
            BatchOutcome::Success => "success",
        }
    }
}

impl Batch {
    /// spec.md §3 invariant (a).
    pub fn counters_consistent(&self) -> bool {
        self.n_completed == self.n_succeeded + self.n_failed + self.n_cancelled
    }

    /// User-facing status JSON (grounded on `batch.py::batch_record_to_dict`):
    /// served from `GET /batches/{id}` and delivered to the completion
    /// callback verbatim.
    pub fn status_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "state": self.outcome().as_str(),
            "n_jobs": self.n_jobs,
            "n_completed": self.n_completed,
            "n_succeeded": self.n_succeeded,
            "n_failed": self.n_failed,
            "n_cancelled": self.n_cancelled,
            "attributes": self.attributes,
            "time_created": self.created_at,
            "time_completed": self.completed_at,
        })
    }

    pub fn outcome(&self) -> BatchOutcome {
        match self.state {
            BatchState::Open => BatchOutcome::Open,
            BatchState::Running => BatchOutcome::Running,
            BatchState::Complete => {
                if self.n_failed > 0 {
                    BatchOutcome::Failure
                } else if self.n_cancelled > 0 {
                    BatchOutcome::Cancelled
                } else {
                    BatchOutcome::Success
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(state: BatchState, succeeded: i32, failed: i32, cancelled: i32) -> Batch {
        Batch {
            id: 1,
            owner: "alice".to_string(),
            billing_project: "bp".to_string(),
            token: "t".to_string(),
            n_jobs: succeeded + failed + cancelled,
            n_completed: succeeded + failed + cancelled,
            n_succeeded: succeeded,
            n_failed: failed,
            n_cancelled: cancelled,
            state,
            closed: true,
            deleted: false,
            cancelled: cancelled > 0,
            callback_url: None,
            attributes: serde_json::json!({}),
            created_at: chrono::Utc::now(),
            completed_at: None,
            format_version: 1,
        }
    }

    #[test]
    fn outcome_success_when_all_succeeded() {
        let b = batch(BatchState::Complete, 3, 0, 0);
        assert_eq!(b.outcome(), BatchOutcome::Success);
    }

    #[test]
    fn outcome_failure_when_any_failed() {
        let b = batch(BatchState::Complete, 1, 1, 0);
        assert_eq!(b.outcome(), BatchOutcome::Failure);
    }

    #[test]
    fn outcome_cancelled_when_cancelled_without_failures() {
        let b = batch(BatchState::Complete, 1, 0, 1);
        assert_eq!(b.outcome(), BatchOutcome::Cancelled);
    }

    #[test]
    fn counters_consistency_check() {
        let mut b = batch(BatchState::Complete, 1, 1, 1);
        assert!(b.counters_consistent());
        b.n_completed = 2;
        assert!(!b.counters_consistent());
    }
}
