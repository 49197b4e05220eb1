use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Billing project status. Closed and deleted projects admit no new
/// batches (spec.md §3). CRUD for this entity is out of scope (SPEC_FULL.md
/// §3); only the read used by `create-batch` validation is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "billing_project_status", rename_all = "snake_case")]
pub enum BillingProjectStatus {
    Open,
    Closed,
    Deleted,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BillingProject {
    pub name: String,
    pub status: BillingProjectStatus,
    pub spend_limit: Option<f64>,
    pub accrued_cost: f64,
}

impl BillingProject {
    /// spec.md §4.1: "reject if `accrued ≥ limit`".
    pub fn over_spend_limit(&self) -> bool {
        match self.spend_limit {
            Some(limit) => self.accrued_cost >= limit,
            None => false,
        }
    }

    pub fn accepts_new_batches(&self) -> bool {
        self.status == BillingProjectStatus::Open && !self.over_spend_limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(status: BillingProjectStatus, limit: Option<f64>, accrued: f64) -> BillingProject {
        BillingProject {
            name: "bp".to_string(),
            status,
            spend_limit: limit,
            accrued_cost: accrued,
        }
    }

    #[test]
    fn closed_project_rejects_batches() {
        let bp = project(BillingProjectStatus::Closed, None, 0.0);
        assert!(!bp.accepts_new_batches());
    }

    #[test]
    fn over_limit_project_rejects_batches() {
        let bp = project(BillingProjectStatus::Open, Some(10.0), 10.0);
        assert!(!bp.accepts_new_batches());
    }

    #[test]
    fn under_limit_open_project_accepts_batches() {
        let bp = project(BillingProjectStatus::Open, Some(10.0), 9.99);
        assert!(bp.accepts_new_batches());
    }
}
