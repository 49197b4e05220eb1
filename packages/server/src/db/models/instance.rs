use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Instance lifecycle (spec.md §4.6): only `active` instances receive
/// dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "instance_state", rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Active,
    Inactive,
    Deleted,
}

/// Durable record of a worker VM. The free-cores gauge is *not* stored
/// here: spec.md §3 calls it "a memoised counter that is recomputed on
/// reconciliation", so it lives only in the in-memory Instance Pool
/// Registry ([`crate::ipr`]), never in the Persistent Store.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Instance {
    pub name: String,
    pub pool_name: String,
    pub address: String,
    pub state: InstanceState,
    pub total_cores: i32,
    pub failed_request_count: i32,
    pub last_heartbeat: chrono::DateTime<chrono::Utc>,
}

impl Instance {
    pub fn total_cores_mcpu(&self) -> i64 {
        self.total_cores as i64 * 1000
    }
}
