//! Instance lifecycle ingest (spec.md §3 GLOSSARY: "a cluster instance
//! provider" is an external collaborator; this is the seam it calls back
//! through once it has provisioned a worker VM). Bearer-authenticated the
//! same as the job-completion callbacks (spec.md §6).

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::db::models::InstanceState;
use crate::error::{AppError, AppResult};

use super::auth::Identity;
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterInstanceRequest {
    pub name: String,
    pub pool_name: String,
    pub address: String,
    pub total_cores: i32,
}

/// A newly provisioned worker VM announces itself here. Inserted as
/// `pending` in PS and registered in the IPR with a full free-cores gauge;
/// the reconcile loop promotes it to `active` once its first health probe
/// succeeds (spec.md §4.4).
pub async fn register_instance(
    State(state): State<AppState>,
    Json(body): Json<RegisterInstanceRequest>,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO instances (name, pool_name, address, state, total_cores)
         VALUES ($1, $2, $3, 'pending', $4)
         ON CONFLICT (name) DO NOTHING",
    )
    .bind(&body.name)
    .bind(&body.pool_name)
    .bind(&body.address)
    .bind(body.total_cores)
    .execute(&state.db)
    .await
    .map_err(AppError::from)?;

    state
        .ipr
        .register(
            body.name,
            body.pool_name,
            body.address,
            body.total_cores as i64 * 1000,
        )
        .await;
    Ok(())
}

/// `GET /instances/{name}`: current lifecycle state, for operational
/// visibility — not read by the scheduler, which talks to the IPR.
pub async fn get_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let identity = Identity::from_headers(&headers).map_err(|(_, msg)| AppError::Forbidden(msg))?;
    if !identity.privileged {
        return Err(AppError::Forbidden(
            "only privileged callers may inspect instances".to_string(),
        ));
    }

    let row: (String, String, String, InstanceState, i32, i32) = sqlx::query_as(
        "SELECT name, pool_name, address, state, total_cores, failed_request_count
         FROM instances WHERE name = $1",
    )
    .bind(&name)
    .fetch_optional(&state.db)
    .await
    .map_err(AppError::from)?
    .ok_or_else(|| AppError::not_found(format!("instance {name} not found")))?;

    Ok(Json(serde_json::json!({
        "name": row.0,
        "pool_name": row.1,
        "address": row.2,
        "state": row.3,
        "total_cores": row.4,
        "failed_request_count": row.5,
    })))
}
