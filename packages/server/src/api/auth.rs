//! Request-identity extraction (spec.md §1: authentication is an external
//! collaborator, out of scope for the batch core). Two concerns live here:
//! a bearer-token check for worker callbacks (spec.md §6, concretely
//! specified) and a thin `Identity` extractor for user-facing endpoints
//! that assumes an upstream gateway has already authenticated the caller
//! and forwards their identity in headers.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use super::AppState;

/// The authenticated caller of a user-facing FE endpoint. `owner` is the
/// billing identity used for idempotency-key scoping (`(owner, token)`,
/// spec.md §3); `privileged` gates secret-mounting and non-public network
/// modes (spec.md §4.1).
#[derive(Debug, Clone)]
pub struct Identity {
    pub owner: String,
    pub privileged: bool,
}

impl Identity {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, (StatusCode, String)> {
        let owner = headers
            .get("x-hail-user")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or((StatusCode::UNAUTHORIZED, "missing X-Hail-User".to_string()))?;
        let privileged = headers
            .get("x-hail-privileged")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "true")
            .unwrap_or(false);
        Ok(Self { owner, privileged })
    }
}

/// Worker callbacks (`/jobs/{jid}/started`, `/jobs/{jid}/complete`) are
/// bearer-token authenticated (spec.md §6), not tied to a user identity.
pub async fn require_worker_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(t) if t == state.config.worker_bearer_token => Ok(next.run(request).await),
        _ => Err(StatusCode::FORBIDDEN),
    }
}
