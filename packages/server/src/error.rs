use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// User-visible error taxonomy for the batch core.
///
/// `Transient` never reaches a caller directly: it is absorbed by the
/// retry/backoff helper in [`crate::common::backoff`] and only surfaces once
/// a retry budget is exhausted, at which point the caller that exhausted it
/// maps it to `Fatal` or records it against the job.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("wrong state: {0}")]
    WrongState(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn wrong_state(msg: impl Into<String>) -> Self {
        Self::WrongState(msg.into())
    }

    /// True for errors the backoff helper should retry: transport failures,
    /// 5xx, and Postgres deadlock/serialization-failure SQLSTATEs.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "ValidationError"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "Forbidden"),
            AppError::WrongState(_) => (StatusCode::BAD_REQUEST, "WrongState"),
            AppError::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, "Transient"),
            AppError::Fatal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Fatal"),
        };

        if matches!(self, AppError::Fatal(_)) {
            tracing::error!(error = %self, "fatal error");
        }

        let body = ErrorBody {
            error: kind.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Classifies a Postgres error for the retry wrapper in
/// [`crate::common::backoff`]. SQLSTATE `40001` (serialization_failure) and
/// `40P01` (deadlock_detected) are the Postgres analogues of the original
/// service's MySQL-1213 retry.
pub fn is_retryable_db_error(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
    } else {
        false
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("not found".to_string()),
            other => AppError::Fatal(other.into()),
        }
    }
}
