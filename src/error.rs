//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// PostgreSQL SQLSTATE codes treated as transient: serialization_failure, deadlock_detected.
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01"];
const UNIQUE_VIOLATION: &str = "23505";
const READ_ONLY_SQL_TRANSACTION: &str = "25006";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),
    #[error("resource {id} registered as {declared} but implements {actual}")]
    KindMismatch {
        id: String,
        declared: &'static str,
        actual: &'static str,
    },
    #[error("invalid setting {key}: {message}")]
    InvalidSetting { key: String, message: String },
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("deleted resource: {0}")]
    DeletedResource(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// Optimistic-lock or serialization failure; retried by the transaction helper.
    #[error("transient conflict: {0}")]
    TransientConflict(String),
    #[error("write attempted in read-only transaction: {0}")]
    ReadOnlyTransaction(String),
    #[error("database: {0}")]
    Db(sqlx::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        ApiError::UnsupportedOperation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    /// True for failures the retrying transaction helper may re-run.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::TransientConflict(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ApiError::UnsupportedOperation(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::DeletedResource(_) => StatusCode::GONE,
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) | ApiError::TransientConflict(_) => StatusCode::CONFLICT,
            ApiError::ReadOnlyTransaction(_)
            | ApiError::Db(_)
            | ApiError::Io(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Config(_) => "config_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::PermissionDenied(_) => "permission_denied",
            ApiError::UnsupportedOperation(_) => "unsupported_operation",
            ApiError::DeletedResource(_) => "deleted_resource",
            ApiError::InvalidArgument(_) => "invalid_argument",
            ApiError::Conflict(_) => "conflict",
            ApiError::TransientConflict(_) => "concurrency_failure",
            ApiError::ReadOnlyTransaction(_) => "read_only_transaction",
            ApiError::Db(_) => "database_error",
            ApiError::Io(_) => "io_error",
            ApiError::Internal(_) => "internal_error",
        }
    }

    /// Log at a severity matching the status class: 5xx at error, 403/404 at debug, other 4xx at info.
    fn log(&self, status: StatusCode) {
        let code = self.code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), code, error = %self, "request failed");
        } else if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
            tracing::debug!(status = status.as_u16(), code, error = %self, "request rejected");
        } else {
            tracing::info!(status = status.as_u16(), code, error = %self, "request rejected");
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::RowNotFound = e {
            return ApiError::NotFound("row not found".into());
        }
        let sqlstate = e
            .as_database_error()
            .and_then(|d| d.code())
            .map(|c| c.into_owned());
        match sqlstate.as_deref() {
            Some(code) if TRANSIENT_SQLSTATES.contains(&code) => ApiError::TransientConflict(e.to_string()),
            Some(UNIQUE_VIOLATION) => ApiError::Conflict(e.to_string()),
            Some(READ_ONLY_SQL_TRANSACTION) => ApiError::ReadOnlyTransaction(e.to_string()),
            _ => ApiError::Db(e),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        self.log(status);
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                status_code: status.as_u16(),
                message: self.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
