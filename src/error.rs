//! Error handling

use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
    Json,
};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

/// Errors surfaced at the HTTP boundary
#[derive(Debug)]
pub enum AppError {
    // Resource errors
    NotFound(String),

    // Validation errors
    ValidationError(String),

    // Database errors
    DatabaseError(String),

    // Generic errors
    InternalError(String),
}

/// Record Store failures. Always transient from the caller's point of view:
/// the operation is abandoned and retried on the next attempt.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.as_str()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            AppError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error occurred")
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// SQLSTATE for a regular expression PostgreSQL refuses to compile
const INVALID_REGULAR_EXPRESSION: &str = "2201B";

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let code = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned());
        from_sqlstate(code.as_deref(), err.to_string())
    }
}

/// Search patterns are checked with Rust `regex` but run by PostgreSQL; a
/// pattern only PostgreSQL rejects is reported as a validation error.
fn from_sqlstate(code: Option<&str>, message: String) -> AppError {
    match code {
        Some(INVALID_REGULAR_EXPRESSION) => {
            AppError::ValidationError(format!("invalid message pattern: {message}"))
        }
        _ => AppError::DatabaseError(message),
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<crate::store::filter::FilterError> for AppError {
    fn from(err: crate::store::filter::FilterError) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

impl From<crate::patterns::PatternError> for AppError {
    fn from(err: crate::patterns::PatternError) -> Self {
        match err {
            crate::patterns::PatternError::InvalidMatcher(e) => AppError::InternalError(e.to_string()),
            crate::patterns::PatternError::Store(e) => e.into(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}
