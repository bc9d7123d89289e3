use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Model session timed out after {0} polls")]
    Timeout(u32),

    #[error("Malformed model output: {0}")]
    Payload(String),

    #[error("Model session ended with status {0}")]
    TerminalSession(String),

    #[error("Generation exhausted: {0}")]
    Exhausted(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Job cancelled")]
    Cancelled,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a failed generation attempt may be followed by another one.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Store(_) | Error::Database(_) | Error::Cancelled | Error::Config(_)
        )
    }

    /// Stable message persisted with a failed job and shown to callers.
    pub fn classified(&self) -> &'static str {
        match self {
            Error::Timeout(_) => "generation_timeout",
            Error::Payload(_) | Error::Json(_) => "invalid_model_output",
            Error::TerminalSession(_) | Error::Reqwest(_) => "model_session_failed",
            Error::Exhausted(_) => "no_unique_questions",
            Error::Store(_) | Error::Database(_) => "storage_unavailable",
            Error::Cancelled => "cancelled",
            Error::Config(_) => "configuration_error",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let classified = self.classified().to_string();
        let (status, error_message) = match self {
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Error::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::Json(err) => {
                tracing::error!(error = %err, "failed to decode stored data");
                (StatusCode::INTERNAL_SERVER_ERROR, classified)
            }
            Error::Store(msg) => {
                tracing::error!(error = %msg, "store failure");
                (StatusCode::SERVICE_UNAVAILABLE, classified)
            }
            Error::Database(err) => {
                tracing::error!(error = %err, "database failure");
                (StatusCode::SERVICE_UNAVAILABLE, classified)
            }
            Error::Reqwest(err) => {
                tracing::error!(error = %err, "upstream failure");
                (StatusCode::BAD_GATEWAY, classified)
            }
            Error::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, classified),
            other => {
                tracing::error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::Store(format!("migration failed: {}", err))
    }
}
