//! Error types for request-scoped database sessions.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Startup errors (`Configuration`, `Startup`) are fatal; runtime transaction errors
//! (`Commit`, `Rollback`) are compensated locally and then reported. Nothing in here is
//! ever rendered to an HTTP client verbatim except `InvalidInput`.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error for engine '{engine_key}': {message}")]
    Configuration { engine_key: String, message: String },

    #[error("Startup failed for engine '{engine_key}': {message}")]
    Startup { engine_key: String, message: String },

    #[error(
        "No session factory registered for engine '{engine_key}'. Ensure the environment variables for this key are configured and the engine was started."
    )]
    UnknownEngine { engine_key: String },

    #[error(
        "No session for engine '{engine_key}' found in request. Ensure the session middleware is installed for this key."
    )]
    SessionNotFound { engine_key: String },

    #[error("Session {session_id} for engine '{engine_key}' is already closed")]
    SessionClosed {
        engine_key: String,
        session_id: String,
    },

    #[error("Commit failed for engine '{engine_key}': {message}")]
    Commit { engine_key: String, message: String },

    #[error("Rollback failed for engine '{engine_key}': {message}")]
    Rollback { engine_key: String, message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23505" for unique violation
        sql_state: Option<String>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String, suggestion: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(engine_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            engine_key: engine_key.into(),
            message: message.into(),
        }
    }

    /// Create a startup error (liveness probe or startup hook failure).
    pub fn startup(engine_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Startup {
            engine_key: engine_key.into(),
            message: message.into(),
        }
    }

    pub fn unknown_engine(engine_key: impl Into<String>) -> Self {
        Self::UnknownEngine {
            engine_key: engine_key.into(),
        }
    }

    pub fn session_not_found(engine_key: impl Into<String>) -> Self {
        Self::SessionNotFound {
            engine_key: engine_key.into(),
        }
    }

    pub fn session_closed(engine_key: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::SessionClosed {
            engine_key: engine_key.into(),
            session_id: session_id.into(),
        }
    }

    /// Create a commit error.
    pub fn commit(engine_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Commit {
            engine_key: engine_key.into(),
            message: message.into(),
        }
    }

    /// Create a rollback error.
    pub fn rollback(engine_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rollback {
            engine_key: engine_key.into(),
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::InvalidInput { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Configuration mismatches (`UnknownEngine`, `SessionNotFound`) are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Check if this error must abort process startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Startup { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::database("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Restart the engine")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::database(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// The only body a client sees when finalization or session plumbing fails.
pub const INTERNAL_SERVER_ERROR_BODY: &str = "Internal Server Error";

/// Build the generic 500 response that hides internal detail from clients.
pub fn internal_server_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_SERVER_ERROR_BODY).into_response()
}

impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorDetail,
        }
        #[derive(Serialize)]
        struct ErrorDetail {
            code: &'static str,
            message: String,
            suggestion: String,
        }

        match self {
            DbError::InvalidInput {
                message,
                suggestion,
            } => {
                let body = ErrorResponse {
                    error: ErrorDetail {
                        code: "invalid_input",
                        message,
                        suggestion,
                    },
                };
                let json = serde_json::to_string(&body).unwrap_or_else(|_| {
                    r#"{"error":{"code":"invalid_input","message":"Invalid input"}}"#.to_string()
                });
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    [(header::CONTENT_TYPE, "application/json")],
                    json,
                )
                    .into_response()
            }
            other => {
                error!(error = %other, "Request failed with server error");
                internal_server_error()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::unknown_engine("potato");
        assert!(err.to_string().contains("'potato'"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::invalid_input("limit too large", "Use a limit <= 100");
        assert_eq!(err.suggestion(), Some("Use a limit <= 100"));
        assert_eq!(DbError::commit("default", "boom").suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("acquire", 30).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::unknown_engine("x").is_retryable());
        assert!(!DbError::session_not_found("x").is_retryable());
    }

    #[test]
    fn test_error_fatal() {
        assert!(DbError::configuration("default", "missing url").is_fatal());
        assert!(DbError::startup("default", "probe failed").is_fatal());
        assert!(!DbError::commit("default", "boom").is_fatal());
    }

    #[test]
    fn test_invalid_input_maps_to_422() {
        let response = DbError::invalid_input("bad", "fix it").into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_server_errors_map_to_generic_500() {
        for err in [
            DbError::unknown_engine("x"),
            DbError::session_not_found("x"),
            DbError::commit("x", "secret detail"),
            DbError::rollback("x", "secret detail"),
            DbError::database("duplicate key", Some("23505".to_string())),
        ] {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[tokio::test]
    async fn test_server_error_body_hides_detail() {
        let response = DbError::commit("x", "secret detail").into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], INTERNAL_SERVER_ERROR_BODY.as_bytes());
    }
}
