//! Error handling

use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
    Json,
};
use serde_json::json;

use crate::store::StoreError;

pub type AppResult<T> = Result<T, CorrelationError>;

/// Stable error classification exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Timeout,
    Validation,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{operation} timed out")]
    Timeout { operation: String },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("storage failure during {operation}: {source}")]
    Store {
        operation: String,
        #[source]
        source: StoreError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CorrelationError {
    /// Wrap a storage error, keeping timeouts and not-found distinct
    pub fn store(operation: &str, source: StoreError) -> Self {
        match source {
            StoreError::Timeout(_) => CorrelationError::Timeout {
                operation: operation.to_string(),
            },
            StoreError::NotFound(what) => CorrelationError::NotFound(what),
            source => CorrelationError::Store {
                operation: operation.to_string(),
                source,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CorrelationError::NotFound(_) => ErrorKind::NotFound,
            CorrelationError::Timeout { .. } => ErrorKind::Timeout,
            CorrelationError::Validation(_) => ErrorKind::Validation,
            CorrelationError::Store { .. } | CorrelationError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<validator::ValidationErrors> for CorrelationError {
    fn from(err: validator::ValidationErrors) -> Self {
        CorrelationError::Validation(err.to_string())
    }
}

impl IntoResponse for CorrelationError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let (status, error_message) = match &self {
            CorrelationError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            CorrelationError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            CorrelationError::Timeout { .. } => {
                tracing::error!("Timeout: {}", self);
                (StatusCode::GATEWAY_TIMEOUT, self.to_string())
            }
            CorrelationError::Store { .. } | CorrelationError::Internal(_) => {
                tracing::error!("Internal error: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "kind": kind.as_str(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
