use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use courier_broker::RpcError;
use courier_shared::protocol::ErrorCode;
use courier_store::StoreError;

use crate::assembly::AssemblyError;

/// Errors surfaced by the HTTP endpoints.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: usize, max: usize },

    #[error("File storage error: {0}")]
    FileStorage(String),

    #[error("Upstream service error: {0}")]
    Upstream(#[from] RpcError),

    #[error("Database error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ServerError::FileStorage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "File storage error".to_string(),
            ),
            ServerError::Upstream(RpcError::Timeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, self.to_string())
            }
            ServerError::Upstream(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            ServerError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "Record not found".to_string())
            }
            ServerError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Failure of a WebSocket event handler. Answered with an `ERROR` frame on the
/// initiating connection.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Malformed(String),

    #[error("File exceeds {max} bytes")]
    TooLarge { max: usize },

    #[error("Chunk {0} is missing")]
    MissingChunk(u32),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl EventError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EventError::NotFound(_) => ErrorCode::NotFound,
            EventError::InvalidState(_) => ErrorCode::InvalidState,
            EventError::Malformed(_) => ErrorCode::Malformed,
            EventError::TooLarge { .. } => ErrorCode::TooLarge,
            EventError::MissingChunk(_) => ErrorCode::InvalidState,
            EventError::Storage(_) => ErrorCode::Internal,
        }
    }
}

impl From<StoreError> for EventError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => EventError::NotFound("record".to_string()),
            StoreError::InvalidState(msg) => EventError::InvalidState(msg),
            other => EventError::Storage(other.to_string()),
        }
    }
}

impl From<AssemblyError> for EventError {
    fn from(e: AssemblyError) -> Self {
        match e {
            AssemblyError::InvalidState(msg) => EventError::InvalidState(msg),
            AssemblyError::TooLarge { max, .. } => EventError::TooLarge { max },
            AssemblyError::MissingChunk(index) => EventError::MissingChunk(index),
        }
    }
}
