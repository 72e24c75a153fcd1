use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use campus_shared::protocol::ErrorCode;
use campus_shared::ProtocolError;
use campus_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Call already in progress between {0}")]
    CallBusy(String),

    #[error("No ringing call for {0}")]
    NoActiveCall(String),

    #[error("Message store error: {0}")]
    Store(#[from] StoreError),

    #[error("Message store timed out")]
    StoreTimeout,

    #[error("Too many requests")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Code carried by the socket-level error acknowledgment.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::Protocol(e) => ErrorCode::from(e),
            ServerError::BadRequest(_) => ErrorCode::Invalid,
            ServerError::Unauthorized(_) | ServerError::Forbidden(_) => ErrorCode::Forbidden,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::CallBusy(_) => ErrorCode::CallBusy,
            ServerError::NoActiveCall(_) => ErrorCode::NoActiveCall,
            ServerError::Store(StoreError::NotFound) => ErrorCode::NotFound,
            ServerError::Store(_)
            | ServerError::StoreTimeout
            | ServerError::RateLimited
            | ServerError::Internal(_) => ErrorCode::StoreFailed,
        }
    }

    /// Message safe to show a client; internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ServerError::Store(StoreError::NotFound) => "Record not found".to_string(),
            ServerError::Store(_) => "Message store error".to_string(),
            ServerError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Protocol(_) | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) | ServerError::Store(StoreError::NotFound) => {
                StatusCode::NOT_FOUND
            }
            ServerError::CallBusy(_) | ServerError::NoActiveCall(_) => StatusCode::CONFLICT,
            ServerError::StoreTimeout => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ServerError::Store(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = serde_json::json!({
            "error": self.public_message(),
        });

        (status, axum::Json(body)).into_response()
    }
}
