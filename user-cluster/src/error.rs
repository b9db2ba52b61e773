use std::net::SocketAddr;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Every failure a client can observe.
///
/// The `Display` text is exactly what ends up in the `message` field of the
/// response body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Incorrect endpoint")]
    InvalidEndpoint,
    /// Reported as 500, not 405.
    #[error("Invalid method")]
    InvalidMethod,
    #[error("Invalid user id")]
    InvalidIdentifier,
    #[error("User not found")]
    NotFound,
    #[error("Invalid user data")]
    InvalidBody,
    #[error("Internal server error")]
    Dispatch(SocketAddr),
    #[error("Internal server error")]
    Unavailable,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidEndpoint | ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidIdentifier | ApiError::InvalidBody => StatusCode::BAD_REQUEST,
            ApiError::InvalidMethod | ApiError::Dispatch(_) | ApiError::Unavailable => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
