// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fanout_sfu::SfuError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Convert session-layer errors to HTTP errors
impl From<SfuError> for AppError {
    fn from(err: SfuError) -> Self {
        match err {
            SfuError::InvalidOffer(msg) => Self::bad_request(format!("Invalid offer: {msg}")),
            SfuError::InvalidCandidate(msg) => {
                Self::bad_request(format!("Invalid ICE candidate: {msg}"))
            }
            SfuError::NoPublisher => Self::service_unavailable("No publisher available"),
            err @ SfuError::NotNew(_) => Self::conflict(err.to_string()),
            SfuError::Transport(e) => {
                tracing::error!(error = %e, "Transport error");
                Self::internal_server_error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_sfu::{SessionState, TransportError};

    #[test]
    fn test_sfu_error_status_mapping() {
        let cases = [
            (SfuError::InvalidOffer("x".into()), StatusCode::BAD_REQUEST),
            (SfuError::InvalidCandidate("x".into()), StatusCode::BAD_REQUEST),
            (SfuError::NoPublisher, StatusCode::SERVICE_UNAVAILABLE),
            (SfuError::NotNew(SessionState::Negotiating), StatusCode::CONFLICT),
            (
                SfuError::Transport(TransportError::Answer("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }
}
