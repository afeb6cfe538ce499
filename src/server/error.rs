//! HTTP error responses.

use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use tracing::error;

use crate::core::StatusError;
use crate::domain::InvalidSubmissionId;
use crate::ingest::IngressError;

/// Error rendered as `{"error": message}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), error = %self.message, "Request failed");
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<IngressError> for ApiError {
    fn from(e: IngressError) -> Self {
        let status = match &e {
            IngressError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            IngressError::MissingBody
            | IngressError::MalformedBody(_)
            | IngressError::InvalidSubmissionId(_) => StatusCode::BAD_REQUEST,
            IngressError::Dispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<StatusError> for ApiError {
    fn from(e: StatusError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl From<InvalidSubmissionId> for ApiError {
    fn from(e: InvalidSubmissionId) -> Self {
        Self::new(StatusCode::BAD_REQUEST, format!("invalid submission id: {}", e))
    }
}

impl From<BytesRejection> for ApiError {
    fn from(e: BytesRejection) -> Self {
        Self::new(e.status(), e.body_text())
    }
}
