//! Error translation from pipeline failures to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_pipeline::PipelineError;
use serde::Serialize;
use tracing::error;

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details including code and message
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable machine-readable error code
    pub code: String,
    /// Human-readable error description
    pub message: String,
}

/// API-level error carrying the HTTP status it maps to.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Client sent something unusable (bad date, bad id).
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: "bad_request", message: message.into() }
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::NotFound { .. } => Self {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message: error.to_string(),
            },
            PipelineError::Precondition { .. } => Self {
                status: StatusCode::BAD_REQUEST,
                code: "invalid_state",
                message: error.to_string(),
            },
            PipelineError::Fetch { .. }
            | PipelineError::Store { .. }
            | PipelineError::Notify { .. }
            | PipelineError::Internal { .. } => {
                error!(error = %error, "request failed with internal error");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: error.to_string(),
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorDetail { code: self.code.to_string(), message: self.message },
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use relay_core::WebhookId;

    use super::*;

    #[test]
    fn pipeline_errors_map_to_expected_statuses() {
        let not_found: ApiError = PipelineError::not_found(WebhookId::new()).into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);

        let precondition: ApiError = PipelineError::precondition("already downloaded").into();
        assert_eq!(precondition.status, StatusCode::BAD_REQUEST);
        assert_eq!(precondition.code, "invalid_state");

        let internal: ApiError = PipelineError::internal("boom").into();
        assert_eq!(internal.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
