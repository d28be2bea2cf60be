// ABOUTME: Structured error responses for API consistency
// ABOUTME: Maps domain errors to HTTP status codes and machine-readable codes

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crucible_sandboxes::SandboxError;
use serde::Serialize;
use tracing::error;

/// Error wrapper handlers return; converts into a structured response
#[derive(Debug)]
pub struct ApiError(pub SandboxError);

/// Structured error response format
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl ApiError {
    fn to_status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            SandboxError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            SandboxError::AlreadyExists(_) => (StatusCode::CONFLICT, "ALREADY_EXISTS"),
            SandboxError::Busy(_) => (StatusCode::CONFLICT, "BUSY"),
            SandboxError::InvalidSyntax(_) => (StatusCode::BAD_REQUEST, "INVALID_SYNTAX"),
            SandboxError::Provisioning(_) | SandboxError::Docker(_) => {
                (StatusCode::BAD_GATEWAY, "PROVISIONING_ERROR")
            }
            SandboxError::KernelCrashed(_) => (StatusCode::BAD_GATEWAY, "KERNEL_CRASHED"),
            SandboxError::ExecutionTimeout { .. } => {
                (StatusCode::GATEWAY_TIMEOUT, "EXECUTION_TIMEOUT")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl From<SandboxError> for ApiError {
    fn from(err: SandboxError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.to_status_and_code();

        if status.is_server_error() {
            error!("Request failed with {}: {}", code, self.0);
        }

        let body = ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: code.to_string(),
                message: self.0.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result alias for handler return types
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Shorthand for a 404 with the given message
pub fn not_found(message: &str) -> ApiError {
    ApiError(SandboxError::NotFound(message.to_string()))
}
