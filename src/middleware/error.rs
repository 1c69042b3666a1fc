//! Error response formatting
//!
//! Every `AppError` leaving a handler becomes the same JSON body with the
//! matching HTTP status.

use crate::error::{AppError, AppErrorKind, ErrorCode, ValidationError};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Request ID for debugging and support
    pub request_id: Option<String>,

    /// ISO 8601 timestamp of the error
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Whether the client should retry the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        let details = match &error.kind {
            AppErrorKind::Validation(ValidationError::InvalidField { field, reason }) => {
                Some(serde_json::json!({ "field": field, "error": reason }))
            }
            AppErrorKind::Validation(ValidationError::MissingField { field }) => {
                Some(serde_json::json!({ "field": field }))
            }
            _ => None,
        };

        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details,
            retryable: Some(error.is_retryable()),
        }
    }

    pub fn internal_error(request_id: Option<String>) -> Self {
        Self {
            error: ErrorCode::InternalError,
            message: "An internal server error occurred. Please try again later.".to_string(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(false),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let error_response = ErrorResponse::from_app_error(&self);
        (status_code, Json(error_response)).into_response()
    }
}

/// Helper to extract request ID from request headers
pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainError;
    use crate::payments::error::ConfigurationIssue;

    #[test]
    fn error_response_carries_code_and_request_id() {
        let app_error = AppError::new(AppErrorKind::Domain(DomainError::PaymentsUnavailable {
            issue: ConfigurationIssue::OnlinePaymentsDisabled,
        }))
        .with_request_id("req_123");

        let error_response = ErrorResponse::from_app_error(&app_error);

        assert_eq!(error_response.error, ErrorCode::PaymentsDisabled);
        assert_eq!(error_response.request_id, Some("req_123".to_string()));
        assert_eq!(error_response.retryable, Some(false));
    }

    #[test]
    fn invalid_field_adds_details() {
        let app_error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: "currency".to_string(),
            reason: "currency is required".to_string(),
        }));

        let error_response = ErrorResponse::from_app_error(&app_error);
        assert_eq!(
            error_response.details,
            Some(serde_json::json!({"field": "currency", "error": "currency is required"}))
        );
    }

    #[test]
    fn app_error_into_response_uses_status_code() {
        let response = AppError::new(AppErrorKind::Domain(DomainError::ProfileNotFound {
            user_id: "u".to_string(),
            tenant_id: "t".to_string(),
        }))
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn request_id_is_read_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "abc".parse().unwrap());
        assert_eq!(get_request_id_from_headers(&headers).as_deref(), Some("abc"));
    }
}
