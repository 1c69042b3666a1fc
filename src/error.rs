//! Application-level error handling
//!
//! Every layer error (payments, database, orchestrator) converts into
//! [`AppError`], which carries the HTTP status, a stable error code for
//! clients and a user-facing message.

use crate::payments::error::ConfigurationIssue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENTS_DISABLED")]
    PaymentsDisabled,
    #[serde(rename = "GATEWAY_CREDENTIALS_INCOMPLETE")]
    GatewayCredentialsIncomplete,
    #[serde(rename = "UNSUPPORTED_GATEWAY")]
    UnsupportedGateway,
    #[serde(rename = "PROFILE_NOT_FOUND")]
    ProfileNotFound,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "DUPLICATE_TRANSACTION")]
    DuplicateTransaction,
    #[serde(rename = "UNAUTHENTICATED")]
    Unauthenticated,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503)
    #[serde(rename = "PAYMENT_GATEWAY_ERROR")]
    PaymentGatewayError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// The tenant cannot take online payments (disabled, incomplete or unsupported gateway)
    PaymentsUnavailable { issue: ConfigurationIssue },
    /// The principal has no payable profile under this tenant
    ProfileNotFound { user_id: String, tenant_id: String },
    TransactionNotFound { reference: String },
    DuplicateTransaction { reference: String },
    /// No usable caller identity on the request
    Unauthenticated { reason: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// Errors from the payment gateway
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentGateway {
        gateway: String,
        message: String,
        is_retryable: bool,
    },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    InvalidCurrency { currency: String, reason: String },
    MissingField { field: String },
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
    InvalidField { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::Unauthenticated {
            reason: reason.into(),
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentsUnavailable { .. } => 422,
                DomainError::ProfileNotFound { .. } => 404,
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::DuplicateTransaction { .. } => 409,
                DomainError::Unauthenticated { .. } => 401,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => {
                    if *is_retryable {
                        503
                    } else {
                        502
                    }
                }
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentsUnavailable { issue } => match issue {
                    ConfigurationIssue::OnlinePaymentsDisabled => ErrorCode::PaymentsDisabled,
                    ConfigurationIssue::MissingCredentials { .. } => {
                        ErrorCode::GatewayCredentialsIncomplete
                    }
                    ConfigurationIssue::UnsupportedGateway(_) => ErrorCode::UnsupportedGateway,
                },
                DomainError::ProfileNotFound { .. } => ErrorCode::ProfileNotFound,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::DuplicateTransaction { .. } => ErrorCode::DuplicateTransaction,
                DomainError::Unauthenticated { .. } => ErrorCode::Unauthenticated,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(_) => ErrorCode::PaymentGatewayError,
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentsUnavailable { issue } => match issue {
                    ConfigurationIssue::OnlinePaymentsDisabled => {
                        "Online payments are not enabled for this organization".to_string()
                    }
                    ConfigurationIssue::MissingCredentials { gateway, field } => format!(
                        "Online payments are not fully configured: {} {} is missing",
                        gateway, field
                    ),
                    ConfigurationIssue::UnsupportedGateway(name) => {
                        format!("Payment gateway '{}' is not supported", name)
                    }
                },
                DomainError::ProfileNotFound { .. } => {
                    "No payable profile found for this account".to_string()
                }
                DomainError::TransactionNotFound { reference } => {
                    format!("Transaction '{}' not found", reference)
                }
                DomainError::DuplicateTransaction { reference } => {
                    format!("Transaction '{}' already exists", reference)
                }
                DomainError::Unauthenticated { reason } => {
                    format!("Authentication required: {}", reason)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway {
                    gateway,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment gateway ({}) is temporarily unavailable. Please try again",
                            gateway
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => format!("Field '{}' must be at least {}", field, min),
                    (None, Some(max)) => format!("Field '{}' must be at most {}", field, max),
                    (None, None) => format!("Field '{}' is out of acceptable range", field),
                },
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError>, From<PaymentError> and From<OrchestratorError> live next
// to their source types.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
