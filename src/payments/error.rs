use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Why a tenant cannot take online payments right now.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationIssue {
    #[error("online payments are disabled for this tenant")]
    OnlinePaymentsDisabled,

    #[error("{gateway} credentials are incomplete: missing {field}")]
    MissingCredentials { gateway: String, field: String },

    #[error("unsupported payment gateway: {0}")]
    UnsupportedGateway(String),
}

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Configuration error: {issue}")]
    Configuration { issue: ConfigurationIssue },

    #[error("Invalid signature: {message}")]
    InvalidSignature { message: String },

    #[error("Malformed gateway payload: {message}")]
    MalformedResponse { message: String },

    #[error("Gateway unavailable: {message}")]
    RemoteUnavailable {
        message: String,
        status: Option<u16>,
    },

    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },
}

impl PaymentError {
    pub fn configuration(issue: ConfigurationIssue) -> Self {
        PaymentError::Configuration { issue }
    }

    pub fn missing_credentials(gateway: &str, field: &str) -> Self {
        PaymentError::Configuration {
            issue: ConfigurationIssue::MissingCredentials {
                gateway: gateway.to_string(),
                field: field.to_string(),
            },
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        PaymentError::MalformedResponse {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Configuration { .. } => false,
            PaymentError::InvalidSignature { .. } => false,
            PaymentError::MalformedResponse { .. } => false,
            PaymentError::RemoteUnavailable { .. } => true,
            PaymentError::ValidationError { .. } => false,
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        let kind = match err {
            PaymentError::Configuration { issue } => {
                AppErrorKind::Domain(crate::error::DomainError::PaymentsUnavailable { issue })
            }
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            other => AppErrorKind::External(ExternalError::PaymentGateway {
                gateway: "wompi".to_string(),
                message: other.to_string(),
                is_retryable: other.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}
