//! Storage error types shared by the Postgres repositories and the in-memory store

use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// A uniqueness constraint rejected the write (e.g. duplicate reference)
    UniqueViolation { constraint: String },
    NotFound { entity: String, id: String },
    /// Pool exhausted, connection refused or dropped
    Connection { message: String },
    Query { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        })
    }

    pub fn unique_violation(constraint: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::UniqueViolation {
            constraint: constraint.into(),
        })
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Connection { .. })
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::Connection {
                    message: err.to_string(),
                }
            }
            sqlx::Error::Database(_) | sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseErrorKind::Query {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self { kind }
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let kind = match &err.kind {
            DatabaseErrorKind::UniqueViolation { constraint } => {
                AppErrorKind::Domain(DomainError::DuplicateTransaction {
                    reference: constraint.clone(),
                })
            }
            DatabaseErrorKind::NotFound { id, .. } => {
                AppErrorKind::Domain(DomainError::TransactionNotFound {
                    reference: id.clone(),
                })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_failures_are_retryable() {
        assert!(DatabaseError::new(DatabaseErrorKind::Connection {
            message: "refused".to_string()
        })
        .is_retryable());
        assert!(!DatabaseError::unique_violation("payment_records_reference_key").is_retryable());
    }

    #[test]
    fn unique_violation_maps_to_conflict() {
        let app: AppError = DatabaseError::unique_violation("payment_transactions_reference_key").into();
        assert_eq!(app.status_code(), 409);
    }
}
