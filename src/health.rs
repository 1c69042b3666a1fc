//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
#[cfg(feature = "database")]
use std::time::{Duration, Instant};
#[cfg(feature = "database")]
use tokio::time::timeout;
#[cfg(feature = "database")]
use tracing::{error, info};

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone, Default)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
}

impl HealthChecker {
    #[cfg(feature = "database")]
    pub fn new(db_pool: sqlx::PgPool) -> Self {
        Self {
            db_pool: Some(db_pool),
        }
    }

    /// A checker with no database attached; reports the database as a warning.
    pub fn without_database() -> Self {
        Self::default()
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let database = self.check_database().await;
        let overall_healthy = !matches!(database.status, ComponentState::Down);
        let degraded = matches!(database.status, ComponentState::Warning);
        health_status.checks.insert("database".to_string(), database);

        health_status.status = if !overall_healthy {
            HealthState::Unhealthy
        } else if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }

    #[cfg(feature = "database")]
    async fn check_database(&self) -> ComponentHealth {
        let Some(pool) = self.db_pool.as_ref() else {
            return ComponentHealth::warning(None, Some("database not configured".to_string()));
        };

        let start = Instant::now();
        match timeout(Duration::from_secs(5), crate::database::health_check(pool)).await {
            Ok(Ok(())) => {
                let response_time = start.elapsed().as_millis();
                info!("Database health check: OK ({}ms)", response_time);
                ComponentHealth::up(Some(response_time))
            }
            Ok(Err(e)) => {
                error!("Database health check failed: {}", e);
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!("Database health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        }
    }

    #[cfg(not(feature = "database"))]
    async fn check_database(&self) -> ComponentHealth {
        ComponentHealth::warning(None, Some("database not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
        assert_eq!(warning_health.response_time_ms, Some(500));
        assert_eq!(warning_health.details, Some("Slow response".to_string()));
    }

    #[tokio::test]
    async fn checker_without_database_reports_degraded() {
        let status = HealthChecker::without_database().check_health().await;
        assert_eq!(status.status, HealthState::Degraded);
        assert_eq!(status.checks["database"].status, ComponentState::Warning);
        assert!(!status.is_healthy());
    }
}
