use crate::database::error::DatabaseError;
use crate::database::repository::TenantConfigStore;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

/// Reads `tenant_payment_settings.settings`. No caching: a credential
/// rotation is visible to the next callback.
pub struct TenantConfigRepository {
    pool: PgPool,
}

impl TenantConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantConfigStore for TenantConfigRepository {
    async fn load(&self, tenant_id: Uuid) -> Result<Option<JsonValue>, DatabaseError> {
        sqlx::query_scalar::<_, JsonValue>(
            "SELECT settings FROM tenant_payment_settings WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
