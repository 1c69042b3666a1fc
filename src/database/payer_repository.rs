use crate::database::error::DatabaseError;
use crate::database::repository::PayerDirectory;
use crate::payments::types::Payer;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct PayerProfileRow {
    id: Uuid,
    tenant_id: Uuid,
    user_id: Uuid,
    email: Option<String>,
    full_name: Option<String>,
}

/// Looks up the payable profile behind an authenticated user
pub struct PayerRepository {
    pool: PgPool,
}

impl PayerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PayerDirectory for PayerRepository {
    async fn resolve(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<Payer>, DatabaseError> {
        let row = sqlx::query_as::<_, PayerProfileRow>(
            "SELECT id, tenant_id, user_id, email, full_name
             FROM payer_profiles
             WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(|r| Payer {
            user_id: r.user_id,
            profile_id: r.id,
            tenant_id: r.tenant_id,
            email: r.email,
            full_name: r.full_name,
        }))
    }
}
