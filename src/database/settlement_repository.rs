use crate::database::error::DatabaseError;
use crate::database::repository::{PaymentRecord, Settlement, SettlementRequest, SettlementStore};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

const RECORD_COLUMNS: &str =
    "id, tenant_id, profile_id, reference, amount, currency, method, description, status, paid_at";

#[derive(Debug, Clone, sqlx::FromRow)]
struct PaymentRecordRow {
    id: Uuid,
    tenant_id: Uuid,
    profile_id: Uuid,
    reference: String,
    amount: Decimal,
    currency: String,
    method: String,
    description: String,
    status: String,
    paid_at: chrono::DateTime<chrono::Utc>,
}

impl From<PaymentRecordRow> for PaymentRecord {
    fn from(row: PaymentRecordRow) -> Self {
        PaymentRecord {
            id: row.id,
            tenant_id: row.tenant_id,
            profile_id: row.profile_id,
            reference: row.reference,
            amount: row.amount,
            currency: row.currency,
            method: row.method,
            description: row.description,
            status: row.status,
            paid_at: row.paid_at,
        }
    }
}

/// Payment records plus the `payer_profiles.balance` they credit.
pub struct SettlementRepository {
    pool: PgPool,
}

impl SettlementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettlementStore for SettlementRepository {
    /// The unique index on `payment_records.reference` decides which concurrent
    /// caller wins; only the winner's transaction touches the balance.
    async fn settle(&self, request: SettlementRequest) -> Result<Settlement, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let inserted = sqlx::query_as::<_, PaymentRecordRow>(&format!(
            "INSERT INTO payment_records
             (tenant_id, profile_id, reference, amount, currency, method, description, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'COMPLETED')
             ON CONFLICT (reference) DO NOTHING
             RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(request.tenant_id)
        .bind(request.profile_id)
        .bind(&request.reference)
        .bind(request.amount)
        .bind(&request.currency)
        .bind(&request.method)
        .bind(&request.description)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let record = match inserted {
            Some(record) => record,
            None => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                debug!(reference = %request.reference, "payment record already exists");
                return Ok(Settlement::AlreadySettled);
            }
        };

        let updated = sqlx::query(
            "UPDATE payer_profiles SET balance = balance + $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(request.profile_id)
        .bind(request.amount)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Err(DatabaseError::not_found(
                "PayerProfile",
                request.profile_id.to_string(),
            ));
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(Settlement::Credited(record.into()))
    }

    async fn find_record(&self, reference: &str) -> Result<Option<PaymentRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRecordRow>(&format!(
            "SELECT {} FROM payment_records WHERE reference = $1",
            RECORD_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(PaymentRecord::from))
    }

    async fn balance(&self, profile_id: Uuid) -> Result<Option<Decimal>, DatabaseError> {
        sqlx::query_scalar::<_, Decimal>("SELECT balance FROM payer_profiles WHERE id = $1")
            .bind(profile_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires database running
    async fn concurrent_settlement_credits_once() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::database::init_pool(&url, None).await.unwrap();

        let tenant_id = Uuid::new_v4();
        let profile_id: Uuid = sqlx::query_scalar(
            "INSERT INTO payer_profiles (tenant_id, user_id, balance) VALUES ($1, $2, 0) RETURNING id",
        )
        .bind(tenant_id)
        .bind(Uuid::new_v4())
        .fetch_one(&pool)
        .await
        .unwrap();

        let repo = std::sync::Arc::new(SettlementRepository::new(pool));
        let reference = crate::payments::providers::wompi::generate_reference();
        let request = SettlementRequest {
            tenant_id,
            profile_id,
            reference: reference.clone(),
            amount: Decimal::from(10_000),
            currency: "COP".to_string(),
            method: "wompi".to_string(),
            description: format!("Online payment {}", reference),
        };

        let (a, b) = tokio::join!(repo.settle(request.clone()), repo.settle(request));
        let credited = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|s| matches!(s, Settlement::Credited(_)))
            .count();
        assert_eq!(credited, 1);
        assert_eq!(
            repo.balance(profile_id).await.unwrap(),
            Some(Decimal::from(10_000))
        );
    }
}
