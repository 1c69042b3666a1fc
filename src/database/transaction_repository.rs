use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{NewTransaction, StatusUpdate, TransactionStore};
use crate::payments::types::TransactionStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

pub use crate::database::repository::Transaction;

const COLUMNS: &str = "id, tenant_id, profile_id, user_id, reference, external_id, amount, \
                       currency, gateway, status, metadata, created_at, updated_at";

/// SQL form of `TransactionStatus::keeps_status_on` for `record_outcome`
/// ($2 reported status, $5 provisional).
const KEEPS_STATUS: &str =
    "((status = 'APPROVED' AND $2 <> 'APPROVED') OR ($5 AND status <> 'PENDING'))";

/// Row shape of `payment_transactions`
#[derive(Debug, Clone, FromRow)]
struct TransactionRow {
    id: Uuid,
    tenant_id: Uuid,
    profile_id: Uuid,
    user_id: Uuid,
    reference: String,
    external_id: Option<String>,
    amount: Decimal,
    currency: String,
    gateway: String,
    status: String,
    metadata: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let status = TransactionStatus::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::Query {
                message: format!(
                    "transaction {} has unknown status '{}'",
                    row.reference, row.status
                ),
            })
        })?;
        Ok(Transaction {
            id: row.id,
            tenant_id: row.tenant_id,
            profile_id: row.profile_id,
            user_id: row.user_id,
            reference: row.reference,
            external_id: row.external_id,
            amount: row.amount,
            currency: row.currency,
            gateway: row.gateway,
            status,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_transactions(rows: Vec<TransactionRow>) -> Result<Vec<Transaction>, DatabaseError> {
    rows.into_iter().map(Transaction::try_from).collect()
}

/// Repository for payment transactions
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for TransactionRepository {
    async fn insert(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO payment_transactions
             (tenant_id, profile_id, user_id, reference, amount, currency, gateway, status, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING', $8)
             RETURNING {}",
            COLUMNS
        ))
        .bind(new.tenant_id)
        .bind(new.profile_id)
        .bind(new.user_id)
        .bind(&new.reference)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(&new.gateway)
        .bind(&new.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.try_into()
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM payment_transactions WHERE reference = $1",
            COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Transaction::try_from)
        .transpose()
    }

    /// Writes status and external id, appending the event to `metadata.events`.
    ///
    /// The keep rule is evaluated against the row as locked by the UPDATE, so
    /// a concurrent late report cannot move an APPROVED transaction.
    async fn record_outcome(
        &self,
        reference: &str,
        update: StatusUpdate,
    ) -> Result<Transaction, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE payment_transactions
             SET status = CASE WHEN {keep} THEN status ELSE $2 END,
                 external_id = CASE WHEN {keep}
                     THEN COALESCE(external_id, $3)
                     ELSE COALESCE($3, external_id) END,
                 metadata = jsonb_set(
                     metadata,
                     '{{events}}',
                     COALESCE(metadata->'events', '[]'::jsonb) || jsonb_build_array($4::jsonb)
                 ),
                 updated_at = NOW()
             WHERE reference = $1
             RETURNING {columns}",
            keep = KEEPS_STATUS,
            columns = COLUMNS
        ))
        .bind(reference)
        .bind(update.status.as_str())
        .bind(update.external_id.as_deref())
        .bind(&update.event)
        .bind(update.provisional)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("Transaction", reference))?;

        row.try_into()
    }

    async fn expire_if_pending(
        &self,
        reference: &str,
        event: JsonValue,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payment_transactions
             SET status = 'ERROR',
                 metadata = jsonb_set(
                     metadata,
                     '{events}',
                     COALESCE(metadata->'events', '[]'::jsonb) || jsonb_build_array($2::jsonb)
                 ),
                 updated_at = NOW()
             WHERE reference = $1 AND status = 'PENDING'",
        )
        .bind(reference)
        .bind(&event)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM payment_transactions
             WHERE status = 'PENDING' AND created_at < $1
             ORDER BY created_at ASC
             LIMIT $2",
            COLUMNS
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_transactions(rows)
    }

    async fn find_awaiting_gateway(
        &self,
        stale_before: DateTime<Utc>,
        created_after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM payment_transactions
             WHERE status <> 'APPROVED'
               AND external_id IS NOT NULL
               AND metadata->'events'->-1->>'gateway_status'
                   NOT IN ('APPROVED', 'DECLINED', 'VOIDED', 'ERROR')
               AND updated_at < $1
               AND created_at > $2
             ORDER BY updated_at ASC
             LIMIT $3",
            COLUMNS
        ))
        .bind(stale_before)
        .bind(created_after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_transactions(rows)
    }

    async fn find_unsettled_approved(&self, limit: i64) -> Result<Vec<Transaction>, DatabaseError> {
        let columns = COLUMNS
            .split(", ")
            .map(|c| format!("t.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM payment_transactions t
             LEFT JOIN payment_records r ON r.reference = t.reference
             WHERE t.status = 'APPROVED' AND r.id IS NULL
             ORDER BY t.updated_at ASC
             LIMIT $1",
            columns
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_transactions(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(status: &str) -> TransactionRow {
        TransactionRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            profile_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            reference: "PAY-1".to_string(),
            external_id: None,
            amount: Decimal::from(10_000),
            currency: "COP".to_string(),
            gateway: "wompi".to_string(),
            status: status.to_string(),
            metadata: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn stored_status_is_parsed_strictly() {
        let tx = Transaction::try_from(row("DECLINED")).unwrap();
        assert_eq!(tx.status, TransactionStatus::Declined);
        assert!(Transaction::try_from(row("paid")).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires database running
    async fn insert_and_find_round_trip() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::database::init_pool(&url, None).await.unwrap();
        let repo = TransactionRepository::new(pool);

        let reference = crate::payments::providers::wompi::generate_reference();
        let created = repo
            .insert(NewTransaction {
                tenant_id: Uuid::new_v4(),
                profile_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                reference: reference.clone(),
                amount: Decimal::from(10_000),
                currency: "COP".to_string(),
                gateway: "wompi".to_string(),
                metadata: json!({"intent": {}}),
            })
            .await
            .unwrap();
        assert_eq!(created.status, TransactionStatus::Pending);

        let found = repo.find_by_reference(&reference).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    #[ignore] // Requires database running
    async fn approved_row_survives_late_reports() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::database::init_pool(&url, None).await.unwrap();
        let repo = TransactionRepository::new(pool);

        let reference = crate::payments::providers::wompi::generate_reference();
        repo.insert(NewTransaction {
            tenant_id: Uuid::new_v4(),
            profile_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            reference: reference.clone(),
            amount: Decimal::from(10_000),
            currency: "COP".to_string(),
            gateway: "wompi".to_string(),
            metadata: json!({"intent": {}}),
        })
        .await
        .unwrap();

        let report = |status, provisional| StatusUpdate {
            status,
            external_id: Some("ext-1".to_string()),
            provisional,
            event: json!({"source": "callback"}),
        };
        repo.record_outcome(&reference, report(TransactionStatus::Approved, false))
            .await
            .unwrap();
        repo.record_outcome(&reference, report(TransactionStatus::Error, true))
            .await
            .unwrap();
        let tx = repo
            .record_outcome(&reference, report(TransactionStatus::Declined, false))
            .await
            .unwrap();

        assert_eq!(tx.status, TransactionStatus::Approved);
        assert_eq!(tx.metadata["events"].as_array().unwrap().len(), 3);
    }
}
