//! Store traits the orchestrator depends on, plus the entities they exchange.
//!
//! Postgres implementations live in the `*_repository` modules (feature
//! `database`); [`crate::database::memory::InMemoryStore`] implements every
//! trait without a database.

use crate::database::error::DatabaseError;
use crate::payments::types::{Payer, TransactionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Durable record of one payment attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub profile_id: Uuid,
    pub user_id: Uuid,
    pub reference: String,
    pub external_id: Option<String>,
    /// Requested amount in major units
    pub amount: Decimal,
    pub currency: String,
    pub gateway: String,
    pub status: TransactionStatus,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub tenant_id: Uuid,
    pub profile_id: Uuid,
    pub user_id: Uuid,
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub gateway: String,
    pub metadata: JsonValue,
}

/// A status write. `event` is appended to `metadata.events` even when the
/// stored status is kept (see [`TransactionStatus::keeps_status_on`]).
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: TransactionStatus,
    pub external_id: Option<String>,
    /// The gateway had not reached a final state when it reported.
    pub provisional: bool,
    pub event: JsonValue,
}

/// Human-facing receipt, one per settled reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub profile_id: Uuid,
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub description: String,
    pub status: String,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SettlementRequest {
    pub tenant_id: Uuid,
    pub profile_id: Uuid,
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// This call created the payment record and incremented the balance.
    Credited(PaymentRecord),
    /// A payment record for the reference already existed; nothing was changed.
    AlreadySettled,
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Fails with `UniqueViolation` if the reference already exists.
    async fn insert(&self, transaction: NewTransaction) -> Result<Transaction, DatabaseError>;

    async fn find_by_reference(&self, reference: &str)
        -> Result<Option<Transaction>, DatabaseError>;

    /// Applies the update atomically. An APPROVED transaction stays APPROVED
    /// and a provisional report does not replace a terminal status.
    async fn record_outcome(
        &self,
        reference: &str,
        update: StatusUpdate,
    ) -> Result<Transaction, DatabaseError>;

    /// Moves a PENDING transaction to ERROR. Returns false when it is no longer PENDING.
    async fn expire_if_pending(&self, reference: &str, event: JsonValue)
        -> Result<bool, DatabaseError>;

    /// PENDING transactions created before `older_than`, oldest first.
    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError>;

    /// Non-APPROVED transactions with a gateway id whose latest event carried a
    /// provisional gateway status, last touched before `stale_before` and
    /// created after `created_after`. Least recently touched first.
    async fn find_awaiting_gateway(
        &self,
        stale_before: DateTime<Utc>,
        created_after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError>;

    /// APPROVED transactions that have no payment record yet.
    async fn find_unsettled_approved(&self, limit: i64) -> Result<Vec<Transaction>, DatabaseError>;
}

/// Payment records and the payer balance they credit.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Atomically inserts the payment record if none exists for the reference
    /// and, only in that case, increments the payer balance by `amount`.
    async fn settle(&self, request: SettlementRequest) -> Result<Settlement, DatabaseError>;

    async fn find_record(&self, reference: &str) -> Result<Option<PaymentRecord>, DatabaseError>;

    async fn balance(&self, profile_id: Uuid) -> Result<Option<Decimal>, DatabaseError>;
}

/// Source of the tenant payment settings document. Always reads through; never cache.
#[async_trait]
pub trait TenantConfigStore: Send + Sync {
    async fn load(&self, tenant_id: Uuid) -> Result<Option<JsonValue>, DatabaseError>;
}

#[async_trait]
pub trait PayerDirectory: Send + Sync {
    /// The payable profile of `user_id` under `tenant_id`, if any.
    async fn resolve(&self, tenant_id: Uuid, user_id: Uuid)
        -> Result<Option<Payer>, DatabaseError>;
}
