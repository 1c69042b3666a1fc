use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    NewTransaction, PayerDirectory, PaymentRecord, Settlement, SettlementRequest, SettlementStore,
    StatusUpdate, TenantConfigStore, Transaction, TransactionStore,
};
use crate::payments::types::{Payer, TransactionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct PayerProfile {
    payer: Payer,
    balance: Decimal,
}

#[derive(Default)]
struct State {
    transactions: HashMap<String, Transaction>,
    records: HashMap<String, PaymentRecord>,
    profiles: HashMap<Uuid, PayerProfile>,
    tenant_settings: HashMap<Uuid, JsonValue>,
}

/// Process-local store with the same uniqueness guarantees as the Postgres schema.
///
/// Every operation takes the single state lock, so `settle` is atomic across
/// concurrent callers.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_payer(&self, payer: Payer, balance: Decimal) {
        let mut state = self.state.lock().await;
        state
            .profiles
            .insert(payer.profile_id, PayerProfile { payer, balance });
    }

    pub async fn put_tenant_settings(&self, tenant_id: Uuid, settings: JsonValue) {
        self.state
            .lock()
            .await
            .tenant_settings
            .insert(tenant_id, settings);
    }

    pub async fn payment_records(&self) -> Vec<PaymentRecord> {
        self.state.lock().await.records.values().cloned().collect()
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        self.state
            .lock()
            .await
            .transactions
            .values()
            .cloned()
            .collect()
    }

    /// Rewrites `created_at` and `updated_at`, for exercising age-based sweeps.
    pub async fn backdate(&self, reference: &str, at: DateTime<Utc>) {
        if let Some(tx) = self.state.lock().await.transactions.get_mut(reference) {
            tx.created_at = at;
            tx.updated_at = at;
        }
    }
}

fn append_event(metadata: &mut JsonValue, event: JsonValue) {
    if !metadata.is_object() {
        *metadata = json!({});
    }
    if let Some(map) = metadata.as_object_mut() {
        let events = map.entry("events").or_insert_with(|| json!([]));
        match events.as_array_mut() {
            Some(list) => list.push(event),
            None => *events = json!([event]),
        }
    }
}

fn latest_gateway_status(metadata: &JsonValue) -> Option<&str> {
    metadata["events"].as_array()?.last()?["gateway_status"].as_str()
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn insert(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let mut state = self.state.lock().await;
        if state.transactions.contains_key(&new.reference) {
            return Err(DatabaseError::unique_violation(
                "payment_transactions_reference_key",
            ));
        }
        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            profile_id: new.profile_id,
            user_id: new.user_id,
            reference: new.reference.clone(),
            external_id: None,
            amount: new.amount,
            currency: new.currency,
            gateway: new.gateway,
            status: TransactionStatus::Pending,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };
        state.transactions.insert(new.reference, transaction.clone());
        Ok(transaction)
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        Ok(self.state.lock().await.transactions.get(reference).cloned())
    }

    async fn record_outcome(
        &self,
        reference: &str,
        update: StatusUpdate,
    ) -> Result<Transaction, DatabaseError> {
        let mut state = self.state.lock().await;
        let tx = state
            .transactions
            .get_mut(reference)
            .ok_or_else(|| DatabaseError::not_found("Transaction", reference))?;
        if tx
            .status
            .keeps_status_on(update.status, update.provisional)
        {
            if tx.external_id.is_none() {
                tx.external_id = update.external_id;
            }
        } else {
            tx.status = update.status;
            if update.external_id.is_some() {
                tx.external_id = update.external_id;
            }
        }
        append_event(&mut tx.metadata, update.event);
        tx.updated_at = Utc::now();
        Ok(tx.clone())
    }

    async fn expire_if_pending(
        &self,
        reference: &str,
        event: JsonValue,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().await;
        match state.transactions.get_mut(reference) {
            Some(tx) if tx.status == TransactionStatus::Pending => {
                tx.status = TransactionStatus::Error;
                append_event(&mut tx.metadata, event);
                tx.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let state = self.state.lock().await;
        let mut stale: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Pending && tx.created_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|tx| tx.created_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn find_awaiting_gateway(
        &self,
        stale_before: DateTime<Utc>,
        created_after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let state = self.state.lock().await;
        let mut waiting: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| {
                tx.status != TransactionStatus::Approved
                    && tx.external_id.is_some()
                    && latest_gateway_status(&tx.metadata)
                        .is_some_and(|s| !TransactionStatus::is_final_gateway_status(s))
                    && tx.updated_at < stale_before
                    && tx.created_at > created_after
            })
            .cloned()
            .collect();
        waiting.sort_by_key(|tx| tx.updated_at);
        waiting.truncate(limit.max(0) as usize);
        Ok(waiting)
    }

    async fn find_unsettled_approved(&self, limit: i64) -> Result<Vec<Transaction>, DatabaseError> {
        let state = self.state.lock().await;
        let mut unsettled: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| {
                tx.status == TransactionStatus::Approved && !state.records.contains_key(&tx.reference)
            })
            .cloned()
            .collect();
        unsettled.sort_by_key(|tx| tx.updated_at);
        unsettled.truncate(limit.max(0) as usize);
        Ok(unsettled)
    }
}

#[async_trait]
impl SettlementStore for InMemoryStore {
    async fn settle(&self, request: SettlementRequest) -> Result<Settlement, DatabaseError> {
        let mut state = self.state.lock().await;
        if state.records.contains_key(&request.reference) {
            return Ok(Settlement::AlreadySettled);
        }

        let profile = state.profiles.get_mut(&request.profile_id).ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "PayerProfile".to_string(),
                id: request.profile_id.to_string(),
            })
        })?;
        profile.balance += request.amount;

        let record = PaymentRecord {
            id: Uuid::new_v4(),
            tenant_id: request.tenant_id,
            profile_id: request.profile_id,
            reference: request.reference.clone(),
            amount: request.amount,
            currency: request.currency,
            method: request.method,
            description: request.description,
            status: "COMPLETED".to_string(),
            paid_at: Utc::now(),
        };
        state.records.insert(request.reference, record.clone());
        Ok(Settlement::Credited(record))
    }

    async fn find_record(&self, reference: &str) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self.state.lock().await.records.get(reference).cloned())
    }

    async fn balance(&self, profile_id: Uuid) -> Result<Option<Decimal>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .await
            .profiles
            .get(&profile_id)
            .map(|p| p.balance))
    }
}

#[async_trait]
impl TenantConfigStore for InMemoryStore {
    async fn load(&self, tenant_id: Uuid) -> Result<Option<JsonValue>, DatabaseError> {
        Ok(self.state.lock().await.tenant_settings.get(&tenant_id).cloned())
    }
}

#[async_trait]
impl PayerDirectory for InMemoryStore {
    async fn resolve(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<Payer>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .await
            .profiles
            .values()
            .find(|p| p.payer.tenant_id == tenant_id && p.payer.user_id == user_id)
            .map(|p| p.payer.clone()))
    }
}
