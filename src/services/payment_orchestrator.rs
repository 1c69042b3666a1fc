//! Payment Orchestrator Service
//!
//! Owns the transaction state machine: starts payments, applies verified
//! gateway reports and credits the payer balance at most once per reference.

use crate::config::PaymentsConfig;
use crate::database::error::DatabaseError;
use crate::database::memory::InMemoryStore;
use crate::database::repository::{
    NewTransaction, PayerDirectory, Settlement, SettlementRequest, SettlementStore, StatusUpdate,
    TenantConfigStore, Transaction, TransactionStore,
};
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::payments::envelope::extract_reference;
use crate::payments::error::PaymentError;
use crate::payments::factory::GatewayRegistry;
use crate::payments::types::{
    from_minor_units, GatewayKind, IntentOptions, PaymentIntent, PaymentOutcome,
    TenantPaymentConfig, TransactionStatus,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Smallest payable amount, major units
    pub min_amount: Decimal,
    pub default_currency: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let payments = PaymentsConfig::default();
        Self::from(&payments)
    }
}

impl From<&PaymentsConfig> for OrchestratorConfig {
    fn from(config: &PaymentsConfig) -> Self {
        Self {
            min_amount: config.min_amount,
            default_currency: config.default_currency.clone(),
        }
    }
}

/// The stores the orchestrator reads and writes.
#[derive(Clone)]
pub struct PaymentStores {
    pub transactions: Arc<dyn TransactionStore>,
    pub settlements: Arc<dyn SettlementStore>,
    pub tenant_configs: Arc<dyn TenantConfigStore>,
    pub payers: Arc<dyn PayerDirectory>,
}

impl PaymentStores {
    pub fn in_memory(store: InMemoryStore) -> Self {
        Self {
            transactions: Arc::new(store.clone()),
            settlements: Arc::new(store.clone()),
            tenant_configs: Arc::new(store.clone()),
            payers: Arc::new(store),
        }
    }

    #[cfg(feature = "database")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use crate::database::{
            payer_repository::PayerRepository, settlement_repository::SettlementRepository,
            tenant_config_repository::TenantConfigRepository,
            transaction_repository::TransactionRepository,
        };

        Self {
            transactions: Arc::new(TransactionRepository::new(pool.clone())),
            settlements: Arc::new(SettlementRepository::new(pool.clone())),
            tenant_configs: Arc::new(TenantConfigRepository::new(pool.clone())),
            payers: Arc::new(PayerRepository::new(pool)),
        }
    }
}

// ============================================================================
// Request / Outcome Types
// ============================================================================

/// The authenticated caller, as established by the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
}

/// What happened to the balance when a status was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementState {
    /// The status is not APPROVED; nothing to credit.
    NotApplicable,
    Credited,
    AlreadySettled,
    /// The status was written but the credit failed; the reconciliation sweep retries it.
    Failed,
}

/// Result of handling one callback. The HTTP layer acknowledges all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackDisposition {
    /// No usable reference or fields; nothing changed.
    Malformed,
    UnknownReference { reference: String },
    /// The tenant's payment settings could not be used to verify the payload.
    Unverifiable { reference: String },
    InvalidSignature { reference: String },
    Applied {
        reference: String,
        status: TransactionStatus,
        settlement: SettlementState,
    },
    /// Storage failed before the status could be written.
    Failed { reference: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    pub transaction: Transaction,
    pub settlement: SettlementState,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("no payable profile for user {user_id} in tenant {tenant_id}")]
    ProfileNotFound { user_id: Uuid, tenant_id: Uuid },

    #[error("transaction not found: {reference}")]
    TransactionNotFound { reference: String },

    #[error("transaction {reference} cannot be reconciled: {reason}")]
    NotReconcilable { reference: String, reason: String },

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Payment(e) => e.into(),
            OrchestratorError::Database(e) => e.into(),
            OrchestratorError::ProfileNotFound { user_id, tenant_id } => {
                AppError::new(AppErrorKind::Domain(DomainError::ProfileNotFound {
                    user_id: user_id.to_string(),
                    tenant_id: tenant_id.to_string(),
                }))
            }
            OrchestratorError::TransactionNotFound { reference } => {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    reference,
                }))
            }
            OrchestratorError::NotReconcilable { reference, reason } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "reference".to_string(),
                    reason: format!("{} cannot be reconciled: {}", reference, reason),
                }))
            }
            OrchestratorError::Validation { field, message } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field,
                    reason: message,
                }))
            }
        }
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

// ============================================================================
// Main Payment Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    gateways: GatewayRegistry,
    stores: PaymentStores,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(gateways: GatewayRegistry, stores: PaymentStores, config: OrchestratorConfig) -> Self {
        Self {
            gateways,
            stores,
            config,
        }
    }

    pub fn stores(&self) -> &PaymentStores {
        &self.stores
    }

    /// Always reads the current settings document; a missing document means
    /// payments are not enabled.
    pub async fn load_tenant_config(&self, tenant_id: Uuid) -> OrchestratorResult<TenantPaymentConfig> {
        match self.stores.tenant_configs.load(tenant_id).await? {
            Some(settings) => Ok(TenantPaymentConfig::from_settings(tenant_id, settings)?),
            None => Ok(TenantPaymentConfig {
                tenant_id,
                ..Default::default()
            }),
        }
    }

    // =========================================================================
    // Start
    // =========================================================================

    /// Creates a checkout intent and the PENDING transaction behind it.
    ///
    /// A retry creates a new reference; nothing has been charged yet.
    pub async fn start_payment(
        &self,
        principal: &Principal,
        amount: Decimal,
        currency: Option<&str>,
        options: IntentOptions,
    ) -> OrchestratorResult<PaymentIntent> {
        if amount < self.config.min_amount {
            return Err(OrchestratorError::Validation {
                field: "amount".to_string(),
                message: format!("must be at least {}", self.config.min_amount),
            });
        }
        let currency = currency
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.config.default_currency.clone());

        let payer = self
            .stores
            .payers
            .resolve(principal.tenant_id, principal.user_id)
            .await?
            .ok_or(OrchestratorError::ProfileNotFound {
                user_id: principal.user_id,
                tenant_id: principal.tenant_id,
            })?;

        let tenant = self.load_tenant_config(principal.tenant_id).await?;
        let gateway = self.gateways.for_tenant(&tenant)?;
        let intent = gateway
            .create_intent(amount, &currency, &payer, &tenant, &options)
            .await?;

        let transaction = self
            .stores
            .transactions
            .insert(NewTransaction {
                tenant_id: principal.tenant_id,
                profile_id: payer.profile_id,
                user_id: principal.user_id,
                reference: intent.reference.clone(),
                amount: from_minor_units(intent.amount_in_cents),
                currency: intent.currency.clone(),
                gateway: gateway.kind().to_string(),
                metadata: json!({ "intent": intent, "events": [] }),
            })
            .await?;

        info!(
            reference = %transaction.reference,
            tenant_id = %transaction.tenant_id,
            profile_id = %transaction.profile_id,
            amount = %transaction.amount,
            currency = %transaction.currency,
            gateway = %transaction.gateway,
            "payment started"
        );
        Ok(intent)
    }

    // =========================================================================
    // Callback
    // =========================================================================

    /// Processes a gateway callback. Never fails: every outcome is logged and
    /// reported as a disposition so the caller can acknowledge the gateway.
    pub async fn handle_callback(&self, payload: &JsonValue) -> CallbackDisposition {
        let Some(reference) = extract_reference(payload) else {
            warn!("callback without a usable reference ignored");
            return CallbackDisposition::Malformed;
        };

        let transaction = match self.stores.transactions.find_by_reference(&reference).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                warn!(reference = %reference, "callback for unknown reference ignored");
                return CallbackDisposition::UnknownReference { reference };
            }
            Err(e) => {
                error!(reference = %reference, error = %e, "failed to load transaction for callback");
                return CallbackDisposition::Failed { reference };
            }
        };

        let outcome = match self.verify_callback(&transaction, payload).await {
            Ok(outcome) => outcome,
            Err(disposition) => return disposition,
        };

        match self.apply_outcome(&transaction, outcome, "callback").await {
            Ok((updated, settlement)) => CallbackDisposition::Applied {
                reference,
                status: updated.status,
                settlement,
            },
            Err(e) => {
                error!(reference = %reference, error = %e, "failed to record callback outcome");
                CallbackDisposition::Failed { reference }
            }
        }
    }

    async fn verify_callback(
        &self,
        transaction: &Transaction,
        payload: &JsonValue,
    ) -> Result<PaymentOutcome, CallbackDisposition> {
        let reference = transaction.reference.clone();

        let tenant = match self.load_tenant_config(transaction.tenant_id).await {
            Ok(tenant) => tenant,
            Err(e) => {
                error!(reference = %reference, tenant_id = %transaction.tenant_id, error = %e, "tenant payment settings unusable");
                return Err(CallbackDisposition::Unverifiable { reference });
            }
        };
        let gateway = match self.gateway_for(transaction) {
            Ok(gateway) => gateway,
            Err(e) => {
                error!(reference = %reference, gateway = %transaction.gateway, error = %e, "no gateway for transaction");
                return Err(CallbackDisposition::Unverifiable { reference });
            }
        };

        match gateway.validate_callback(payload, &tenant) {
            Ok(outcome) if outcome.reference == reference => Ok(outcome),
            Ok(outcome) => {
                warn!(reference = %reference, reported = %outcome.reference, "callback reference mismatch");
                Err(CallbackDisposition::Malformed)
            }
            Err(PaymentError::InvalidSignature { message }) => {
                warn!(
                    security_event = true,
                    reference = %reference,
                    tenant_id = %transaction.tenant_id,
                    reason = %message,
                    "callback signature rejected"
                );
                Err(CallbackDisposition::InvalidSignature { reference })
            }
            Err(PaymentError::MalformedResponse { message }) => {
                warn!(reference = %reference, reason = %message, "malformed callback ignored");
                Err(CallbackDisposition::Malformed)
            }
            Err(e) => {
                error!(reference = %reference, error = %e, "callback could not be verified");
                Err(CallbackDisposition::Unverifiable { reference })
            }
        }
    }

    fn gateway_for(
        &self,
        transaction: &Transaction,
    ) -> Result<Arc<dyn crate::payments::gateway::PaymentGateway>, PaymentError> {
        self.gateways.get(GatewayKind::from_str(&transaction.gateway)?)
    }

    /// Writes the reported status, then settles if it is APPROVED.
    ///
    /// The status write happens first so a crash before the credit leaves an
    /// APPROVED transaction without a payment record, which the sweep repairs.
    /// Reports that may not move the status are still kept as events.
    async fn apply_outcome(
        &self,
        transaction: &Transaction,
        outcome: PaymentOutcome,
        source: &str,
    ) -> Result<(Transaction, SettlementState), DatabaseError> {
        let provisional = outcome.is_provisional();
        if transaction
            .status
            .keeps_status_on(outcome.status, provisional)
        {
            info!(
                reference = %transaction.reference,
                current = %transaction.status,
                reported = %outcome.gateway_status,
                source,
                "late gateway report recorded without status change"
            );
        } else if transaction.status.is_terminal() && transaction.status != outcome.status {
            warn!(
                reference = %transaction.reference,
                from = %transaction.status,
                to = %outcome.status,
                "terminal status corrected by verified gateway report"
            );
        }

        if outcome.status == TransactionStatus::Approved
            && (outcome.amount != transaction.amount || outcome.currency != transaction.currency)
        {
            warn!(
                reference = %transaction.reference,
                requested = %transaction.amount,
                approved = %outcome.amount,
                requested_currency = %transaction.currency,
                approved_currency = %outcome.currency,
                "approved amount differs from requested amount"
            );
        }

        let event = json!({
            "source": source,
            "received_at": Utc::now().to_rfc3339(),
            "status": outcome.status,
            "gateway_status": outcome.gateway_status,
            "amount": outcome.amount,
            "payload": outcome.raw,
        });
        let updated = self
            .stores
            .transactions
            .record_outcome(
                &transaction.reference,
                StatusUpdate {
                    status: outcome.status,
                    external_id: Some(outcome.external_id.clone()),
                    provisional,
                    event,
                },
            )
            .await?;

        info!(
            reference = %updated.reference,
            external_id = %outcome.external_id,
            status = %updated.status,
            source,
            "transaction status recorded"
        );

        if updated.status != TransactionStatus::Approved
            || outcome.status != TransactionStatus::Approved
        {
            return Ok((updated, SettlementState::NotApplicable));
        }

        let settlement = self.settle(&updated, outcome.amount).await;
        Ok((updated, settlement))
    }

    /// Idempotent credit. Storage decides the winner among concurrent callers.
    async fn settle(&self, transaction: &Transaction, amount: Decimal) -> SettlementState {
        let request = SettlementRequest {
            tenant_id: transaction.tenant_id,
            profile_id: transaction.profile_id,
            reference: transaction.reference.clone(),
            amount,
            currency: transaction.currency.clone(),
            method: transaction.gateway.clone(),
            description: format!(
                "Online payment via {} (ref {})",
                transaction.gateway, transaction.reference
            ),
        };

        match self.stores.settlements.settle(request).await {
            Ok(Settlement::Credited(record)) => {
                info!(
                    reference = %record.reference,
                    profile_id = %record.profile_id,
                    amount = %record.amount,
                    "payer balance credited"
                );
                SettlementState::Credited
            }
            Ok(Settlement::AlreadySettled) => {
                debug!(reference = %transaction.reference, "already settled, credit skipped");
                SettlementState::AlreadySettled
            }
            Err(e) => {
                error!(
                    reference = %transaction.reference,
                    profile_id = %transaction.profile_id,
                    error = %e,
                    "settlement failed after status write"
                );
                SettlementState::Failed
            }
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Brings one transaction in line with the gateway.
    ///
    /// APPROVED transactions are only re-settled. Others are looked up by
    /// external id and the answer goes through the same path as a callback.
    pub async fn reconcile(&self, reference: &str) -> OrchestratorResult<Reconciliation> {
        let transaction = self
            .stores
            .transactions
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| OrchestratorError::TransactionNotFound {
                reference: reference.to_string(),
            })?;

        if transaction.status == TransactionStatus::Approved {
            let amount = approved_amount(&transaction);
            let settlement = self.settle(&transaction, amount).await;
            return Ok(Reconciliation {
                transaction,
                settlement,
            });
        }

        let external_id = transaction.external_id.clone().ok_or_else(|| {
            OrchestratorError::NotReconcilable {
                reference: reference.to_string(),
                reason: "gateway transaction id not known yet".to_string(),
            }
        })?;

        let tenant = self.load_tenant_config(transaction.tenant_id).await?;
        let gateway = self.gateway_for(&transaction)?;
        let outcome = gateway.query_status(&external_id, &tenant).await?;
        if outcome.reference != transaction.reference {
            return Err(PaymentError::malformed(format!(
                "status lookup for {} returned reference {}",
                external_id, outcome.reference
            ))
            .into());
        }

        let (transaction, settlement) = self
            .apply_outcome(&transaction, outcome, "status_query")
            .await?;
        Ok(Reconciliation {
            transaction,
            settlement,
        })
    }

    /// Marks an abandoned PENDING checkout as ERROR. A later verified callback
    /// still corrects it.
    pub async fn expire_abandoned(&self, transaction: &Transaction) -> OrchestratorResult<bool> {
        let expired = self
            .stores
            .transactions
            .expire_if_pending(
                &transaction.reference,
                json!({
                    "source": "reconciliation",
                    "received_at": Utc::now().to_rfc3339(),
                    "status": TransactionStatus::Error,
                    "reason": "expired",
                }),
            )
            .await?;
        if expired {
            info!(
                reference = %transaction.reference,
                created_at = %transaction.created_at,
                "abandoned checkout expired"
            );
        }
        Ok(expired)
    }
}

/// The amount the gateway approved, from the latest APPROVED event, falling
/// back to the requested amount.
fn approved_amount(transaction: &Transaction) -> Decimal {
    transaction
        .metadata
        .get("events")
        .and_then(|e| e.as_array())
        .and_then(|events| {
            events
                .iter()
                .rev()
                .find(|e| e.get("status").and_then(|s| s.as_str()) == Some("APPROVED"))
        })
        .and_then(|e| e.get("amount"))
        .and_then(|a| serde_json::from_value::<Decimal>(a.clone()).ok())
        .unwrap_or(transaction.amount)
}

// ============================================================================
// Tests
// ============================================================================
