//! Development-only callback simulator.
//!
//! Builds a correctly signed gateway event for an existing transaction and
//! feeds it through the normal callback path. Only mounted when
//! `PAYMENTS_ENABLE_SIMULATION=true`.

use crate::payments::envelope::GatewayTransaction;
use crate::payments::error::{ConfigurationIssue, PaymentError};
use crate::payments::providers::wompi::signed_event;
use crate::payments::types::{to_minor_units, GatewayKind, TransactionStatus};
use crate::services::payment_orchestrator::{
    CallbackDisposition, OrchestratorError, OrchestratorResult, PaymentOrchestrator,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationRequest {
    pub reference: String,
    /// Gateway status to report; APPROVED when omitted.
    #[serde(default)]
    pub status: Option<String>,
    /// Overrides the reported amount, to exercise the mismatch warning.
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct SimulatedCallback {
    pub payload: JsonValue,
    pub disposition: CallbackDisposition,
}

pub struct CallbackSimulator {
    orchestrator: Arc<PaymentOrchestrator>,
}

impl CallbackSimulator {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn simulate(&self, request: SimulationRequest) -> OrchestratorResult<SimulatedCallback> {
        let transaction = self
            .orchestrator
            .stores()
            .transactions
            .find_by_reference(&request.reference)
            .await?
            .ok_or_else(|| OrchestratorError::TransactionNotFound {
                reference: request.reference.clone(),
            })?;

        let tenant = self
            .orchestrator
            .load_tenant_config(transaction.tenant_id)
            .await?;

        let payload = match GatewayKind::from_str(&transaction.gateway)? {
            GatewayKind::Wompi => {
                let events_secret = tenant
                    .wompi
                    .as_ref()
                    .and_then(|w| w.events_secret.as_deref())
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| {
                        PaymentError::configuration(ConfigurationIssue::MissingCredentials {
                            gateway: "wompi".to_string(),
                            field: "eventsSecret".to_string(),
                        })
                    })?;

                let status = request
                    .status
                    .as_deref()
                    .unwrap_or(TransactionStatus::Approved.as_str())
                    .trim()
                    .to_uppercase();
                let external_id = transaction
                    .external_id
                    .clone()
                    .unwrap_or_else(|| format!("SIM-{}", Uuid::new_v4().simple()));
                let amount_in_cents =
                    to_minor_units(request.amount.unwrap_or(transaction.amount))?;

                signed_event(
                    &GatewayTransaction {
                        id: external_id,
                        status,
                        reference: transaction.reference.clone(),
                        amount_in_cents,
                        currency: transaction.currency.clone(),
                    },
                    Utc::now().timestamp(),
                    events_secret,
                )
            }
        };

        let disposition = self.orchestrator.handle_callback(&payload).await;
        info!(
            reference = %transaction.reference,
            disposition = ?disposition,
            "simulated callback processed"
        );

        Ok(SimulatedCallback {
            payload,
            disposition,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;
    use crate::database::repository::SettlementStore;
    use crate::payments::factory::GatewayRegistry;
    use crate::payments::providers::WompiSettings;
    use crate::payments::types::{IntentOptions, Payer};
    use crate::services::payment_orchestrator::{
        OrchestratorConfig, PaymentStores, Principal, SettlementState,
    };
    use serde_json::json;

    async fn setup(events_secret: Option<&str>) -> (InMemoryStore, Arc<PaymentOrchestrator>, Principal, Uuid) {
        let store = InMemoryStore::new();
        let principal = Principal {
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        };
        let profile_id = Uuid::new_v4();
        store
            .add_payer(
                Payer {
                    user_id: principal.user_id,
                    profile_id,
                    tenant_id: principal.tenant_id,
                    email: None,
                    full_name: None,
                },
                Decimal::ZERO,
            )
            .await;
        store
            .put_tenant_settings(
                principal.tenant_id,
                json!({
                    "enableOnlinePayments": true,
                    "wompi": {
                        "pubKey": "pub_test_sim",
                        "integritySecret": "integrity",
                        "eventsSecret": events_secret,
                        "isSandbox": true
                    }
                }),
            )
            .await;

        let orchestrator = Arc::new(PaymentOrchestrator::new(
            GatewayRegistry::with_wompi(WompiSettings {
                require_signed_callbacks: false,
                ..WompiSettings::default()
            })
            .unwrap(),
            PaymentStores::in_memory(store.clone()),
            OrchestratorConfig::default(),
        ));
        (store, orchestrator, principal, profile_id)
    }

    #[tokio::test]
    async fn simulated_approval_credits_balance() {
        let (store, orchestrator, principal, profile_id) = setup(Some("events")).await;
        let intent = orchestrator
            .start_payment(&principal, Decimal::from(25_000), None, IntentOptions::default())
            .await
            .unwrap();

        let simulator = CallbackSimulator::new(orchestrator);
        let result = simulator
            .simulate(SimulationRequest {
                reference: intent.reference.clone(),
                status: None,
                amount: None,
            })
            .await
            .unwrap();

        assert!(result.payload["signature"]["checksum"].is_string());
        assert!(matches!(
            result.disposition,
            CallbackDisposition::Applied {
                status: TransactionStatus::Approved,
                settlement: SettlementState::Credited,
                ..
            }
        ));
        assert_eq!(
            store.balance(profile_id).await.unwrap(),
            Some(Decimal::from(25_000))
        );
    }

    #[tokio::test]
    async fn simulation_requires_events_secret() {
        let (_store, orchestrator, principal, _) = setup(None).await;
        let intent = orchestrator
            .start_payment(&principal, Decimal::from(25_000), None, IntentOptions::default())
            .await
            .unwrap();

        let err = CallbackSimulator::new(orchestrator)
            .simulate(SimulationRequest {
                reference: intent.reference,
                status: Some("declined".to_string()),
                amount: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Payment(PaymentError::Configuration { .. })));
    }

    #[tokio::test]
    async fn unknown_reference_is_not_found() {
        let (_store, orchestrator, _, _) = setup(Some("events")).await;
        let err = CallbackSimulator::new(orchestrator)
            .simulate(SimulationRequest {
                reference: "PAY-0-00000000".to_string(),
                status: None,
                amount: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::TransactionNotFound { .. }));
    }
}
