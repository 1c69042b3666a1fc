use crate::payments::error::PaymentResult;
use crate::payments::types::{
    GatewayKind, IntentOptions, Payer, PaymentIntent, PaymentOutcome, TenantPaymentConfig,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

/// The three operations the orchestrator needs from a payment gateway.
///
/// Each provider implements this directly; providers share no state.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    /// Builds the checkout intent. `amount` is in major units; the returned
    /// intent carries minor units.
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        payer: &Payer,
        tenant: &TenantPaymentConfig,
        options: &IntentOptions,
    ) -> PaymentResult<PaymentIntent>;

    /// Verifies and parses an inbound callback payload.
    fn validate_callback(
        &self,
        payload: &JsonValue,
        tenant: &TenantPaymentConfig,
    ) -> PaymentResult<PaymentOutcome>;

    /// Reads the gateway's current view of a transaction. A pure read, safe to retry.
    async fn query_status(
        &self,
        external_id: &str,
        tenant: &TenantPaymentConfig,
    ) -> PaymentResult<PaymentOutcome>;
}
