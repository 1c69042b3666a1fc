use crate::payments::envelope::{CallbackEnvelope, GatewayTransaction};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::signature::{checkout_signature, event_signature, verify_event_signature};
use crate::payments::types::{
    from_minor_units, to_minor_units, GatewayKind, IntentOptions, Payer, PaymentIntent,
    PaymentOutcome, TenantPaymentConfig, TransactionStatus, WompiCredentials,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const GATEWAY: &str = "wompi";

#[derive(Debug, Clone)]
pub struct WompiSettings {
    pub checkout_url: String,
    pub sandbox_api_url: String,
    pub production_api_url: String,
    pub timeout_secs: u64,
    /// Reject callbacks that cannot be verified instead of trusting them.
    pub require_signed_callbacks: bool,
}

impl Default for WompiSettings {
    fn default() -> Self {
        Self {
            checkout_url: "https://checkout.wompi.co/p/".to_string(),
            sandbox_api_url: "https://sandbox.wompi.co/v1".to_string(),
            production_api_url: "https://production.wompi.co/v1".to_string(),
            timeout_secs: 5,
            require_signed_callbacks: true,
        }
    }
}

impl WompiSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            checkout_url: std::env::var("WOMPI_CHECKOUT_URL").unwrap_or(defaults.checkout_url),
            sandbox_api_url: std::env::var("WOMPI_SANDBOX_API_URL")
                .unwrap_or(defaults.sandbox_api_url),
            production_api_url: std::env::var("WOMPI_PRODUCTION_API_URL")
                .unwrap_or(defaults.production_api_url),
            timeout_secs: std::env::var("WOMPI_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            require_signed_callbacks: std::env::var("PAYMENTS_REQUIRE_SIGNED_CALLBACKS")
                .ok()
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(defaults.require_signed_callbacks),
        }
    }
}

/// Credentials that passed the completeness check.
struct CheckoutCredentials<'a> {
    public_key: &'a str,
    integrity_secret: &'a str,
}

pub struct WompiGateway {
    settings: WompiSettings,
    http: PaymentHttpClient,
}

impl WompiGateway {
    pub fn new(settings: WompiSettings) -> PaymentResult<Self> {
        // Status lookups are single attempts; callers own retry and backoff.
        let http = PaymentHttpClient::new(Duration::from_secs(settings.timeout_secs))?;
        Ok(Self { settings, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(WompiSettings::from_env())
    }

    fn credentials(tenant: &TenantPaymentConfig) -> PaymentResult<&WompiCredentials> {
        tenant
            .wompi
            .as_ref()
            .ok_or_else(|| PaymentError::missing_credentials(GATEWAY, "wompi"))
    }

    /// In strict mode a tenant without an events secret could never have its
    /// callbacks accepted, so the intent is refused up front.
    fn checkout_credentials<'a>(
        &self,
        tenant: &'a TenantPaymentConfig,
    ) -> PaymentResult<CheckoutCredentials<'a>> {
        let credentials = Self::credentials(tenant)?;
        let public_key = non_empty(credentials.pub_key.as_deref())
            .ok_or_else(|| PaymentError::missing_credentials(GATEWAY, "pubKey"))?;
        let integrity_secret = non_empty(credentials.integrity_secret.as_deref())
            .ok_or_else(|| PaymentError::missing_credentials(GATEWAY, "integritySecret"))?;
        if self.settings.require_signed_callbacks
            && non_empty(credentials.events_secret.as_deref()).is_none()
        {
            return Err(PaymentError::missing_credentials(GATEWAY, "eventsSecret"));
        }
        Ok(CheckoutCredentials {
            public_key,
            integrity_secret,
        })
    }

    fn api_base_url(&self, credentials: &WompiCredentials) -> &str {
        let base = if credentials.is_sandbox {
            &self.settings.sandbox_api_url
        } else {
            &self.settings.production_api_url
        };
        base.trim_end_matches('/')
    }

    fn checkout_url(
        &self,
        public_key: &str,
        intent: &PaymentIntent,
        payer: &Payer,
    ) -> String {
        let mut url = format!(
            "{}?public-key={}&currency={}&amount-in-cents={}&reference={}&signature:integrity={}",
            self.settings.checkout_url,
            urlencoding::encode(public_key),
            urlencoding::encode(&intent.currency),
            intent.amount_in_cents,
            urlencoding::encode(&intent.reference),
            intent.signature,
        );
        if let Some(redirect_url) = intent.redirect_url.as_deref() {
            url.push_str("&redirect-url=");
            url.push_str(&urlencoding::encode(redirect_url));
        }
        if let Some(email) = payer.email.as_deref().filter(|e| !e.trim().is_empty()) {
            url.push_str("&customer-data:email=");
            url.push_str(&urlencoding::encode(email));
        }
        if let Some(name) = payer.full_name.as_deref().filter(|n| !n.trim().is_empty()) {
            url.push_str("&customer-data:full-name=");
            url.push_str(&urlencoding::encode(name));
        }
        url
    }

    fn outcome(transaction: GatewayTransaction, raw: JsonValue) -> PaymentOutcome {
        let status = TransactionStatus::from_gateway(&transaction.status);
        PaymentOutcome {
            success: status == TransactionStatus::Approved,
            reference: transaction.reference,
            external_id: transaction.id,
            amount: from_minor_units(transaction.amount_in_cents),
            currency: transaction.currency,
            status,
            gateway_status: transaction.status.trim().to_uppercase(),
            raw,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// `PAY-<unix millis>-<8 hex chars>`. Uniqueness is also enforced by storage.
pub fn generate_reference() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "PAY-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

/// Builds a correctly signed `transaction.updated` event, as the gateway would send it.
pub fn signed_event(
    transaction: &GatewayTransaction,
    timestamp: i64,
    events_secret: &str,
) -> JsonValue {
    let timestamp_text = timestamp.to_string();
    let checksum = event_signature(
        &transaction.id,
        &transaction.status,
        transaction.amount_in_cents,
        &timestamp_text,
        events_secret,
    );
    json!({
        "event": "transaction.updated",
        "data": {
            "transaction": {
                "id": transaction.id,
                "status": transaction.status,
                "reference": transaction.reference,
                "amount_in_cents": transaction.amount_in_cents,
                "currency": transaction.currency,
            }
        },
        "signature": {
            "properties": ["transaction.id", "transaction.status", "transaction.amount_in_cents"],
            "checksum": checksum,
        },
        "timestamp": timestamp,
        "sent_at": chrono::Utc::now().to_rfc3339(),
    })
}

#[async_trait]
impl PaymentGateway for WompiGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Wompi
    }

    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        payer: &Payer,
        tenant: &TenantPaymentConfig,
        options: &IntentOptions,
    ) -> PaymentResult<PaymentIntent> {
        tenant.ensure_enabled()?;
        let credentials = self.checkout_credentials(tenant)?;

        if amount <= Decimal::ZERO {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }
        let currency = currency.trim().to_uppercase();
        if currency.is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }

        let reference = generate_reference();
        let amount_in_cents = to_minor_units(amount)?;
        let signature = checkout_signature(
            &reference,
            amount_in_cents,
            &currency,
            credentials.integrity_secret,
        );

        let mut intent = PaymentIntent {
            reference,
            amount_in_cents,
            currency,
            signature,
            public_key: credentials.public_key.to_string(),
            checkout_url: String::new(),
            redirect_url: options.redirect_url.clone(),
        };
        intent.checkout_url = self.checkout_url(credentials.public_key, &intent, payer);

        info!(
            reference = %intent.reference,
            tenant_id = %tenant.tenant_id,
            amount_in_cents = intent.amount_in_cents,
            currency = %intent.currency,
            "wompi payment intent created"
        );
        Ok(intent)
    }

    fn validate_callback(
        &self,
        payload: &JsonValue,
        tenant: &TenantPaymentConfig,
    ) -> PaymentResult<PaymentOutcome> {
        let credentials = Self::credentials(tenant)?;
        let envelope = CallbackEnvelope::parse(payload)?;

        let events_secret = non_empty(credentials.events_secret.as_deref());
        match (events_secret, envelope.checksum.as_deref()) {
            (Some(secret), Some(checksum)) => {
                let timestamp = envelope.timestamp.as_deref().ok_or_else(|| {
                    PaymentError::InvalidSignature {
                        message: "signed event has no timestamp".to_string(),
                    }
                })?;
                let genuine = verify_event_signature(
                    &envelope.transaction.id,
                    &envelope.transaction.status,
                    envelope.transaction.amount_in_cents,
                    timestamp,
                    secret,
                    checksum,
                );
                if !genuine {
                    return Err(PaymentError::InvalidSignature {
                        message: format!(
                            "checksum mismatch for reference {}",
                            envelope.transaction.reference
                        ),
                    });
                }
            }
            (secret, checksum) => {
                let reason = if secret.is_none() {
                    "tenant has no events secret"
                } else if checksum.is_none() {
                    "event carries no checksum"
                } else {
                    "event cannot be verified"
                };
                if self.settings.require_signed_callbacks {
                    return Err(PaymentError::InvalidSignature {
                        message: reason.to_string(),
                    });
                }
                warn!(
                    reference = %envelope.transaction.reference,
                    tenant_id = %tenant.tenant_id,
                    reason,
                    "accepting unverified wompi callback"
                );
            }
        }

        Ok(Self::outcome(envelope.transaction, envelope.raw))
    }

    async fn query_status(
        &self,
        external_id: &str,
        tenant: &TenantPaymentConfig,
    ) -> PaymentResult<PaymentOutcome> {
        let credentials = Self::credentials(tenant)?;
        let public_key = non_empty(credentials.pub_key.as_deref())
            .ok_or_else(|| PaymentError::missing_credentials(GATEWAY, "pubKey"))?;

        let url = format!(
            "{}/transactions/{}",
            self.api_base_url(credentials),
            urlencoding::encode(external_id)
        );
        let body: JsonValue = self.http.get_json(&url, Some(public_key)).await?;
        let transaction = GatewayTransaction::from_value(
            body.get("data").unwrap_or(&JsonValue::Null),
            "data",
        )?;
        if transaction.id != external_id {
            return Err(PaymentError::malformed(format!(
                "lookup for {} returned transaction {}",
                external_id, transaction.id
            )));
        }

        Ok(Self::outcome(transaction, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::error::ConfigurationIssue;
    use crate::payments::signature::sign;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tenant() -> TenantPaymentConfig {
        TenantPaymentConfig {
            tenant_id: Uuid::new_v4(),
            enable_online_payments: Some(true),
            payment_gateway: Some("wompi".to_string()),
            wompi: Some(WompiCredentials {
                pub_key: Some("pub_test_abc".to_string()),
                integrity_secret: Some("test_integrity_xyz".to_string()),
                events_secret: Some("test_events_123".to_string()),
                is_sandbox: true,
            }),
        }
    }

    fn payer() -> Payer {
        Payer {
            user_id: Uuid::new_v4(),
            profile_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            email: Some("student@example.com".to_string()),
            full_name: None,
        }
    }

    fn gateway(settings: WompiSettings) -> WompiGateway {
        WompiGateway::new(settings).expect("gateway init should succeed")
    }

    fn transaction(status: &str) -> GatewayTransaction {
        GatewayTransaction {
            id: "12345-1700000000-00001".to_string(),
            status: status.to_string(),
            reference: "PAY-1-abc".to_string(),
            amount_in_cents: 1_000_000,
            currency: "COP".to_string(),
        }
    }

    #[tokio::test]
    async fn intent_carries_signature_and_checkout_url() {
        let gateway = gateway(WompiSettings::default());
        let tenant = tenant();
        let intent = gateway
            .create_intent(
                Decimal::from(10_000),
                "cop",
                &payer(),
                &tenant,
                &IntentOptions {
                    redirect_url: Some("https://school.example.com/pay/done?x=1&y=2".to_string()),
                },
            )
            .await
            .unwrap();

        assert!(intent.reference.starts_with("PAY-"));
        assert_eq!(intent.amount_in_cents, 1_000_000);
        assert_eq!(intent.currency, "COP");
        assert_eq!(intent.public_key, "pub_test_abc");
        assert_eq!(
            intent.signature,
            sign(
                &[intent.reference.as_str(), "1000000", "COP"],
                "test_integrity_xyz"
            )
        );
        assert!(intent
            .checkout_url
            .starts_with("https://checkout.wompi.co/p/?public-key=pub_test_abc"));
        assert!(intent.checkout_url.contains("&amount-in-cents=1000000"));
        assert!(intent
            .checkout_url
            .contains(&format!("&signature:integrity={}", intent.signature)));
        assert!(intent.checkout_url.contains(
            "&redirect-url=https%3A%2F%2Fschool.example.com%2Fpay%2Fdone%3Fx%3D1%26y%3D2"
        ));
        assert!(intent
            .checkout_url
            .contains("&customer-data:email=student%40example.com"));
    }

    #[tokio::test]
    async fn references_are_unique_per_intent() {
        let gateway = gateway(WompiSettings::default());
        let tenant = tenant();
        let first = gateway
            .create_intent(Decimal::from(1000), "COP", &payer(), &tenant, &IntentOptions::default())
            .await
            .unwrap();
        let second = gateway
            .create_intent(Decimal::from(1000), "COP", &payer(), &tenant, &IntentOptions::default())
            .await
            .unwrap();
        assert_ne!(first.reference, second.reference);
        assert_ne!(first.signature, second.signature);
    }

    #[tokio::test]
    async fn disabled_and_incomplete_configurations_are_distinguished() {
        let gateway = gateway(WompiSettings::default());

        let mut disabled = tenant();
        disabled.enable_online_payments = Some(false);
        let mut undefined = tenant();
        undefined.enable_online_payments = None;
        let mut no_credentials = tenant();
        no_credentials.wompi = None;
        let mut no_integrity = tenant();
        no_integrity.wompi.as_mut().unwrap().integrity_secret = Some("  ".to_string());

        for config in [disabled, undefined] {
            let err = gateway
                .create_intent(Decimal::from(1000), "COP", &payer(), &config, &IntentOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                PaymentError::Configuration {
                    issue: ConfigurationIssue::OnlinePaymentsDisabled
                }
            ));
        }

        let err = gateway
            .create_intent(Decimal::from(1000), "COP", &payer(), &no_credentials, &IntentOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::Configuration {
                issue: ConfigurationIssue::MissingCredentials { ref field, .. }
            } if field == "wompi"
        ));

        let err = gateway
            .create_intent(Decimal::from(1000), "COP", &payer(), &no_integrity, &IntentOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("integritySecret"));
    }

    #[tokio::test]
    async fn strict_mode_requires_events_secret_up_front() {
        let mut config = tenant();
        config.wompi.as_mut().unwrap().events_secret = None;

        let strict = gateway(WompiSettings::default());
        let err = strict
            .create_intent(Decimal::from(1000), "COP", &payer(), &config, &IntentOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("eventsSecret"));

        let permissive = gateway(WompiSettings {
            require_signed_callbacks: false,
            ..WompiSettings::default()
        });
        assert!(permissive
            .create_intent(Decimal::from(1000), "COP", &payer(), &config, &IntentOptions::default())
            .await
            .is_ok());
    }

    #[test]
    fn valid_callback_maps_status_and_amount() {
        let gateway = gateway(WompiSettings::default());
        let payload = signed_event(&transaction("APPROVED"), 1_700_000_100, "test_events_123");

        let outcome = gateway.validate_callback(&payload, &tenant()).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.status, TransactionStatus::Approved);
        assert_eq!(outcome.reference, "PAY-1-abc");
        assert_eq!(outcome.external_id, "12345-1700000000-00001");
        assert_eq!(outcome.amount, Decimal::from(10_000));
        assert_eq!(outcome.raw, payload);
    }

    #[test]
    fn tampered_callback_is_rejected() {
        let gateway = gateway(WompiSettings::default());
        let mut payload = signed_event(&transaction("DECLINED"), 1_700_000_100, "test_events_123");
        payload["data"]["transaction"]["status"] = json!("APPROVED");

        let err = gateway.validate_callback(&payload, &tenant()).unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature { .. }));
    }

    #[test]
    fn callback_signed_with_another_secret_is_rejected() {
        let gateway = gateway(WompiSettings::default());
        let payload = signed_event(&transaction("APPROVED"), 1_700_000_100, "someone_else");
        assert!(matches!(
            gateway.validate_callback(&payload, &tenant()),
            Err(PaymentError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn unknown_gateway_status_maps_to_error() {
        let gateway = gateway(WompiSettings::default());
        let payload = signed_event(&transaction("PENDING"), 1_700_000_100, "test_events_123");
        let outcome = gateway.validate_callback(&payload, &tenant()).unwrap();
        assert_eq!(outcome.status, TransactionStatus::Error);
        assert_eq!(outcome.gateway_status, "PENDING");
        assert!(outcome.is_provisional());
        assert!(!outcome.success);
    }

    #[test]
    fn unsigned_callbacks_depend_on_mode() {
        let mut payload = signed_event(&transaction("APPROVED"), 1_700_000_100, "test_events_123");
        payload.as_object_mut().unwrap().remove("signature");

        let strict = gateway(WompiSettings::default());
        assert!(matches!(
            strict.validate_callback(&payload, &tenant()),
            Err(PaymentError::InvalidSignature { .. })
        ));

        let mut no_secret = tenant();
        no_secret.wompi.as_mut().unwrap().events_secret = None;
        let signed = signed_event(&transaction("APPROVED"), 1_700_000_100, "test_events_123");
        assert!(strict.validate_callback(&signed, &no_secret).is_err());

        let permissive = gateway(WompiSettings {
            require_signed_callbacks: false,
            ..WompiSettings::default()
        });
        let outcome = permissive.validate_callback(&signed, &no_secret).unwrap();
        assert_eq!(outcome.status, TransactionStatus::Approved);
    }

    #[tokio::test]
    async fn query_status_uses_sandbox_base_and_public_key() {
        let sandbox = MockServer::start().await;
        let production = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/transactions/12345-1700000000-00001"))
            .and(header("authorization", "Bearer pub_test_abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "id": "12345-1700000000-00001",
                    "status": "DECLINED",
                    "reference": "PAY-1-abc",
                    "amount_in_cents": 1_000_000,
                    "currency": "COP"
                }
            })))
            .expect(1)
            .mount(&sandbox)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&production)
            .await;

        let gateway = gateway(WompiSettings {
            sandbox_api_url: format!("{}/v1", sandbox.uri()),
            production_api_url: format!("{}/v1", production.uri()),
            ..WompiSettings::default()
        });
        let outcome = gateway
            .query_status("12345-1700000000-00001", &tenant())
            .await
            .unwrap();
        assert_eq!(outcome.status, TransactionStatus::Declined);
        assert_eq!(outcome.reference, "PAY-1-abc");
    }

    #[tokio::test]
    async fn query_status_maps_http_failure_and_missing_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/transactions/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/transactions/partial"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": {"id": "partial", "status": "APPROVED"}})),
            )
            .mount(&server)
            .await;

        let mut config = tenant();
        config.wompi.as_mut().unwrap().is_sandbox = false;
        let gateway = gateway(WompiSettings {
            production_api_url: format!("{}/v1/", server.uri()),
            ..WompiSettings::default()
        });

        assert!(matches!(
            gateway.query_status("gone", &config).await,
            Err(PaymentError::RemoteUnavailable {
                status: Some(404),
                ..
            })
        ));
        assert!(matches!(
            gateway.query_status("partial", &config).await,
            Err(PaymentError::MalformedResponse { .. })
        ));
    }
}
