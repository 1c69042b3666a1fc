use crate::payments::error::{ConfigurationIssue, PaymentError, PaymentResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

/// Minor units per major unit for every currency the gateway settles in.
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Wompi,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Wompi => "wompi",
        }
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayKind {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "wompi" => Ok(GatewayKind::Wompi),
            _ => Err(PaymentError::configuration(
                ConfigurationIssue::UnsupportedGateway(value.to_string()),
            )),
        }
    }
}

/// Credentials for the Wompi checkout and events API, stored per tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WompiCredentials {
    #[serde(default)]
    pub pub_key: Option<String>,
    #[serde(default)]
    pub integrity_secret: Option<String>,
    #[serde(default)]
    pub events_secret: Option<String>,
    #[serde(default)]
    pub is_sandbox: bool,
}

/// Per-tenant payment settings as stored in the tenant settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TenantPaymentConfig {
    #[serde(skip)]
    pub tenant_id: Uuid,
    #[serde(default)]
    pub enable_online_payments: Option<bool>,
    #[serde(default)]
    pub payment_gateway: Option<String>,
    #[serde(default)]
    pub wompi: Option<WompiCredentials>,
}

impl TenantPaymentConfig {
    pub fn from_settings(tenant_id: Uuid, settings: JsonValue) -> PaymentResult<Self> {
        let mut config: TenantPaymentConfig = serde_json::from_value(settings).map_err(|e| {
            PaymentError::configuration(ConfigurationIssue::MissingCredentials {
                gateway: "unknown".to_string(),
                field: format!("settings ({})", e),
            })
        })?;
        config.tenant_id = tenant_id;
        Ok(config)
    }

    /// An absent flag counts as disabled.
    pub fn online_payments_enabled(&self) -> bool {
        self.enable_online_payments == Some(true)
    }

    pub fn ensure_enabled(&self) -> PaymentResult<()> {
        if self.online_payments_enabled() {
            Ok(())
        } else {
            Err(PaymentError::configuration(
                ConfigurationIssue::OnlinePaymentsDisabled,
            ))
        }
    }

    /// The active gateway; Wompi when none is named.
    pub fn active_gateway(&self) -> PaymentResult<GatewayKind> {
        match self.payment_gateway.as_deref() {
            None => Ok(GatewayKind::Wompi),
            Some(name) if name.trim().is_empty() => Ok(GatewayKind::Wompi),
            Some(name) => GatewayKind::from_str(name),
        }
    }
}

/// Canonical transaction lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Declined,
    Voided,
    Error,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Approved => "APPROVED",
            TransactionStatus::Declined => "DECLINED",
            TransactionStatus::Voided => "VOIDED",
            TransactionStatus::Error => "ERROR",
        }
    }

    /// Maps a gateway-reported status onto the terminal statuses.
    ///
    /// Anything outside APPROVED/DECLINED/VOIDED/ERROR, including the gateway's
    /// own PENDING, becomes `Error`.
    pub fn from_gateway(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "APPROVED" => TransactionStatus::Approved,
            "DECLINED" => TransactionStatus::Declined,
            "VOIDED" => TransactionStatus::Voided,
            _ => TransactionStatus::Error,
        }
    }

    /// Parses a stored status string. Unknown values are rejected rather than guessed.
    pub fn from_db_status(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(TransactionStatus::Pending),
            "APPROVED" => Some(TransactionStatus::Approved),
            "DECLINED" => Some(TransactionStatus::Declined),
            "VOIDED" => Some(TransactionStatus::Voided),
            "ERROR" => Some(TransactionStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Whether the gateway had finished with the transaction when it reported
    /// `value`. PENDING and unknown values are provisional even though
    /// [`TransactionStatus::from_gateway`] records them as `Error`.
    pub fn is_final_gateway_status(value: &str) -> bool {
        matches!(
            value.trim().to_uppercase().as_str(),
            "APPROVED" | "DECLINED" | "VOIDED" | "ERROR"
        )
    }

    /// APPROVED is final. Other terminal statuses may still be corrected by a
    /// verified report; nothing goes back to PENDING.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        match self {
            TransactionStatus::Approved => next == TransactionStatus::Approved,
            _ => next.is_terminal(),
        }
    }

    /// True when a report of `reported` must leave this status in place.
    /// A provisional report never replaces a terminal status.
    pub fn keeps_status_on(&self, reported: TransactionStatus, provisional: bool) -> bool {
        !self.can_transition_to(reported) || (provisional && self.is_terminal())
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The payable identity behind an authenticated principal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payer {
    pub user_id: Uuid,
    pub profile_id: Uuid,
    pub tenant_id: Uuid,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentOptions {
    /// Where the hosted checkout sends the payer afterwards.
    pub redirect_url: Option<String>,
}

/// Everything needed to send a payer to the hosted checkout. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentIntent {
    pub reference: String,
    pub amount_in_cents: i64,
    pub currency: String,
    pub signature: String,
    pub public_key: String,
    pub checkout_url: String,
    pub redirect_url: Option<String>,
}

/// A verified (or looked-up) gateway report about one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub success: bool,
    pub reference: String,
    pub external_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    /// The status string exactly as the gateway sent it.
    pub gateway_status: String,
    pub raw: JsonValue,
}

impl PaymentOutcome {
    /// The gateway has not reached a final state yet (e.g. its own PENDING).
    pub fn is_provisional(&self) -> bool {
        !TransactionStatus::is_final_gateway_status(&self.gateway_status)
    }
}

/// `round(amount * 100)`, half away from zero.
pub fn to_minor_units(amount: Decimal) -> PaymentResult<i64> {
    amount
        .checked_mul(Decimal::from(MINOR_UNITS_PER_MAJOR))
        .map(|scaled| scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|rounded| rounded.to_i64())
        .ok_or(PaymentError::ValidationError {
            message: format!("amount out of range: {}", amount),
            field: Some("amount".to_string()),
        })
}

pub fn from_minor_units(amount_in_minor_units: i64) -> Decimal {
    Decimal::new(amount_in_minor_units, 2).normalize()
}
