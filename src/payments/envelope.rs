//! Defensive parsing of gateway JSON.
//!
//! Nothing read from a callback or a status lookup is trusted until every
//! field the orchestrator needs has been checked for presence and type.

use crate::payments::error::{PaymentError, PaymentResult};
use serde_json::Value as JsonValue;

/// The `transaction` object shared by callbacks and status lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayTransaction {
    pub id: String,
    pub status: String,
    pub reference: String,
    pub amount_in_cents: i64,
    pub currency: String,
}

impl GatewayTransaction {
    pub fn from_value(value: &JsonValue, context: &str) -> PaymentResult<Self> {
        if !value.is_object() {
            return Err(PaymentError::malformed(format!(
                "{} is missing or not an object",
                context
            )));
        }
        Ok(Self {
            id: identifier_field(value, "id", context)?,
            status: string_field(value, "status", context)?,
            reference: string_field(value, "reference", context)?,
            amount_in_cents: integer_field(value, "amount_in_cents", context)?,
            currency: string_field(value, "currency", context)?,
        })
    }
}

/// A gateway event notification, e.g. `transaction.updated`.
#[derive(Debug, Clone)]
pub struct CallbackEnvelope {
    pub event: Option<String>,
    pub transaction: GatewayTransaction,
    /// Raw textual form of the envelope timestamp, as it enters the checksum.
    pub timestamp: Option<String>,
    pub checksum: Option<String>,
    pub raw: JsonValue,
}

impl CallbackEnvelope {
    pub fn parse(payload: &JsonValue) -> PaymentResult<Self> {
        if !payload.is_object() {
            return Err(PaymentError::malformed("callback payload is not a JSON object"));
        }

        let transaction = GatewayTransaction::from_value(
            payload
                .get("data")
                .and_then(|d| d.get("transaction"))
                .unwrap_or(&JsonValue::Null),
            "data.transaction",
        )?;

        let timestamp = match payload.get("timestamp") {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::Number(n)) => Some(n.to_string()),
            Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(_) => return Err(PaymentError::malformed("timestamp has an unexpected type")),
        };

        let checksum = match payload.get("signature").and_then(|s| s.get("checksum")) {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(_) => {
                return Err(PaymentError::malformed(
                    "signature.checksum has an unexpected type",
                ))
            }
        };

        Ok(Self {
            event: payload
                .get("event")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            transaction,
            timestamp,
            checksum,
            raw: payload.clone(),
        })
    }
}

/// Pulls `data.transaction.reference` out of a callback without looking at
/// anything else.
pub fn extract_reference(payload: &JsonValue) -> Option<String> {
    payload
        .get("data")
        .and_then(|d| d.get("transaction"))
        .and_then(|t| t.get("reference"))
        .and_then(|r| r.as_str())
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
}

fn string_field(value: &JsonValue, field: &str, context: &str) -> PaymentResult<String> {
    match value.get(field) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(JsonValue::String(_)) => Err(PaymentError::malformed(format!(
            "{}.{} is empty",
            context, field
        ))),
        Some(_) => Err(PaymentError::malformed(format!(
            "{}.{} is not a string",
            context, field
        ))),
        None => Err(PaymentError::malformed(format!(
            "{}.{} is missing",
            context, field
        ))),
    }
}

/// Gateways send ids as strings, some older payloads as numbers.
fn identifier_field(value: &JsonValue, field: &str, context: &str) -> PaymentResult<String> {
    match value.get(field) {
        Some(JsonValue::Number(n)) => Ok(n.to_string()),
        _ => string_field(value, field, context),
    }
}

fn integer_field(value: &JsonValue, field: &str, context: &str) -> PaymentResult<i64> {
    match value.get(field) {
        Some(v) => v.as_i64().ok_or_else(|| {
            PaymentError::malformed(format!("{}.{} is not an integer", context, field))
        }),
        None => Err(PaymentError::malformed(format!(
            "{}.{} is missing",
            context, field
        ))),
    }
}
