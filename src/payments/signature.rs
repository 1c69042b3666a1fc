//! Signature engine for the gateway wire protocol.
//!
//! Digests are SHA-256 over the plain concatenation of the fields followed by
//! the secret. There are no separators, so callers must format every field
//! deterministically (integer minor-unit amounts, the gateway's own timestamp).

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `parts[0] + parts[1] + ... + secret`.
pub fn sign<S: AsRef<str>>(parts: &[S], secret: &str) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
    }
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Integrity signature attached to an outgoing checkout request:
/// `reference + amount_in_cents + currency + integrity_secret`.
pub fn checkout_signature(
    reference: &str,
    amount_in_minor_units: i64,
    currency: &str,
    integrity_secret: &str,
) -> String {
    let amount = amount_in_minor_units.to_string();
    sign(&[reference, amount.as_str(), currency], integrity_secret)
}

/// Checksum of an inbound event:
/// `transaction.id + transaction.status + transaction.amount_in_cents + timestamp + events_secret`.
pub fn event_signature(
    external_id: &str,
    status: &str,
    amount_in_minor_units: i64,
    timestamp: &str,
    events_secret: &str,
) -> String {
    let amount = amount_in_minor_units.to_string();
    sign(
        &[external_id, status, amount.as_str(), timestamp],
        events_secret,
    )
}

/// Checks an inbound event checksum against [`event_signature`] in constant
/// time. Hex casing of the candidate is ignored.
pub fn verify_event_signature(
    external_id: &str,
    status: &str,
    amount_in_minor_units: i64,
    timestamp: &str,
    events_secret: &str,
    candidate: &str,
) -> bool {
    let expected = event_signature(
        external_id,
        status,
        amount_in_minor_units,
        timestamp,
        events_secret,
    );
    let candidate = candidate.trim().to_ascii_lowercase();
    secure_eq(expected.as_bytes(), candidate.as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
