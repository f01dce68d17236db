//! Envelope trust validation.
//!
//! Decides whether an inbound record is authentic and fresh, independent of
//! payload semantics. The checks run in a fixed order:
//!
//! 1. **Structure**: record and envelope keys come from a fixed allow-list,
//!    so nothing can ride along outside the hashed bytes.
//! 2. **Canonicalization**: the envelope is encoded to canonical JSON.
//! 3. **Content hash**: `id` must equal the hash of those bytes.
//! 4. **Freshness**: `now - 3 days < date < now + 1 day`.
//! 5. **Signature**: `sign` must verify under a key of `owner` whose window
//!    strictly contains `date`.
//!
//! Validation is pure: the same record, keyring and clock always give the
//! same answer.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde_json::{Map, Value};

use crate::canonical::canonical_json;
use crate::crypto::{content_hash, Ed25519Signature};
use crate::date::parse_date;
use crate::error::ValidationError;
use crate::keyring::Keyring;
use crate::record::{Envelope, Record};

/// Keys a record may carry.
pub const RECORD_KEYS: &[&str] = &["id", "envelope", "sign"];

/// Keys an envelope may carry.
pub const ENVELOPE_KEYS: &[&str] = &["model", "owner", "date", "payload", "schema"];

/// Required envelope keys.
const REQUIRED_ENVELOPE_KEYS: &[&str] = &["model", "owner", "date", "payload"];

/// Upper bound on top-level envelope keys.
pub const MAX_ENVELOPE_KEYS: usize = 4;

/// Tunables of the trust check.
#[derive(Debug, Clone)]
pub struct TrustPolicy {
    /// How far in the past an envelope date may lie.
    pub max_age: Duration,
    /// How far in the future an envelope date may lie.
    pub max_skew: Duration,
    /// Disable to re-validate historical records.
    pub check_date: bool,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::days(3),
            max_skew: Duration::days(1),
            check_date: true,
        }
    }
}

impl TrustPolicy {
    /// Policy for replaying stored records: no freshness window.
    pub fn replay() -> Self {
        Self {
            check_date: false,
            ..Self::default()
        }
    }
}

/// Check the shape of a raw record without touching cryptography.
///
/// Returns the envelope object exactly as received, which is what gets
/// canonicalized.
pub fn validate_structure(raw: &Value) -> Result<&Map<String, Value>, ValidationError> {
    let record = raw.as_object().ok_or(ValidationError::BadStructure)?;
    if record.len() > RECORD_KEYS.len() || !has_only(record, RECORD_KEYS) {
        return Err(ValidationError::BadStructure);
    }

    let envelope = record
        .get("envelope")
        .and_then(Value::as_object)
        .ok_or(ValidationError::BadStructure)?;
    if envelope.len() > MAX_ENVELOPE_KEYS || !has_only(envelope, ENVELOPE_KEYS) {
        return Err(ValidationError::BadStructure);
    }
    if REQUIRED_ENVELOPE_KEYS.iter().any(|k| !envelope.contains_key(*k)) {
        return Err(ValidationError::BadStructure);
    }

    let strings_ok = ["model", "owner", "date"]
        .iter()
        .all(|k| envelope.get(*k).is_some_and(Value::is_string))
        && envelope.get("schema").map_or(true, Value::is_string)
        && envelope.get("payload").is_some_and(Value::is_object)
        && record.get("id").is_some_and(Value::is_string)
        && record.get("sign").is_some_and(Value::is_string);
    if !strings_ok {
        return Err(ValidationError::BadStructure);
    }

    Ok(envelope)
}

fn has_only(map: &Map<String, Value>, allowed: &[&str]) -> bool {
    map.keys().all(|k| allowed.contains(&k.as_str()))
}

/// Run the full trust check and return the decoded record.
pub fn validate_envelope(
    raw: &Value,
    keyring: &Keyring,
    now: DateTime<Utc>,
    policy: &TrustPolicy,
) -> Result<Record, ValidationError> {
    let envelope_map = validate_structure(raw)?;

    let canonical = canonical_json(&Value::Object(envelope_map.clone()));

    let claimed = raw.get("id").and_then(Value::as_str).unwrap_or_default();
    let id = content_hash(&canonical);
    if claimed != id.as_str() {
        return Err(ValidationError::BadHashId);
    }

    let envelope: Envelope = serde_json::from_value(Value::Object(envelope_map.clone()))
        .map_err(|_| ValidationError::BadStructure)?;

    let date = parse_date(&envelope.date).map_err(|_| ValidationError::BadEnvelopeDate)?;
    if policy.check_date && !is_fresh(&date, now, policy) {
        return Err(ValidationError::BadEnvelopeDate);
    }

    let sign = raw.get("sign").and_then(Value::as_str).unwrap_or_default();
    verify_signature(&envelope.owner, &date, sign, &canonical, keyring)?;

    Ok(Record {
        id,
        envelope,
        sign: sign.to_owned(),
    })
}

fn is_fresh(date: &DateTime<FixedOffset>, now: DateTime<Utc>, policy: &TrustPolicy) -> bool {
    let date = date.with_timezone(&Utc);
    now - policy.max_age < date && date < now + policy.max_skew
}

/// Accept if any key of `owner` valid at `date` verifies the signature.
pub fn verify_signature(
    owner: &str,
    date: &DateTime<FixedOffset>,
    sign: &str,
    message: &[u8],
    keyring: &Keyring,
) -> Result<(), ValidationError> {
    if !keyring.knows(owner) {
        return Err(ValidationError::SignNotVerified);
    }
    let signature =
        Ed25519Signature::from_base64(sign).map_err(|_| ValidationError::SignNotVerified)?;

    let verified = keyring
        .candidates(owner, date)
        .any(|entry| entry.public_key.verify(message, &signature).is_ok());
    if verified {
        Ok(())
    } else {
        Err(ValidationError::SignNotVerified)
    }
}
