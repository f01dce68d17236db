//! Records and envelopes.
//!
//! An [`Envelope`] is the signed, hashable part of a [`Record`]. A record's
//! `id` is the content hash of its canonical envelope and `sign` is an
//! Ed25519 signature over the same canonical bytes.
//!
//! The server-assigned timestamp is a storage concern and never part of
//! the record as clients see it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical::envelope_bytes;
use crate::crypto::content_hash;
use crate::error::{CoreError, Result, ValidationError};
use crate::types::{Model, RecordId};

/// The signed wrapper around a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// `"<kind>/<name>"`.
    pub model: String,
    /// Pseudonymous author, resolved through the keyring.
    pub owner: String,
    /// ISO 8601 creation date, kept verbatim so hashing sees the original text.
    pub date: String,
    /// Arbitrary JSON object validated against the model's schema.
    pub payload: Value,
    /// Optional schema hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl Envelope {
    /// Canonical bytes: the hash input and the signed message.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        envelope_bytes(self)
    }

    /// The record id this envelope hashes to.
    pub fn content_id(&self) -> RecordId {
        content_hash(&self.canonical_bytes())
    }

    /// Parse `model` into kind and name.
    pub fn parsed_model(&self) -> std::result::Result<Model, ValidationError> {
        self.model.parse()
    }

    /// The envelope as a JSON object.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("model".into(), Value::String(self.model.clone()));
        map.insert("owner".into(), Value::String(self.owner.clone()));
        map.insert("date".into(), Value::String(self.date.clone()));
        map.insert("payload".into(), self.payload.clone());
        if let Some(schema) = &self.schema {
            map.insert("schema".into(), Value::String(schema.clone()));
        }
        Value::Object(map)
    }
}

/// A stored, content-addressed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub envelope: Envelope,
    /// Base64 Ed25519 signature over the canonical envelope.
    pub sign: String,
}

impl Record {
    /// Decode a record from a stored JSON document.
    ///
    /// Storage-only fields (such as `ts`) are ignored.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(CoreError::MalformedRecord("record is not an object".into()));
        };
        map.retain(|k, _| matches!(k.as_str(), "id" | "envelope" | "sign"));
        serde_json::from_value(Value::Object(map))
            .map_err(|e| CoreError::MalformedRecord(e.to_string()))
    }

    /// The record as a JSON object (`id`, `envelope`, `sign`).
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("id".into(), Value::String(self.id.to_string()));
        map.insert("envelope".into(), self.envelope.to_value());
        map.insert("sign".into(), Value::String(self.sign.clone()));
        Value::Object(map)
    }

    pub fn model(&self) -> &str {
        &self.envelope.model
    }

    pub fn owner(&self) -> &str {
        &self.envelope.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Envelope {
        Envelope {
            model: "form/comment".into(),
            owner: "example-owner".into(),
            date: "2017-04-20T01:55:21.358240+03:00".into(),
            payload: json!({"comment": "тест"}),
            schema: None,
        }
    }

    #[test]
    fn test_schema_omitted_when_absent() {
        let v = sample().to_value();
        assert!(v.get("schema").is_none());
        assert_eq!(v.as_object().unwrap().len(), 4);
    }

    #[test]
    fn test_to_value_matches_serde() {
        let env = sample();
        assert_eq!(env.to_value(), serde_json::to_value(&env).unwrap());
    }

    #[test]
    fn test_content_id_changes_with_payload() {
        let a = sample();
        let mut b = sample();
        b.payload = json!({"comment": "інше"});
        assert_ne!(a.content_id(), b.content_id());
    }

    #[test]
    fn test_from_value_drops_storage_fields() {
        let env = sample();
        let doc = json!({
            "id": env.content_id().to_string(),
            "envelope": env.to_value(),
            "sign": "c2ln",
            "ts": 1500000000.25,
        });
        let record = Record::from_value(doc).unwrap();
        assert_eq!(record.envelope, env);
        assert!(record.to_value().get("ts").is_none());
    }
}
