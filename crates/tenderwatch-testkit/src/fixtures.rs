//! Test fixtures and helpers.
//!
//! A [`Signer`] owns a deterministic keypair and produces records that pass
//! envelope validation; a [`TestFixture`] bundles the `root` signer, its key
//! record and a memory engine already holding that key.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use tenderwatch_core::{canonical_json, content_hash, date, Keypair, Record};
use tenderwatch_store::{MemoryEngine, RecordStore};

/// Owner of every `admin/*` record.
pub const ROOT: &str = "root";

/// Window used for fixture keys.
pub const KEY_VALID_SINCE: &str = "2000-01-01T00:00:00+00:00";
pub const KEY_VALID_TILL: &str = "2100-01-01T00:00:00+00:00";

/// An owner with a keypair.
#[derive(Debug, Clone)]
pub struct Signer {
    pub owner: String,
    pub keypair: Keypair,
}

impl Signer {
    pub fn new(owner: &str, seed: [u8; 32]) -> Self {
        Self {
            owner: owner.to_owned(),
            keypair: Keypair::from_seed(&seed),
        }
    }

    pub fn root() -> Self {
        Self::new(ROOT, [0x52; 32])
    }

    /// Sign an envelope object into a record value.
    pub fn sign_envelope(&self, envelope: Value) -> Value {
        let bytes = canonical_json(&envelope);
        json!({
            "id": content_hash(&bytes).to_string(),
            "envelope": envelope,
            "sign": self.keypair.sign(&bytes).to_base64(),
        })
    }

    /// A record dated now.
    pub fn record(&self, model: &str, payload: Value) -> Value {
        self.record_at(model, payload, date::now())
    }

    /// A record with an explicit date.
    pub fn record_at(&self, model: &str, payload: Value, date: DateTime<Utc>) -> Value {
        self.sign_envelope(json!({
            "model": model,
            "owner": self.owner,
            "date": date.to_rfc3339(),
            "payload": payload,
        }))
    }

    /// `admin/pubkey` payload publishing this signer's key.
    pub fn key_payload(&self, since: &str, till: &str) -> Value {
        json!({
            "owner": self.owner,
            "publicKey": self.keypair.public_key().to_hex(),
            "validSince": since,
            "validTill": till,
        })
    }

    /// `admin/pubkey` record for `subject`, signed by `self`.
    pub fn key_record_for(&self, subject: &Signer) -> Value {
        self.record("admin/pubkey", subject.key_payload(KEY_VALID_SINCE, KEY_VALID_TILL))
    }

    /// `admin/schema` record registering `schema` for `model`.
    pub fn schema_record(&self, model: &str, schema: Value) -> Value {
        self.record("admin/schema", json!({ "model": model, "schema": schema }))
    }
}

/// A self-signed root key, as handed to `init`.
pub fn root_key_record(root: &Signer) -> Value {
    root.key_record_for(root)
}

/// A date `days` days from now.
pub fn days_from_now(days: i64) -> DateTime<Utc> {
    date::now() + Duration::days(days)
}

/// Base schema with a shared `id` definition.
pub fn comment_schema() -> Value {
    json!({
        "title": "comment",
        "type": "object",
        "definitions": {
            "id": {"type": "string", "minLength": 32, "maxLength": 32}
        },
        "required": ["comment"],
        "properties": {
            "comment": {"type": "string", "minLength": 1},
            "parentForm": {"$ref": "#/definitions/id", "reference": "form"}
        }
    })
}

/// A form referencing a tender and one of its contracts.
pub fn violation_schema() -> Value {
    json!({
        "title": "violation",
        "type": "object",
        "required": ["tender"],
        "properties": {
            "tender": {"$ref": "#/definitions/id", "reference": "tenders"},
            "tenderContract": {"type": "string", "reference": "tenders/contracts"},
            "comment": {"type": "string"}
        }
    })
}

/// A feed tender.
pub fn tender(id: &str, contracts: &[&str]) -> Value {
    let contracts: Vec<Value> = contracts.iter().map(|c| json!({ "id": c })).collect();
    json!({
        "id": id,
        "dateModified": date::now().to_rfc3339(),
        "contracts": contracts,
    })
}

/// The `root` signer and a memory engine holding its key.
pub struct TestFixture {
    pub root: Signer,
    pub root_key: Value,
    pub store: Arc<MemoryEngine>,
}

impl TestFixture {
    pub async fn new() -> Self {
        let root = Signer::root();
        let root_key = root_key_record(&root);
        let store = Arc::new(MemoryEngine::new());
        let record = Record::from_value(root_key.clone())
            .unwrap_or_else(|e| panic!("fixture root key is malformed: {e}"));
        store
            .put_record(&record)
            .await
            .unwrap_or_else(|e| panic!("storing fixture root key failed: {e}"));
        Self {
            root,
            root_key,
            store,
        }
    }
}

/// Signers with distinct deterministic keys.
pub fn signers(count: usize) -> Vec<Signer> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            Signer::new(&format!("owner-{i}"), seed)
        })
        .collect()
}
