//! Owner keyring.
//!
//! Maps an owner to the public keys it may sign with, each valid inside an
//! open time window. Several entries per owner model key rotation; windows
//! may overlap.
//!
//! A keyring is built once and then shared read-only. Refreshing means
//! building a new keyring and swapping it in whole.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

use crate::crypto::Ed25519PublicKey;
use crate::date::parse_date;
use crate::error::{CoreError, Result};
use crate::record::Record;
use crate::types::Model;

/// One public key of an owner with its validity window.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEntry {
    pub owner: String,
    pub public_key: Ed25519PublicKey,
    pub valid_since: DateTime<FixedOffset>,
    pub valid_till: DateTime<FixedOffset>,
}

impl KeyEntry {
    /// Decode from an `admin/pubkey` payload:
    /// `{owner, publicKey, validSince, validTill}`.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let field = |name: &str| -> Result<&str> {
            payload
                .get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| CoreError::InvalidKeyEntry(format!("missing {name}")))
        };
        Ok(Self {
            owner: field("owner")?.to_owned(),
            public_key: Ed25519PublicKey::from_hex(field("publicKey")?)?,
            valid_since: parse_date(field("validSince")?)?,
            valid_till: parse_date(field("validTill")?)?,
        })
    }

    /// Whether `date` lies strictly inside the validity window.
    pub fn covers(&self, date: &DateTime<FixedOffset>) -> bool {
        self.valid_since < *date && *date < self.valid_till
    }
}

/// Owner → key entries.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    owners: HashMap<String, Vec<KeyEntry>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Entries keep insertion order per owner.
    pub fn insert(&mut self, entry: KeyEntry) {
        self.owners.entry(entry.owner.clone()).or_default().push(entry);
    }

    /// Add the key carried by an `admin/pubkey` record.
    pub fn insert_record(&mut self, record: &Record) -> Result<()> {
        if record.model() != Model::ADMIN_PUBKEY {
            return Err(CoreError::InvalidKeyEntry(format!(
                "{} is not a key record",
                record.id
            )));
        }
        self.insert(KeyEntry::from_payload(&record.envelope.payload)?);
        Ok(())
    }

    pub fn knows(&self, owner: &str) -> bool {
        self.owners.contains_key(owner)
    }

    /// All entries of `owner` whose window contains `date`.
    pub fn candidates<'a>(
        &'a self,
        owner: &str,
        date: &'a DateTime<FixedOffset>,
    ) -> impl Iterator<Item = &'a KeyEntry> + 'a {
        self.owners
            .get(owner)
            .into_iter()
            .flatten()
            .filter(move |entry| entry.covers(date))
    }

    /// Number of owners.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Number of key entries across all owners.
    pub fn key_count(&self) -> usize {
        self.owners.values().map(Vec::len).sum()
    }
}
