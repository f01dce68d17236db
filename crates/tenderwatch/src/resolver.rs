//! Reference resolver.
//!
//! Schema properties may carry a `reference` kind. After schema checks pass,
//! every referenced value present in the payload must resolve:
//!
//! | `reference`         | resolved against                                    |
//! |---------------------|-----------------------------------------------------|
//! | `tenders`           | the tender feed, with retry and archive failover    |
//! | `tenders/contracts` | a tender's `contracts` list                         |
//! | anything else       | the local `data` table, model must match the kind   |
//!
//! Without a configured feed, tenders are looked up in the local mirror.

use std::sync::Arc;

use serde_json::Value;

use tenderwatch_core::{Envelope, ValidationError};
use tenderwatch_store::{Engine, StoreError, Table};
use tenderwatch_sync::TenderApi;

use crate::config::RetryPolicy;
use crate::error::{Result, ServiceError};
use crate::schema::SchemaRegistry;

/// Reference kind resolved through the tender feed.
pub const TENDERS: &str = "tenders";
/// Reference kind resolved through a tender's contract list.
pub const TENDER_CONTRACTS: &str = "tenders/contracts";

/// Validates cross-references of record payloads.
pub struct ReferenceResolver {
    store: Arc<dyn Engine>,
    tenders: Option<Arc<dyn TenderApi>>,
    archive: Option<Arc<dyn TenderApi>>,
    retry: RetryPolicy,
}

impl ReferenceResolver {
    pub fn new(store: Arc<dyn Engine>, retry: RetryPolicy) -> Self {
        Self {
            store,
            tenders: None,
            archive: None,
            retry,
        }
    }

    pub fn with_tenders(mut self, client: Arc<dyn TenderApi>) -> Self {
        self.tenders = Some(client);
        self
    }

    pub fn with_archive(mut self, client: Arc<dyn TenderApi>) -> Self {
        self.archive = Some(client);
        self
    }

    /// Model, schema and reference checks of a trusted envelope.
    pub async fn check(&self, envelope: &Envelope, schemas: &SchemaRegistry) -> Result<()> {
        match schemas.check_envelope(envelope)? {
            Some(schema) => self.check_references(&envelope.payload, schema).await,
            None => Ok(()),
        }
    }

    /// Resolve every `reference`-flagged property present in `payload`.
    pub async fn check_references(&self, payload: &Value, schema: &Value) -> Result<()> {
        let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
            return Ok(());
        };
        for (field, spec) in properties {
            let Some(kind) = spec.get("reference").and_then(Value::as_str) else {
                continue;
            };
            let Some(value) = payload.get(field) else {
                continue;
            };
            let not_found = || ValidationError::ReferenceNotFound {
                field: field.clone(),
                value: value.as_str().map_or_else(|| value.to_string(), str::to_owned),
            };
            let Some(value) = value.as_str() else {
                return Err(not_found().into());
            };

            match kind {
                TENDER_CONTRACTS => self.check_contract(value, payload).await?,
                TENDERS => {
                    self.resolve_tender(value).await?;
                }
                model => match self.store.exists(Table::Data, value, Some(model)).await {
                    Ok(true) => {}
                    Ok(false) | Err(StoreError::ModelMismatch { .. }) => {
                        return Err(not_found().into())
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }
        Ok(())
    }

    /// `tenderId/contractId`, or a bare contract id of the payload's `tender`.
    async fn check_contract(&self, reference: &str, payload: &Value) -> Result<()> {
        let (tender_id, contract_id) = match reference.split_once('/') {
            Some((tender, contract)) => (tender, contract),
            None => match payload.get("tender").and_then(Value::as_str) {
                Some(tender) => (tender, reference),
                None => return Err(ValidationError::ContractNotFound(reference.to_owned()).into()),
            },
        };
        let tender = self.resolve_tender(tender_id).await?;
        let found = tender
            .get("contracts")
            .and_then(Value::as_array)
            .is_some_and(|contracts| {
                contracts
                    .iter()
                    .any(|c| c.get("id").and_then(Value::as_str) == Some(contract_id))
            });
        if found {
            Ok(())
        } else {
            Err(ValidationError::ContractNotFound(contract_id.to_owned()).into())
        }
    }

    /// Fetch a tender, refusing those published in test mode.
    pub async fn resolve_tender(&self, id: &str) -> Result<Value> {
        let tender = match (&self.tenders, &self.archive) {
            (None, None) => self.mirrored_tender(id).await?,
            _ => self.fetch_tender(id).await?,
        };
        if tender.get("mode").and_then(Value::as_str) == Some("test") {
            return Err(ValidationError::TenderInTestMode(id.to_owned()).into());
        }
        Ok(tender)
    }

    async fn mirrored_tender(&self, id: &str) -> Result<Value> {
        match self.store.get(Table::Tenders, id).await? {
            Some(doc) => Ok(doc.into_value()),
            None => Err(ValidationError::TenderNotFound(id.to_owned()).into()),
        }
    }

    /// Primary feed first, then the archive. A client error (4xx) moves on
    /// to the next feed at once; other failures are retried with backoff.
    async fn fetch_tender(&self, id: &str) -> std::result::Result<Value, ValidationError> {
        let attempts = self.retry.attempts.max(1);
        let clients = self.tenders.iter().chain(self.archive.iter());
        for (source, client) in clients.enumerate() {
            for attempt in 0..attempts {
                match client.get_tender(id).await {
                    Ok(tender) => return Ok(tender),
                    Err(e) if e.is_client_error() => {
                        tracing::debug!(tender = id, source, error = %e, "tender lookup refused");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(tender = id, source, attempt, error = %e, "tender lookup failed");
                        if attempt + 1 < attempts {
                            tokio::time::sleep(self.retry.backoff(attempt)).await;
                        }
                    }
                }
            }
        }
        Err(ValidationError::TenderNotFound(id.to_owned()))
    }
}
