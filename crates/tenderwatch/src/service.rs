//! The record service: validation, storage and trust-state refresh.
//!
//! A [`Service`] owns the storage engine, the reference resolver and a
//! [`Snapshot`] of the keyring and schema registry. Handlers read the
//! snapshot through a cheap `Arc` clone; a refresh builds a new snapshot and
//! swaps it in whole, so readers never observe a half-built keyring.

use std::sync::{Arc, RwLock};

use serde_json::Value;

use tenderwatch_core::{
    date, validate_envelope, Keyring, Model, Record, TrustPolicy,
};
use tenderwatch_store::{
    open_engine, Engine, ListPage, ListQuery, RecordStore, StoreError, Table, MAX_BATCH_IDS,
};
use tenderwatch_sync::{HttpTenderClient, TenderApi};

use crate::config::{Config, RetryPolicy};
use crate::error::{Result, ServiceError};
use crate::loader;
use crate::resolver::ReferenceResolver;
use crate::schema::SchemaRegistry;

/// Page size used when walking the `data` table.
const WALK_PAGE: usize = MAX_BATCH_IDS;

/// Trust state: who may sign, and what payloads must look like.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub keyring: Keyring,
    pub schemas: SchemaRegistry,
}

impl Snapshot {
    /// Apply an `admin/pubkey` or `admin/schema` record; other models are ignored.
    ///
    /// Returns whether the record changed the snapshot.
    pub fn apply(&mut self, record: &Record) -> Result<bool> {
        match record.model() {
            Model::ADMIN_PUBKEY => {
                self.keyring.insert_record(record)?;
                Ok(true)
            }
            Model::ADMIN_SCHEMA => {
                self.schemas.insert_record(record)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// What a successful write did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was stored under this id.
    Created(String),
    /// `nosave`: the record passed every check and was not stored.
    Validated(String),
}

/// The record service.
pub struct Service {
    store: Arc<dyn Engine>,
    resolver: ReferenceResolver,
    feeds: Vec<Arc<dyn TenderApi>>,
    /// Keyring and schemas loaded from disk; every refresh starts from here.
    seed: Snapshot,
    snapshot: RwLock<Arc<Snapshot>>,
    policy: TrustPolicy,
    readonly: bool,
}

impl Service {
    /// A writable service without tender feeds; references to tenders are
    /// resolved against the local mirror.
    pub fn new(store: Arc<dyn Engine>, seed: Snapshot) -> Self {
        let resolver = ReferenceResolver::new(store.clone(), RetryPolicy::default());
        Self {
            snapshot: RwLock::new(Arc::new(seed.clone())),
            store,
            resolver,
            feeds: Vec::new(),
            seed,
            policy: TrustPolicy::default(),
            readonly: false,
        }
    }

    /// Resolve tenders through `tenders`, falling back to `archive`.
    pub fn with_feeds(
        mut self,
        tenders: Option<Arc<dyn TenderApi>>,
        archive: Option<Arc<dyn TenderApi>>,
        retry: RetryPolicy,
    ) -> Self {
        let mut resolver = ReferenceResolver::new(self.store.clone(), retry);
        if let Some(client) = tenders {
            self.feeds.push(client.clone());
            resolver = resolver.with_tenders(client);
        }
        if let Some(client) = archive {
            self.feeds.push(client.clone());
            resolver = resolver.with_archive(client);
        }
        self.resolver = resolver;
        self
    }

    pub fn with_policy(mut self, policy: TrustPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Build the service described by `config`: open the engine, load the
    /// trusted directories, connect the feeds and load `admin/*` records.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = open_engine(&config.database).await?;
        let seed = loader::load_seed(config.keyring.as_deref(), config.schemas.as_deref())?;
        let client = |c: &tenderwatch_sync::ClientConfig| -> Arc<dyn TenderApi> {
            Arc::new(HttpTenderClient::new(c.clone()))
        };
        let service = Self::new(store, seed)
            .with_feeds(
                config.tenders.as_ref().map(client),
                config.archive.as_ref().map(client),
                config.retry.clone(),
            )
            .readonly(config.readonly);
        service.refresh().await?;
        Ok(service)
    }

    pub fn store(&self) -> &Arc<dyn Engine> {
        &self.store
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// The current trust state.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Run every check on a raw record without storing it.
    pub async fn validate(&self, raw: &Value) -> Result<Record> {
        let snapshot = self.snapshot();
        let record = validate_envelope(raw, &snapshot.keyring, date::now(), &self.policy)?;
        self.resolver.check(&record.envelope, &snapshot.schemas).await?;
        Ok(record)
    }

    /// Validate and, unless `nosave`, store a record.
    pub async fn put(&self, raw: &Value, nosave: bool) -> Result<PutOutcome> {
        if self.readonly {
            return Err(ServiceError::ReadOnly);
        }
        let record = self.validate(raw).await?;
        let id = record.id.to_string();
        if nosave {
            tracing::debug!(id = %id, owner = record.owner(), "validated without saving");
            return Ok(PutOutcome::Validated(id));
        }

        self.store.put_record(&record).await?;
        tracing::info!(id = %id, owner = record.owner(), model = record.model(), "record stored");

        if record.model().starts_with("admin/") {
            self.refresh().await?;
        }
        Ok(PutOutcome::Created(id))
    }

    /// Rebuild the trust state from the seed plus every stored `admin/*`
    /// record, in insertion order.
    pub async fn refresh(&self) -> Result<()> {
        let mut next = self.seed.clone();
        let mut query = ListQuery::after(None, WALK_PAGE);
        loop {
            let page = self.store.list(Table::Data, &query).await?;
            if page.is_empty() {
                break;
            }
            let docs = self.store.get_many(Table::Data, &page.ids).await?;
            let mut admin: Vec<Record> = Vec::new();
            for doc in docs {
                if !doc.model().is_some_and(|m| m.starts_with("admin/")) {
                    continue;
                }
                match Record::from_value(doc.into_value()) {
                    Ok(record) => admin.push(record),
                    Err(e) => tracing::warn!(error = %e, "skipping malformed admin record"),
                }
            }
            admin.sort_by_key(|r| page.ids.iter().position(|id| id == r.id.as_str()));
            for record in &admin {
                if let Err(e) = next.apply(record) {
                    tracing::warn!(id = %record.id, model = record.model(), error = %e, "admin record not applied");
                }
            }
            query.cursor = page.next;
        }

        tracing::info!(
            owners = next.keyring.len(),
            keys = next.keyring.key_count(),
            schemas = next.schemas.len(),
            "trust state loaded"
        );
        let next = Arc::new(next);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get(&self, id: &str) -> Result<Option<Record>> {
        Ok(self.store.get_record(id).await?)
    }

    /// The stored subset of `ids`, in request order.
    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<Record>> {
        if ids.len() > MAX_BATCH_IDS {
            return Err(StoreError::TooManyIds(ids.len()).into());
        }
        Ok(self.store.get_records(ids).await?)
    }

    pub async fn list(&self, query: &ListQuery) -> Result<ListPage> {
        Ok(self.store.list(Table::Data, query).await?)
    }

    /// Close the feed clients and the engine.
    pub async fn close(&self) -> Result<()> {
        for feed in &self.feeds {
            feed.close().await;
        }
        Ok(self.store.close().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tenderwatch_core::{canonical_json, content_hash, Keypair};
    use tenderwatch_store::MemoryEngine;

    fn signer() -> Keypair {
        Keypair::from_seed(&[7u8; 32])
    }

    fn sign(keypair: &Keypair, envelope: Value) -> Value {
        let bytes = canonical_json(&envelope);
        json!({
            "id": content_hash(&bytes).to_string(),
            "envelope": envelope,
            "sign": keypair.sign(&bytes).to_base64(),
        })
    }

    fn root_key(keypair: &Keypair) -> Value {
        sign(
            keypair,
            json!({
                "model": "admin/pubkey",
                "owner": "root",
                "date": "2020-01-01T00:00:00Z",
                "payload": {
                    "owner": "root",
                    "publicKey": keypair.public_key().to_hex(),
                    "validSince": "2000-01-01T00:00:00Z",
                    "validTill": "2100-01-01T00:00:00Z"
                }
            }),
        )
    }

    fn schema_record(keypair: &Keypair) -> Value {
        sign(
            keypair,
            json!({
                "model": "admin/schema",
                "owner": "root",
                "date": date::now().to_rfc3339(),
                "payload": {
                    "model": "comment/comment",
                    "schema": {"required": ["comment"], "properties": {"comment": {"type": "string"}}}
                }
            }),
        )
    }

    async fn service() -> Service {
        let keypair = signer();
        let store: Arc<dyn Engine> = Arc::new(MemoryEngine::new());
        let root = Record::from_value(root_key(&keypair)).unwrap();
        store.put_record(&root).await.unwrap();
        let service = Service::new(store, Snapshot::default());
        service.refresh().await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_refresh_loads_stored_keys() {
        let service = service().await;
        assert!(service.snapshot().keyring.knows("root"));
        assert!(service.snapshot().schemas.is_empty());
    }

    #[tokio::test]
    async fn test_schema_write_refreshes_snapshot() {
        let service = service().await;
        let keypair = signer();
        let before = service.snapshot();

        let outcome = service.put(&schema_record(&keypair), false).await.unwrap();
        assert!(matches!(outcome, PutOutcome::Created(_)));
        assert!(service.snapshot().schemas.contains("comment"));
        // Readers holding the old snapshot keep a consistent view.
        assert!(before.schemas.is_empty());

        let comment = sign(
            &keypair,
            json!({
                "model": "comment/comment",
                "owner": "root",
                "date": date::now().to_rfc3339(),
                "payload": {"comment": "ok"}
            }),
        );
        assert!(service.put(&comment, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_nosave_and_duplicate() {
        let service = service().await;
        let record = schema_record(&signer());

        let outcome = service.put(&record, true).await.unwrap();
        assert!(matches!(outcome, PutOutcome::Validated(_)));
        assert!(service.get(record["id"].as_str().unwrap()).await.unwrap().is_none());

        service.put(&record, false).await.unwrap();
        let err = service.put(&record, false).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
        // Re-validating a stored record still succeeds.
        assert!(service.put(&record, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_readonly_refuses_writes() {
        let service = service().await.readonly(true);
        let err = service.put(&schema_record(&signer()), true).await.unwrap_err();
        assert!(matches!(err, ServiceError::ReadOnly));
    }

    #[tokio::test]
    async fn test_get_many_keeps_request_order() {
        let service = service().await;
        let keypair = signer();
        let schema = schema_record(&keypair);
        service.put(&schema, false).await.unwrap();
        let root_id = root_key(&keypair)["id"].as_str().unwrap().to_owned();
        let schema_id = schema["id"].as_str().unwrap().to_owned();

        let ids = vec![schema_id.clone(), "f".repeat(32), root_id.clone()];
        let records = service.get_many(&ids).await.unwrap();
        let got: Vec<_> = records.iter().map(|r| r.id.to_string()).collect();
        assert_eq!(got, vec![schema_id, root_id]);

        let too_many = vec!["0".repeat(32); MAX_BATCH_IDS + 1];
        assert!(matches!(
            service.get_many(&too_many).await,
            Err(ServiceError::Store(StoreError::TooManyIds(_)))
        ));
    }
}
