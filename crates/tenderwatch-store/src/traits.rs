//! Engine trait: the single contract every storage backend satisfies.
//!
//! Callers hold an `Arc<dyn Engine>` and never learn which backend is behind
//! it. Observable behavior (ordering, open cursor boundaries, duplicate
//! rejection) must be identical across implementations; the conformance
//! suite in `tenderwatch-testkit` checks exactly that.

use async_trait::async_trait;
use serde_json::Value;

use tenderwatch_core::Record;

use crate::document::{Document, ListPage, ListQuery, Table};
use crate::error::{Result, StoreError};

/// Async interface of a storage backend.
///
/// # Design Notes
///
/// - **Append-only**: there is no update or delete. `put` of an existing id
///   fails with [`StoreError::AlreadyExists`] and leaves the stored copy alone.
/// - **Server timestamps**: `put` assigns `ts` from a monotonic clock, giving
///   every table a strict total order for pagination.
/// - **Open boundaries**: `list` excludes the document sitting exactly at the
///   cursor, so consecutive pages never repeat an item.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Backend name as configured (`memory`, `sqlite`, `postgres`).
    fn name(&self) -> &'static str;

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Create tables and `ts` indices, optionally dropping existing ones first.
    async fn init_schema(&self, drop_existing: bool) -> Result<()>;

    /// Release all resources. Idempotent.
    async fn close(&self) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Documents
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a document, assigning its `ts`.
    async fn put(&self, table: Table, doc: &Document) -> Result<()>;

    /// Fetch one document by id.
    async fn get(&self, table: Table, id: &str) -> Result<Option<Document>>;

    /// Fetch the subset of `ids` that exist, in no particular order.
    ///
    /// Fails with [`StoreError::TooManyIds`] above
    /// [`MAX_BATCH_IDS`](crate::document::MAX_BATCH_IDS).
    async fn get_many(&self, table: Table, ids: &[String]) -> Result<Vec<Document>>;

    /// Whether `id` is stored. With `expected_model`, a stored document of
    /// another model fails with [`StoreError::ModelMismatch`].
    async fn exists(&self, table: Table, id: &str, expected_model: Option<&str>) -> Result<bool>;

    /// One page of ids ordered by `ts`.
    async fn list(&self, table: Table, query: &ListQuery) -> Result<ListPage>;
}

/// Typed helpers over [`Engine`] for records and mirrored tenders.
pub trait RecordStore: Engine {
    /// Store a validated record in the `data` table.
    fn put_record(&self, record: &Record) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Load a record from the `data` table.
    fn get_record(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Record>>> + Send;

    /// Load the existing subset of `ids`, in the order of `ids`.
    fn get_records(
        &self,
        ids: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<Record>>> + Send;

    /// Mirror a tender: insert if absent, never overwrite.
    ///
    /// Returns `true` when the tender was inserted.
    fn save_tender(&self, tender: Value) -> impl std::future::Future<Output = Result<bool>> + Send;
}

impl<E: Engine + ?Sized> RecordStore for E {
    async fn put_record(&self, record: &Record) -> Result<()> {
        let doc = Document::from_value(record.to_value())?;
        self.put(Table::Data, &doc).await
    }

    async fn get_record(&self, id: &str) -> Result<Option<Record>> {
        match self.get(Table::Data, id).await? {
            Some(doc) => Ok(Some(decode_record(doc)?)),
            None => Ok(None),
        }
    }

    async fn get_records(&self, ids: &[String]) -> Result<Vec<Record>> {
        let docs = self.get_many(Table::Data, ids).await?;
        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            records.push(decode_record(doc)?);
        }
        // Backends return matches unordered; re-associate by id.
        records.sort_by_key(|r| ids.iter().position(|id| id == r.id.as_str()));
        Ok(records)
    }

    async fn save_tender(&self, tender: Value) -> Result<bool> {
        let doc = Document::from_value(tender)?;
        if self.exists(Table::Tenders, doc.id(), None).await? {
            return Ok(false);
        }
        match self.put(Table::Tenders, &doc).await {
            Ok(()) => Ok(true),
            Err(StoreError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn decode_record(doc: Document) -> Result<Record> {
    Record::from_value(doc.into_value()).map_err(|e| StoreError::InvalidData(e.to_string()))
}
