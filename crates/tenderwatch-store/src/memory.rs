//! In-memory implementation of the Engine trait.
//!
//! Same observable semantics as the persistent backends, nothing survives
//! the process. Used by tests and by `database.engine = "memory"`. Once
//! closed, every operation fails with [`StoreError::Closed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::clock::MonotonicClock;
use crate::document::{check_model, Document, ListPage, ListQuery, Table, MAX_BATCH_IDS};
use crate::error::{Result, StoreError};
use crate::traits::Engine;

/// In-memory engine. Thread-safe via RwLock.
pub struct MemoryEngine {
    inner: RwLock<HashMap<Table, MemoryTable>>,
    clock: MonotonicClock,
    closed: AtomicBool,
}

#[derive(Default)]
struct MemoryTable {
    docs: HashMap<String, Document>,
    /// `(ts, id)` in insertion order, which is ascending `ts`.
    order: Vec<(f64, String)>,
}

impl MemoryEngine {
    /// Create a new empty engine with both tables present.
    pub fn new() -> Self {
        let tables = Table::ALL
            .into_iter()
            .map(|t| (t, MemoryTable::default()))
            .collect();
        Self {
            inner: RwLock::new(tables),
            clock: MonotonicClock::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<Table, MemoryTable>>> {
        self.ensure_open()?;
        self.inner
            .read()
            .map_err(|e| StoreError::Internal(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<Table, MemoryTable>>> {
        self.ensure_open()?;
        self.inner
            .write()
            .map_err(|e| StoreError::Internal(format!("lock poisoned: {e}")))
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn init_schema(&self, drop_existing: bool) -> Result<()> {
        let mut tables = self.write()?;
        for table in Table::ALL {
            let entry = tables.entry(table).or_default();
            if drop_existing {
                *entry = MemoryTable::default();
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut tables) = self.inner.write() {
            tables.clear();
        }
        Ok(())
    }

    async fn put(&self, table: Table, doc: &Document) -> Result<()> {
        let mut tables = self.write()?;
        let t = tables.entry(table).or_default();
        if t.docs.contains_key(doc.id()) {
            return Err(StoreError::AlreadyExists(doc.id().to_owned()));
        }
        let ts = self.clock.next();
        t.order.push((ts, doc.id().to_owned()));
        t.docs.insert(doc.id().to_owned(), doc.clone());
        Ok(())
    }

    async fn get(&self, table: Table, id: &str) -> Result<Option<Document>> {
        let tables = self.read()?;
        Ok(tables.get(&table).and_then(|t| t.docs.get(id)).cloned())
    }

    async fn get_many(&self, table: Table, ids: &[String]) -> Result<Vec<Document>> {
        self.ensure_open()?;
        if ids.len() > MAX_BATCH_IDS {
            return Err(StoreError::TooManyIds(ids.len()));
        }
        let tables = self.read()?;
        let Some(t) = tables.get(&table) else {
            return Ok(Vec::new());
        };
        let mut seen = std::collections::HashSet::new();
        Ok(ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| t.docs.get(id).cloned())
            .collect())
    }

    async fn exists(&self, table: Table, id: &str, expected_model: Option<&str>) -> Result<bool> {
        let tables = self.read()?;
        match tables.get(&table).and_then(|t| t.docs.get(id)) {
            Some(doc) => {
                check_model(id, doc.model(), expected_model)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, table: Table, query: &ListQuery) -> Result<ListPage> {
        let tables = self.read()?;
        let Some(t) = tables.get(&table) else {
            return Ok(ListPage::default());
        };

        let rows: Vec<(String, f64)> = if query.reverse {
            let end = match query.cursor {
                Some(c) => t.order.partition_point(|(ts, _)| *ts < c.ts()),
                None => t.order.len(),
            };
            t.order[..end]
                .iter()
                .rev()
                .take(query.limit)
                .map(|(ts, id)| (id.clone(), *ts))
                .collect()
        } else {
            let start = match query.cursor {
                Some(c) => t.order.partition_point(|(ts, _)| *ts <= c.ts()),
                None => 0,
            };
            t.order[start..]
                .iter()
                .take(query.limit)
                .map(|(ts, id)| (id.clone(), *ts))
                .collect()
        };

        Ok(ListPage::from_rows(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str) -> Document {
        Document::from_value(json!({"id": id, "envelope": {"model": "form/test"}})).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_duplicate() {
        let engine = MemoryEngine::new();
        engine.put(Table::Data, &doc("a")).await.unwrap();
        assert!(matches!(
            engine.put(Table::Data, &doc("a")).await,
            Err(StoreError::AlreadyExists(id)) if id == "a"
        ));
        assert_eq!(engine.get(Table::Data, "a").await.unwrap(), Some(doc("a")));
        assert_eq!(engine.get(Table::Tenders, "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_open_boundary() {
        let engine = MemoryEngine::new();
        for id in ["a", "b", "c", "d"] {
            engine.put(Table::Data, &doc(id)).await.unwrap();
        }
        let first = engine.list(Table::Data, &ListQuery::after(None, 2)).await.unwrap();
        assert_eq!(first.ids, vec!["a", "b"]);
        let second = engine
            .list(Table::Data, &ListQuery::after(first.next, 2))
            .await
            .unwrap();
        assert_eq!(second.ids, vec!["c", "d"]);
        let back = engine
            .list(Table::Data, &ListQuery::after(second.prev, 10).reversed())
            .await
            .unwrap();
        assert_eq!(back.ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_init_schema_drop() {
        let engine = MemoryEngine::new();
        engine.put(Table::Data, &doc("a")).await.unwrap();
        engine.init_schema(false).await.unwrap();
        assert!(engine.exists(Table::Data, "a", None).await.unwrap());
        engine.init_schema(true).await.unwrap();
        assert!(!engine.exists(Table::Data, "a", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_engine_refuses() {
        let engine = MemoryEngine::new();
        engine.put(Table::Data, &doc("a")).await.unwrap();
        engine.close().await.unwrap();
        assert!(matches!(engine.get(Table::Data, "a").await, Err(StoreError::Closed)));
        assert!(matches!(engine.put(Table::Data, &doc("b")).await, Err(StoreError::Closed)));
        assert!(matches!(engine.init_schema(false).await, Err(StoreError::Closed)));
        engine.close().await.unwrap();
    }
}
