//! SQLite implementation of the Engine trait.
//!
//! Uses rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`. Documents are kept as JSON text next to
//! their `ts` and `model` columns.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;

use crate::clock::MonotonicClock;
use crate::document::{check_model, Document, ListPage, ListQuery, Table, MAX_BATCH_IDS};
use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::Engine;

/// SQLite-based engine.
///
/// Thread-safe via internal Mutex. The connection slot is emptied on close.
pub struct SqliteEngine {
    conn: Arc<Mutex<Option<Connection>>>,
    clock: Arc<MonotonicClock>,
}

impl SqliteEngine {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migration::migrate(&mut conn)?;
        let clock = MonotonicClock::new();
        clock.observe(max_ts(&conn)?);
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            clock: Arc::new(clock),
        })
    }

    /// Execute a blocking operation on the connection.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection, &MonotonicClock) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let clock = self.clock.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Internal(format!("mutex poisoned: {e}")))?;
            let conn = guard.as_mut().ok_or(StoreError::Closed)?;
            f(conn, &clock)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("spawn_blocking failed: {e}")))?
    }
}

/// Largest `ts` across all tables, or 0.
fn max_ts(conn: &Connection) -> Result<f64> {
    let mut max = 0.0f64;
    for table in Table::ALL {
        let ts: Option<f64> = conn.query_row(
            &format!("SELECT MAX(ts) FROM {}", table.as_str()),
            [],
            |row| row.get(0),
        )?;
        max = max.max(ts.unwrap_or(0.0));
    }
    Ok(max)
}

fn parse_doc(text: &str) -> Result<Document> {
    let value: Value = serde_json::from_str(text)?;
    Document::from_value(value)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl Engine for SqliteEngine {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn init_schema(&self, drop_existing: bool) -> Result<()> {
        self.with_conn(move |conn, clock| {
            if drop_existing {
                migration::drop_all(conn)?;
            }
            migration::migrate(conn)?;
            clock.observe(max_ts(conn)?);
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Internal(format!("mutex poisoned: {e}")))?;
            if let Some(conn) = guard.take() {
                conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(format!("spawn_blocking failed: {e}")))?
    }

    async fn put(&self, table: Table, doc: &Document) -> Result<()> {
        let id = doc.id().to_owned();
        let model = doc.model().map(str::to_owned);
        let text = serde_json::to_string(doc.as_map())?;

        self.with_conn(move |conn, clock| {
            let ts = clock.next();
            let sql = format!(
                "INSERT INTO {} (id, ts, model, doc) VALUES (?1, ?2, ?3, ?4)",
                table.as_str()
            );
            match conn.execute(&sql, params![id, ts, model, text]) {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyExists(id)),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get(&self, table: Table, id: &str) -> Result<Option<Document>> {
        let id = id.to_owned();
        self.with_conn(move |conn, _| {
            let text: Option<String> = conn
                .query_row(
                    &format!("SELECT doc FROM {} WHERE id = ?1", table.as_str()),
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            text.as_deref().map(parse_doc).transpose()
        })
        .await
    }

    async fn get_many(&self, table: Table, ids: &[String]) -> Result<Vec<Document>> {
        if ids.len() > MAX_BATCH_IDS {
            return Err(StoreError::TooManyIds(ids.len()));
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = ids.to_vec();
        self.with_conn(move |conn, _| {
            let placeholders = vec!["?"; ids.len()].join(",");
            let mut stmt = conn.prepare(&format!(
                "SELECT doc FROM {} WHERE id IN ({placeholders})",
                table.as_str()
            ))?;
            let texts = stmt
                .query_map(params_from_iter(ids.iter()), |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            texts.iter().map(|t| parse_doc(t)).collect()
        })
        .await
    }

    async fn exists(&self, table: Table, id: &str, expected_model: Option<&str>) -> Result<bool> {
        let id = id.to_owned();
        let expected = expected_model.map(str::to_owned);
        self.with_conn(move |conn, _| {
            let found: Option<Option<String>> = conn
                .query_row(
                    &format!("SELECT model FROM {} WHERE id = ?1", table.as_str()),
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            match found {
                Some(model) => {
                    check_model(&id, model.as_deref(), expected.as_deref())?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
        .await
    }

    async fn list(&self, table: Table, query: &ListQuery) -> Result<ListPage> {
        let query = *query;
        self.with_conn(move |conn, _| {
            let (cmp, order) = if query.reverse {
                ("<", "DESC")
            } else {
                (">", "ASC")
            };
            let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
            let rows = match query.cursor {
                Some(cursor) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT id, ts FROM {} WHERE ts {cmp} ?1 ORDER BY ts {order} LIMIT ?2",
                        table.as_str()
                    ))?;
                    let rows = stmt
                        .query_map(params![cursor.ts(), limit], |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                        })?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT id, ts FROM {} ORDER BY ts {order} LIMIT ?1",
                        table.as_str()
                    ))?;
                    let rows = stmt
                        .query_map(params![limit], |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                        })?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
            };
            Ok(ListPage::from_rows(rows))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, model: &str) -> Document {
        Document::from_value(json!({"id": id, "envelope": {"model": model, "payload": {"n": "тест"}}}))
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let engine = SqliteEngine::open_memory().unwrap();
        let d = doc("a1", "form/test");
        engine.put(Table::Data, &d).await.unwrap();
        assert_eq!(engine.get(Table::Data, "a1").await.unwrap(), Some(d));
        assert_eq!(engine.get(Table::Data, "zz").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let engine = SqliteEngine::open_memory().unwrap();
        engine.put(Table::Data, &doc("a1", "form/test")).await.unwrap();
        let err = engine.put(Table::Data, &doc("a1", "form/other")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == "a1"));
        let stored = engine.get(Table::Data, "a1").await.unwrap().unwrap();
        assert_eq!(stored.model(), Some("form/test"));
    }

    #[tokio::test]
    async fn test_exists_with_model() {
        let engine = SqliteEngine::open_memory().unwrap();
        engine.put(Table::Data, &doc("a1", "admin/schema")).await.unwrap();
        assert!(engine.exists(Table::Data, "a1", Some("admin/schema")).await.unwrap());
        assert!(!engine.exists(Table::Data, "a2", Some("admin/schema")).await.unwrap());
        assert!(matches!(
            engine.exists(Table::Data, "a1", Some("comment")).await,
            Err(StoreError::ModelMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tw.db");

        let engine = SqliteEngine::open(&path).unwrap();
        engine.put(Table::Data, &doc("a1", "form/test")).await.unwrap();
        let before = engine.list(Table::Data, &ListQuery::default()).await.unwrap();
        engine.close().await.unwrap();
        engine.close().await.unwrap();
        assert!(matches!(engine.get(Table::Data, "a1").await, Err(StoreError::Closed)));

        let reopened = SqliteEngine::open(&path).unwrap();
        reopened.put(Table::Data, &doc("a2", "form/test")).await.unwrap();
        let page = reopened.list(Table::Data, &ListQuery::default()).await.unwrap();
        assert_eq!(page.ids, vec!["a1", "a2"]);
        assert!(page.next.unwrap().ts() > before.next.unwrap().ts());
    }
}
