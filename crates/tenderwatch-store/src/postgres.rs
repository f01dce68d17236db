//! PostgreSQL implementation of the Engine trait.
//!
//! A single `PgConnection` behind an async mutex. Documents live in a JSONB
//! column; schema records pass through the reserved-key [`codec`] on their way
//! in and out.
//!
//! ## Reconnects
//!
//! - A request that fails with a connection-class error reconnects once and
//!   retries; if reconnecting fails it returns
//!   [`StoreError::BackendUnavailable`].
//! - With keep-alive enabled, a background task pings the connection every
//!   interval and reconnects when the ping fails. Its errors are logged and
//!   swallowed. Reconnects happen while holding the connection mutex, so at
//!   most one is ever in flight.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{Connection, PgConnection, Row};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::clock::MonotonicClock;
use crate::codec;
use crate::document::{check_model, Document, ListPage, ListQuery, Table, MAX_BATCH_IDS};
use crate::error::{Result, StoreError};
use crate::shutdown::{self, Shutdown, ShutdownTrigger};
use crate::traits::Engine;

/// Upper bound on establishing a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type PgFuture<'c, T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, sqlx::Error>> + Send + 'c>>;

/// Connection options for [`PostgresEngine`].
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    pub url: String,
    /// Interval of the background ping; `None` disables keep-alive.
    pub keep_alive: Option<Duration>,
}

struct KeepAlive {
    trigger: ShutdownTrigger,
    handle: JoinHandle<()>,
}

/// PostgreSQL-based engine.
pub struct PostgresEngine {
    url: String,
    conn: Arc<Mutex<Option<PgConnection>>>,
    clock: MonotonicClock,
    keep_alive: std::sync::Mutex<Option<KeepAlive>>,
    closed: AtomicBool,
}

impl PostgresEngine {
    /// Connect, create missing tables, and start keep-alive if configured.
    pub async fn connect(options: PostgresOptions) -> Result<Self> {
        let conn = establish(&options.url).await?;
        let engine = Self {
            url: options.url,
            conn: Arc::new(Mutex::new(Some(conn))),
            clock: MonotonicClock::new(),
            keep_alive: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        };
        engine.init_schema(false).await?;

        if let Some(interval) = options.keep_alive {
            let (trigger, listener) = shutdown::channel();
            let handle = tokio::spawn(keep_alive_loop(
                engine.conn.clone(),
                engine.url.clone(),
                interval,
                listener,
            ));
            if let Ok(mut slot) = engine.keep_alive.lock() {
                *slot = Some(KeepAlive { trigger, handle });
            }
        }

        Ok(engine)
    }

    /// Run `op` on the live connection, reconnecting once on connection loss.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: for<'c> Fn(&'c mut PgConnection) -> PgFuture<'c, T> + Send + Sync,
        T: Send,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(establish(&self.url).await?);
        }

        let first = match guard.as_mut() {
            Some(conn) => op(conn).await,
            None => return Err(StoreError::BackendUnavailable("no connection".into())),
        };
        match first {
            Err(e) if is_connection_error(&e) => {
                tracing::warn!(error = %e, "postgres connection lost, reconnecting");
                *guard = None;
                let conn = guard.insert(establish(&self.url).await?);
                op(conn).await.map_err(StoreError::from)
            }
            other => other.map_err(StoreError::from),
        }
    }
}

async fn establish(url: &str) -> Result<PgConnection> {
    match tokio::time::timeout(CONNECT_TIMEOUT, PgConnection::connect(url)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(StoreError::BackendUnavailable(e.to_string())),
        Err(_) => Err(StoreError::BackendUnavailable("connect timed out".into())),
    }
}

fn is_connection_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut => true,
        // Class 08: connection exception; 57P01: admin shutdown.
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| code.starts_with("08") || code == "57P01"),
        _ => false,
    }
}

fn is_unique_violation(e: &StoreError) -> bool {
    matches!(e, StoreError::Postgres(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23505"))
}

async fn keep_alive_loop(
    conn: Arc<Mutex<Option<PgConnection>>>,
    url: String,
    interval: Duration,
    mut shutdown: Shutdown,
) {
    tracing::debug!(?interval, "postgres keep-alive started");
    while shutdown.sleep(interval).await {
        let mut guard = conn.lock().await;
        let healthy = match guard.as_mut() {
            Some(c) => match c.ping().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "postgres keep-alive ping failed");
                    false
                }
            },
            None => false,
        };
        if healthy {
            continue;
        }
        *guard = None;
        match establish(&url).await {
            Ok(fresh) => {
                *guard = Some(fresh);
                tracing::info!("postgres keep-alive reconnected");
            }
            Err(e) => tracing::error!(error = %e, "postgres keep-alive reconnect failed"),
        }
    }
    tracing::debug!("postgres keep-alive stopped");
}

fn row_doc(row: &sqlx::postgres::PgRow) -> std::result::Result<Value, sqlx::Error> {
    Ok(row.try_get::<Json<Value>, _>("doc")?.0)
}

fn decode_doc(value: Value) -> Result<Document> {
    codec::decode(Document::from_value(value)?)
}

#[async_trait]
impl Engine for PostgresEngine {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn init_schema(&self, drop_existing: bool) -> Result<()> {
        self.run(move |conn| {
            Box::pin(async move {
                for table in Table::ALL {
                    let name = table.as_str();
                    if drop_existing {
                        sqlx::query(&format!("DROP TABLE IF EXISTS {name}"))
                            .execute(&mut *conn)
                            .await?;
                    }
                    sqlx::query(&format!(
                        "CREATE TABLE IF NOT EXISTS {name} (
                            id TEXT PRIMARY KEY,
                            ts DOUBLE PRECISION NOT NULL,
                            model TEXT,
                            doc JSONB NOT NULL
                        )"
                    ))
                    .execute(&mut *conn)
                    .await?;
                    sqlx::query(&format!(
                        "CREATE INDEX IF NOT EXISTS {name}_ts_idx ON {name} (ts)"
                    ))
                    .execute(&mut *conn)
                    .await?;
                }
                Ok(())
            })
        })
        .await?;

        let max = self
            .run(|conn| {
                Box::pin(async move {
                    let row = sqlx::query(
                        "SELECT GREATEST(
                            (SELECT MAX(ts) FROM data),
                            (SELECT MAX(ts) FROM tenders)
                        ) AS ts",
                    )
                    .fetch_one(&mut *conn)
                    .await?;
                    row.try_get::<Option<f64>, _>("ts")
                })
            })
            .await?;
        self.clock.observe(max.unwrap_or(0.0));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let keep_alive = self.keep_alive.lock().ok().and_then(|mut slot| slot.take());
        if let Some(KeepAlive { trigger, handle }) = keep_alive {
            trigger.trigger();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "postgres keep-alive task failed");
            }
        }
        if let Some(conn) = self.conn.lock().await.take() {
            if let Err(e) = conn.close().await {
                tracing::warn!(error = %e, "postgres close failed");
            }
        }
        Ok(())
    }

    async fn put(&self, table: Table, doc: &Document) -> Result<()> {
        let stored = codec::encode(doc)?;
        let id = stored.id().to_owned();
        let model = stored.model().map(str::to_owned);
        let value = stored.into_value();

        // Hold the clock inside the connection lock so `ts` follows insert order.
        let result = self
            .run(|conn| {
                let ts = self.clock.next();
                let id = id.clone();
                let model = model.clone();
                let value = value.clone();
                Box::pin(async move {
                    sqlx::query(&format!(
                        "INSERT INTO {} (id, ts, model, doc) VALUES ($1, $2, $3, $4)",
                        table.as_str()
                    ))
                    .bind(id)
                    .bind(ts)
                    .bind(model)
                    .bind(Json(value))
                    .execute(&mut *conn)
                    .await?;
                    Ok(())
                })
            })
            .await;

        match result {
            Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyExists(id)),
            other => other,
        }
    }

    async fn get(&self, table: Table, id: &str) -> Result<Option<Document>> {
        let value = self
            .run(|conn| {
                let id = id.to_owned();
                Box::pin(async move {
                    let row = sqlx::query(&format!("SELECT doc FROM {} WHERE id = $1", table.as_str()))
                        .bind(id)
                        .fetch_optional(&mut *conn)
                        .await?;
                    row.as_ref().map(row_doc).transpose()
                })
            })
            .await?;
        value.map(decode_doc).transpose()
    }

    async fn get_many(&self, table: Table, ids: &[String]) -> Result<Vec<Document>> {
        if ids.len() > MAX_BATCH_IDS {
            return Err(StoreError::TooManyIds(ids.len()));
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let values = self
            .run(|conn| {
                let ids = ids.to_vec();
                Box::pin(async move {
                    let rows = sqlx::query(&format!(
                        "SELECT doc FROM {} WHERE id = ANY($1)",
                        table.as_str()
                    ))
                    .bind(ids)
                    .fetch_all(&mut *conn)
                    .await?;
                    rows.iter().map(row_doc).collect::<std::result::Result<Vec<_>, _>>()
                })
            })
            .await?;
        values.into_iter().map(decode_doc).collect()
    }

    async fn exists(&self, table: Table, id: &str, expected_model: Option<&str>) -> Result<bool> {
        let found = self
            .run(|conn| {
                let id = id.to_owned();
                Box::pin(async move {
                    let row = sqlx::query(&format!("SELECT model FROM {} WHERE id = $1", table.as_str()))
                        .bind(id)
                        .fetch_optional(&mut *conn)
                        .await?;
                    row.map(|r| r.try_get::<Option<String>, _>("model")).transpose()
                })
            })
            .await?;
        match found {
            Some(model) => {
                check_model(id, model.as_deref(), expected_model)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, table: Table, query: &ListQuery) -> Result<ListPage> {
        let query = *query;
        let (cmp, order) = if query.reverse { ("<", "DESC") } else { (">", "ASC") };
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);

        let rows = self
            .run(move |conn| {
                Box::pin(async move {
                    let rows = match query.cursor {
                        Some(cursor) => {
                            sqlx::query(&format!(
                                "SELECT id, ts FROM {} WHERE ts {cmp} $1 ORDER BY ts {order} LIMIT $2",
                                table.as_str()
                            ))
                            .bind(cursor.ts())
                            .bind(limit)
                            .fetch_all(&mut *conn)
                            .await?
                        }
                        None => {
                            sqlx::query(&format!(
                                "SELECT id, ts FROM {} ORDER BY ts {order} LIMIT $1",
                                table.as_str()
                            ))
                            .bind(limit)
                            .fetch_all(&mut *conn)
                            .await?
                        }
                    };
                    rows.iter()
                        .map(|r| Ok((r.try_get::<String, _>("id")?, r.try_get::<f64, _>("ts")?)))
                        .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                })
            })
            .await?;

        Ok(ListPage::from_rows(rows))
    }
}

impl Drop for PostgresEngine {
    fn drop(&mut self) {
        // Dropping the trigger stops the keep-alive task.
        if let Ok(mut slot) = self.keep_alive.lock() {
            if let Some(keep_alive) = slot.take() {
                keep_alive.trigger.trigger();
            }
        }
    }
}
