//! Sync crawler: mirrors the external tender feed into the `tenders` table.
//!
//! ## Overview
//!
//! A run keeps two cursors on the same feed:
//!
//! - **backward** starts at the head in the configured direction and walks
//!   the history until it returns an empty page, then retires;
//! - **forward** is primed with one request, switched to ascending order and
//!   follows new changes for the rest of the run.
//!
//! Every fetched tender is inserted only if its id is not mirrored yet. Two
//! empty pages in a row cost one unit of the query budget and an idle sleep;
//! the run ends when the budget is spent. [`run_loop`] restarts failed runs
//! after a cooldown, with fresh feed and store handles each time.
//!
//! Every sleep and request is raced against the [`Shutdown`] listener.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use tenderwatch_store::{Engine, RecordStore, Shutdown};

use crate::client::{FeedCursor, TenderApi};
use crate::error::Result;

/// The `[sync]` configuration section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Idle polls allowed before a run ends.
    pub query_limit: u32,
    /// Sleep after a poll where both pages were empty.
    pub idle_sleep_secs: f64,
    /// Sleep between productive polls.
    pub poll_interval_secs: f64,
    /// Wait before restarting a failed run.
    pub cooldown_secs: f64,
    /// Tenders with an older `dateModified` are not mirrored.
    pub min_date_modified: Option<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            query_limit: 2000,
            idle_sleep_secs: 10.0,
            poll_interval_secs: 1.0,
            cooldown_secs: 10.0,
            min_date_modified: None,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

/// Counters of one or more runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Items received from the feed.
    pub fetched: usize,
    /// Items newly written to the mirror.
    pub inserted: usize,
    /// Items filtered out (too old or without id).
    pub skipped: usize,
    pub idle_polls: u32,
    /// Runs that ended in an error and were restarted.
    pub failed_runs: usize,
    /// Shutdown cut the run short.
    pub interrupted: bool,
}

impl CrawlReport {
    fn absorb(&mut self, other: &CrawlReport) {
        self.fetched += other.fetched;
        self.inserted += other.inserted;
        self.skipped += other.skipped;
        self.idle_polls += other.idle_polls;
        self.failed_runs += other.failed_runs;
        self.interrupted |= other.interrupted;
    }
}

/// One crawler run over a feed and a store.
pub struct Crawler {
    api: Arc<dyn TenderApi>,
    store: Arc<dyn Engine>,
    config: CrawlerConfig,
}

/// Await `$fut` unless shutdown fires first, in which case the run returns.
macro_rules! guarded {
    ($shutdown:expr, $report:expr, $fut:expr) => {
        match $shutdown.guard($fut).await {
            Some(out) => out?,
            None => {
                $report.interrupted = true;
                return Ok($report);
            }
        }
    };
}

impl Crawler {
    pub fn new(api: Arc<dyn TenderApi>, store: Arc<dyn Engine>, config: CrawlerConfig) -> Self {
        Self { api, store, config }
    }

    /// Crawl until the idle budget is spent or shutdown fires.
    pub async fn run_once(&self, mut shutdown: Shutdown) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();
        let api = &*self.api;

        guarded!(shutdown, report, api.ping());

        let mut forward = FeedCursor::new(api.base_query());
        let mut backward = Some(FeedCursor::new(api.base_query()));

        // Position the forward cursor at the head, then follow changes.
        guarded!(shutdown, report, forward.next_page(api));
        forward.ascending();
        tracing::debug!(offset = ?forward.offset(), "forward cursor primed");

        let mut budget = self.config.query_limit;
        while budget > 0 {
            let fwd = guarded!(shutdown, report, forward.next_page(api));
            let bwd = match backward.as_mut() {
                Some(cursor) => {
                    let page = guarded!(shutdown, report, cursor.next_page(api));
                    if page.is_empty() {
                        tracing::info!("backward crawl complete");
                        backward = None;
                    }
                    page
                }
                None => Vec::new(),
            };

            if fwd.is_empty() && bwd.is_empty() {
                budget -= 1;
                report.idle_polls += 1;
                tracing::info!(budget, "nothing to update");
                if !shutdown.sleep(secs(self.config.idle_sleep_secs)).await {
                    report.interrupted = true;
                    break;
                }
                continue;
            }

            self.mirror("forward", fwd, &mut report).await?;
            self.mirror("backward", bwd, &mut report).await?;

            if !shutdown.sleep(secs(self.config.poll_interval_secs)).await {
                report.interrupted = true;
                break;
            }
        }

        Ok(report)
    }

    fn too_old(&self, tender: &Value) -> bool {
        let Some(min) = self.config.min_date_modified.as_deref() else {
            return false;
        };
        match tender.get("dateModified").and_then(Value::as_str) {
            Some(modified) => modified < min,
            None => true,
        }
    }

    async fn mirror(
        &self,
        direction: &'static str,
        items: Vec<Value>,
        report: &mut CrawlReport,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let fetched = items.len();
        let mut inserted = 0;
        let mut last = None;

        for tender in items {
            last = tender
                .get("dateModified")
                .and_then(Value::as_str)
                .map(str::to_owned);
            if self.too_old(&tender) {
                report.skipped += 1;
                continue;
            }
            if tender.get("id").and_then(Value::as_str).map_or(true, str::is_empty) {
                tracing::warn!(direction, "feed item without id skipped");
                report.skipped += 1;
                continue;
            }
            if self.store.save_tender(tender).await? {
                inserted += 1;
            }
        }

        report.fetched += fetched;
        report.inserted += inserted;
        tracing::info!(
            direction,
            fetched,
            inserted,
            last = last.as_deref().unwrap_or_default(),
            "mirrored page"
        );
        Ok(())
    }
}

/// Run the crawler until its budget is spent or shutdown fires.
///
/// `open` supplies a feed client and store for each attempt. Both are closed
/// after every attempt, successful or not; a failed attempt is followed by a
/// cooldown and a fresh attempt.
pub async fn run_loop<F, Fut>(config: CrawlerConfig, mut shutdown: Shutdown, mut open: F) -> CrawlReport
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(Arc<dyn TenderApi>, Arc<dyn Engine>)>>,
{
    let mut total = CrawlReport::default();

    while !shutdown.is_triggered() {
        let outcome = match open().await {
            Ok((api, store)) => {
                let crawler = Crawler::new(api.clone(), store.clone(), config.clone());
                let result = crawler.run_once(shutdown.clone()).await;
                api.close().await;
                if let Err(e) = store.close().await {
                    tracing::warn!(error = %e, "closing store failed");
                }
                result
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(report) => {
                total.absorb(&report);
                if !report.interrupted {
                    tracing::info!(inserted = total.inserted, "query budget spent, leaving loop");
                }
                break;
            }
            Err(e) => {
                total.failed_runs += 1;
                tracing::error!(error = %e, "crawler run failed");
                if !shutdown.sleep(secs(config.cooldown_secs)).await {
                    total.interrupted = true;
                    break;
                }
            }
        }
    }

    tracing::info!("crawler stopped");
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryFeed;
    use crate::error::FeedError;
    use serde_json::json;
    use tenderwatch_store::shutdown;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tenderwatch_store::{Document, ListPage, ListQuery, MemoryEngine, Table};

    fn fast_config(query_limit: u32) -> CrawlerConfig {
        CrawlerConfig {
            query_limit,
            idle_sleep_secs: 0.0,
            poll_interval_secs: 0.0,
            cooldown_secs: 0.0,
            min_date_modified: None,
        }
    }

    async fn feed_with(n: usize) -> MemoryFeed {
        let feed = MemoryFeed::new(2);
        for i in 0..n {
            feed.push(json!({
                "id": format!("t{i}"),
                "dateModified": format!("2024-01-{:02}T00:00:00", i + 1),
            }))
            .await;
        }
        feed
    }

    async fn mirrored(store: &MemoryEngine) -> Vec<String> {
        let mut ids = store
            .list(Table::Tenders, &ListQuery::after(None, 1000))
            .await
            .unwrap()
            .ids;
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_catches_up_without_duplicates() {
        let feed = feed_with(5).await;
        let store = Arc::new(MemoryEngine::new());
        let crawler = Crawler::new(Arc::new(feed.clone()), store.clone(), fast_config(2));

        let report = crawler.run_once(Shutdown::never()).await.unwrap();
        assert_eq!(mirrored(&store).await, vec!["t0", "t1", "t2", "t3", "t4"]);
        assert_eq!(report.inserted, 5);
        assert!(report.fetched >= 5);
        assert_eq!(report.idle_polls, 2);
        assert!(!report.interrupted);
    }

    #[tokio::test]
    async fn test_never_overwrites() {
        let feed = feed_with(2).await;
        let store = Arc::new(MemoryEngine::new());
        store
            .save_tender(json!({"id": "t0", "title": "local copy"}))
            .await
            .unwrap();

        let crawler = Crawler::new(Arc::new(feed), store.clone(), fast_config(1));
        let report = crawler.run_once(Shutdown::never()).await.unwrap();
        assert_eq!(report.inserted, 1);
        let kept = store.get(Table::Tenders, "t0").await.unwrap().unwrap();
        assert_eq!(kept.get("title"), Some(&json!("local copy")));
    }

    #[tokio::test]
    async fn test_min_date_modified() {
        let feed = feed_with(4).await;
        let store = Arc::new(MemoryEngine::new());
        let config = CrawlerConfig {
            min_date_modified: Some("2024-01-03".into()),
            ..fast_config(1)
        };
        Crawler::new(Arc::new(feed), store.clone(), config)
            .run_once(Shutdown::never())
            .await
            .unwrap();
        assert_eq!(mirrored(&store).await, vec!["t2", "t3"]);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_idle_sleep() {
        let feed = feed_with(0).await;
        let store = Arc::new(MemoryEngine::new());
        let config = CrawlerConfig {
            idle_sleep_secs: 3600.0,
            ..fast_config(5)
        };
        let (trigger, listener) = shutdown::channel();
        let crawler = Crawler::new(Arc::new(feed), store, config);
        let handle = tokio::spawn(async move { crawler.run_once(listener).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();
        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("crawler did not stop")
            .unwrap()
            .unwrap();
        assert!(report.interrupted);
    }

    /// A feed whose page requests never answer.
    struct StalledFeed {
        inner: MemoryFeed,
    }

    #[async_trait::async_trait]
    impl TenderApi for StalledFeed {
        async fn ping(&self) -> crate::client::FeedResult<()> {
            self.inner.ping().await
        }

        async fn fetch_page(
            &self,
            _query: &crate::client::FeedQuery,
        ) -> crate::client::FeedResult<crate::client::FeedPage> {
            std::future::pending().await
        }

        async fn get_tender(&self, id: &str) -> crate::client::FeedResult<Value> {
            self.inner.get_tender(id).await
        }

        fn base_query(&self) -> crate::client::FeedQuery {
            self.inner.base_query()
        }

        async fn close(&self) {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_pending_request() {
        let feed = feed_with(1).await;
        let store = Arc::new(MemoryEngine::new());
        let (trigger, listener) = shutdown::channel();

        let session = feed.clone();
        let handle = tokio::spawn(async move {
            run_loop(fast_config(5), listener, move || {
                let api: Arc<dyn TenderApi> = Arc::new(StalledFeed {
                    inner: session.clone(),
                });
                let store: Arc<dyn Engine> = store.clone();
                async move { Ok((api, store)) }
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
        let report = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("crawler kept waiting on the feed")
            .unwrap();
        assert!(report.interrupted);
        assert_eq!(report.failed_runs, 0);
        assert!(feed.is_closed());
    }

    /// One connection to a database shared across attempts: closing it
    /// leaves the data in place for the next one.
    struct Connection {
        db: Arc<MemoryEngine>,
        closed: AtomicBool,
    }

    impl Connection {
        fn open(db: &Arc<MemoryEngine>) -> Arc<Self> {
            Arc::new(Self {
                db: db.clone(),
                closed: AtomicBool::new(false),
            })
        }

        fn live(&self) -> tenderwatch_store::Result<&MemoryEngine> {
            if self.closed.load(Ordering::Acquire) {
                return Err(tenderwatch_store::StoreError::Closed);
            }
            Ok(&self.db)
        }
    }

    #[async_trait::async_trait]
    impl Engine for Connection {
        fn name(&self) -> &'static str {
            "connection"
        }

        async fn init_schema(&self, drop_existing: bool) -> tenderwatch_store::Result<()> {
            self.live()?.init_schema(drop_existing).await
        }

        async fn close(&self) -> tenderwatch_store::Result<()> {
            self.closed.store(true, Ordering::Release);
            Ok(())
        }

        async fn put(&self, table: Table, doc: &Document) -> tenderwatch_store::Result<()> {
            self.live()?.put(table, doc).await
        }

        async fn get(&self, table: Table, id: &str) -> tenderwatch_store::Result<Option<Document>> {
            self.live()?.get(table, id).await
        }

        async fn get_many(&self, table: Table, ids: &[String]) -> tenderwatch_store::Result<Vec<Document>> {
            self.live()?.get_many(table, ids).await
        }

        async fn exists(
            &self,
            table: Table,
            id: &str,
            expected_model: Option<&str>,
        ) -> tenderwatch_store::Result<bool> {
            self.live()?.exists(table, id, expected_model).await
        }

        async fn list(&self, table: Table, query: &ListQuery) -> tenderwatch_store::Result<ListPage> {
            self.live()?.list(table, query).await
        }
    }

    #[tokio::test]
    async fn test_run_loop_restarts_after_failure() {
        let feed = feed_with(3).await;
        feed.fail_next(FeedError::Status(503)).await;
        let db = Arc::new(MemoryEngine::new());

        let mut sessions = Vec::new();
        let mut connections = Vec::new();
        let report = run_loop(fast_config(1), Shutdown::never(), || {
            let session = feed.reopen();
            sessions.push(session.clone());
            let conn = Connection::open(&db);
            connections.push(conn.clone());
            let store: Arc<dyn Engine> = conn;
            async move { Ok((Arc::new(session) as Arc<dyn TenderApi>, store)) }
        })
        .await;

        assert_eq!(report.failed_runs, 1);
        assert_eq!(report.inserted, 3);
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(MemoryFeed::is_closed));
        assert!(connections.iter().all(|c| c.closed.load(Ordering::Acquire)));
        assert_eq!(mirrored(&db).await, vec!["t0", "t1", "t2"]);
    }

    #[tokio::test]
    async fn test_run_loop_stops_when_shutdown_already_triggered() {
        let (trigger, listener) = shutdown::channel();
        trigger.trigger();
        let mut opened = 0;
        let report = run_loop(fast_config(1), listener, || {
            opened += 1;
            async { Err(crate::error::SyncError::Feed(FeedError::Closed)) }
        })
        .await;
        assert_eq!(opened, 0);
        assert_eq!(report, CrawlReport::default());
    }
}
