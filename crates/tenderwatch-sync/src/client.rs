//! Tender feed client.
//!
//! The external feed is a paginated change list: each page carries `data`
//! (tender stubs or full tenders) and a `next_page.offset` to continue from.
//! Single tenders are fetched by id. [`TenderApi`] is the seam between this
//! crate (and the reference resolver) and the network, so tests can swap in
//! [`memory::MemoryFeed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::FeedError;

/// Result type for feed calls.
pub type FeedResult<T> = std::result::Result<T, FeedError>;

/// A `[tenders]` or `[archive]` configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Collection URL, e.g. `https://host/api/2.4/tenders`.
    pub url: String,
    #[serde(default = "default_feed")]
    pub feed: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Newest first for the initial walk.
    #[serde(default = "default_descending")]
    pub descending: bool,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_feed() -> String {
    "changes".into()
}

fn default_limit() -> u32 {
    1000
}

fn default_mode() -> String {
    "_all_".into()
}

fn default_descending() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            feed: default_feed(),
            limit: default_limit(),
            mode: default_mode(),
            descending: default_descending(),
            timeout: default_timeout(),
        }
    }
}

/// Query parameters of one feed page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub offset: Option<String>,
    pub limit: u32,
    pub mode: String,
    pub feed: String,
    pub descending: bool,
}

impl FeedQuery {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            offset: None,
            limit: config.limit,
            mode: config.mode.clone(),
            feed: config.feed.clone(),
            descending: config.descending,
        }
    }

    /// Query-string pairs; `descending` is sent only when set.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("feed", self.feed.clone()),
            ("limit", self.limit.to_string()),
            ("mode", self.mode.clone()),
        ];
        if self.descending {
            params.push(("descending", "1".into()));
        }
        if let Some(offset) = &self.offset {
            params.push(("offset", offset.clone()));
        }
        params
    }
}

/// One page of the feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub data: Vec<Value>,
    /// Offset to request the following page with, if the feed sent one.
    pub next_offset: Option<String>,
}

impl FeedPage {
    /// Parse a `{data: [...], next_page?: {offset}}` response body.
    pub fn from_body(body: Value) -> FeedResult<Self> {
        let Value::Object(mut map) = body else {
            return Err(FeedError::Decode("page is not an object".into()));
        };
        let data = match map.remove("data") {
            Some(Value::Array(items)) => items,
            _ => return Err(FeedError::Decode("page has no data list".into())),
        };
        let next_offset = map
            .get("next_page")
            .and_then(|p| p.get("offset"))
            .and_then(|o| match o {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        Ok(Self { data, next_offset })
    }
}

/// Async interface of the external tender feed.
#[async_trait]
pub trait TenderApi: Send + Sync {
    /// Check the feed is reachable and answers with success.
    async fn ping(&self) -> FeedResult<()>;

    /// Fetch one page of the change feed.
    async fn fetch_page(&self, query: &FeedQuery) -> FeedResult<FeedPage>;

    /// Fetch one tender by id, unwrapped from its `{data: ...}` envelope.
    async fn get_tender(&self, id: &str) -> FeedResult<Value>;

    /// Base query for pages of this feed.
    fn base_query(&self) -> FeedQuery;

    /// Release the session. Later calls fail with [`FeedError::Closed`].
    async fn close(&self);
}

/// Walks a feed page by page, remembering the offset between calls.
#[derive(Debug, Clone)]
pub struct FeedCursor {
    query: FeedQuery,
}

impl FeedCursor {
    pub fn new(query: FeedQuery) -> Self {
        Self { query }
    }

    /// Switch to ascending order, keeping the current offset.
    pub fn ascending(&mut self) {
        self.query.descending = false;
    }

    pub fn offset(&self) -> Option<&str> {
        self.query.offset.as_deref()
    }

    /// Fetch the next page and advance past it.
    pub async fn next_page(&mut self, api: &dyn TenderApi) -> FeedResult<Vec<Value>> {
        let page = api.fetch_page(&self.query).await?;
        if let Some(offset) = page.next_offset {
            self.query.offset = Some(offset);
        }
        Ok(page.data)
    }
}

/// [`TenderApi`] over HTTP.
///
/// The underlying agent is created on first use and shared by every request
/// of this client. Calls run on the blocking pool.
pub struct HttpTenderClient {
    config: ClientConfig,
    agent: OnceLock<ureq::Agent>,
    closed: AtomicBool,
}

impl HttpTenderClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            agent: OnceLock::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn agent(&self) -> FeedResult<ureq::Agent> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FeedError::Closed);
        }
        let agent = self.agent.get_or_init(|| {
            let timeout = Duration::from_secs(self.config.timeout.max(1));
            tracing::debug!(url = %self.config.url, "creating feed session");
            ureq::AgentBuilder::new()
                .timeout_connect(timeout)
                .timeout_read(timeout)
                .timeout_write(timeout)
                .user_agent(concat!("tenderwatch/", env!("CARGO_PKG_VERSION")))
                .build()
        });
        Ok(agent.clone())
    }

    async fn request(
        &self,
        method: &'static str,
        url: String,
        params: Vec<(&'static str, String)>,
    ) -> FeedResult<Option<Value>> {
        let agent = self.agent()?;
        tokio::task::spawn_blocking(move || {
            let mut req = agent.request(method, &url);
            for (k, v) in &params {
                req = req.query(k, v);
            }
            match req.call() {
                Ok(_) if method == "HEAD" => Ok(None),
                Ok(resp) => resp
                    .into_json::<Value>()
                    .map(Some)
                    .map_err(|e| FeedError::Decode(e.to_string())),
                Err(ureq::Error::Status(code, _)) => Err(FeedError::Status(code)),
                Err(ureq::Error::Transport(transport)) => {
                    Err(FeedError::Transport(transport.to_string()))
                }
            }
        })
        .await
        .map_err(|e| FeedError::Transport(format!("request task failed: {e}")))?
    }
}

#[async_trait]
impl TenderApi for HttpTenderClient {
    async fn ping(&self) -> FeedResult<()> {
        let params = self.base_query().params();
        self.request("HEAD", self.config.url.clone(), params).await?;
        Ok(())
    }

    async fn fetch_page(&self, query: &FeedQuery) -> FeedResult<FeedPage> {
        let body = self
            .request("GET", self.config.url.clone(), query.params())
            .await?
            .ok_or_else(|| FeedError::Decode("empty response".into()))?;
        FeedPage::from_body(body)
    }

    async fn get_tender(&self, id: &str) -> FeedResult<Value> {
        let url = format!("{}/{}", self.config.url.trim_end_matches('/'), id);
        let body = self
            .request("GET", url, Vec::new())
            .await?
            .ok_or_else(|| FeedError::Decode("empty response".into()))?;
        match body {
            Value::Object(mut map) => map
                .remove("data")
                .filter(Value::is_object)
                .ok_or_else(|| FeedError::Decode("tender has no data object".into())),
            _ => Err(FeedError::Decode("tender is not an object".into())),
        }
    }

    fn base_query(&self) -> FeedQuery {
        FeedQuery::from_config(&self.config)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(url = %self.config.url, "feed session closed");
        }
    }
}

/// An in-memory feed for testing.
///
/// Tenders are kept in modification order; offsets are positions in that
/// order. Failures can be queued to exercise retry paths.
pub mod memory {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FeedState {
        tenders: Vec<Value>,
        failures: VecDeque<FeedError>,
        requests: usize,
    }

    /// Cloneable handle to a shared in-memory feed.
    #[derive(Clone)]
    pub struct MemoryFeed {
        state: Arc<Mutex<FeedState>>,
        closed: Arc<AtomicBool>,
        limit: u32,
        descending: bool,
        mode: String,
    }

    impl MemoryFeed {
        pub fn new(limit: u32) -> Self {
            Self {
                state: Arc::default(),
                closed: Arc::default(),
                limit,
                descending: true,
                mode: default_mode(),
            }
        }

        /// Same tenders and failure queue, opposite initial direction.
        pub fn with_descending(mut self, descending: bool) -> Self {
            self.descending = descending;
            self
        }

        /// A fresh session over the same data, as after a client restart.
        pub fn reopen(&self) -> Self {
            Self {
                closed: Arc::default(),
                ..self.clone()
            }
        }

        /// Append a tender as the most recently modified.
        pub async fn push(&self, tender: Value) {
            self.state.lock().await.tenders.push(tender);
        }

        /// Make the next call fail with `error`.
        pub async fn fail_next(&self, error: FeedError) {
            self.state.lock().await.failures.push_back(error);
        }

        /// Calls served so far, failures included.
        pub async fn requests(&self) -> usize {
            self.state.lock().await.requests
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Acquire)
        }

        async fn begin(&self) -> FeedResult<tokio::sync::MutexGuard<'_, FeedState>> {
            if self.is_closed() {
                return Err(FeedError::Closed);
            }
            let mut state = self.state.lock().await;
            state.requests += 1;
            match state.failures.pop_front() {
                Some(error) => Err(error),
                None => Ok(state),
            }
        }
    }

    #[async_trait]
    impl TenderApi for MemoryFeed {
        async fn ping(&self) -> FeedResult<()> {
            self.begin().await.map(|_| ())
        }

        async fn fetch_page(&self, query: &FeedQuery) -> FeedResult<FeedPage> {
            let state = self.begin().await?;
            let len = state.tenders.len();
            let limit = query.limit.max(1) as usize;
            let parse = |o: &String| {
                o.parse::<usize>()
                    .map_err(|_| FeedError::Status(400))
                    .map(|n| n.min(len))
            };

            let (data, next) = if query.descending {
                let end = query.offset.as_ref().map(parse).transpose()?.unwrap_or(len);
                let start = end.saturating_sub(limit);
                let data = state.tenders[start..end].iter().rev().cloned().collect();
                (data, start)
            } else {
                let start = query.offset.as_ref().map(parse).transpose()?.unwrap_or(0);
                let end = (start + limit).min(len);
                (state.tenders[start..end].to_vec(), end)
            };

            Ok(FeedPage {
                data,
                next_offset: Some(next.to_string()),
            })
        }

        async fn get_tender(&self, id: &str) -> FeedResult<Value> {
            let state = self.begin().await?;
            state
                .tenders
                .iter()
                .rev()
                .find(|t| t.get("id").and_then(Value::as_str) == Some(id))
                .cloned()
                .ok_or(FeedError::Status(404))
        }

        fn base_query(&self) -> FeedQuery {
            FeedQuery {
                offset: None,
                limit: self.limit,
                mode: self.mode.clone(),
                feed: default_feed(),
                descending: self.descending,
            }
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryFeed;
    use super::*;
    use serde_json::json;

    async fn feed_with(n: usize, limit: u32) -> MemoryFeed {
        let feed = MemoryFeed::new(limit);
        for i in 0..n {
            feed.push(json!({"id": format!("t{i}"), "dateModified": format!("2024-01-{:02}", i + 1)}))
                .await;
        }
        feed
    }

    fn ids(items: &[Value]) -> Vec<&str> {
        items.iter().filter_map(|t| t["id"].as_str()).collect()
    }

    #[test]
    fn test_page_from_body() {
        let page = FeedPage::from_body(json!({
            "data": [{"id": "a"}],
            "next_page": {"offset": "2024-01-01T00:00:00", "uri": "..."}
        }))
        .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.next_offset.as_deref(), Some("2024-01-01T00:00:00"));

        let numeric = FeedPage::from_body(json!({"data": [], "next_page": {"offset": 17.5}})).unwrap();
        assert_eq!(numeric.next_offset.as_deref(), Some("17.5"));

        assert!(matches!(
            FeedPage::from_body(json!({"items": []})),
            Err(FeedError::Decode(_))
        ));
    }

    #[test]
    fn test_query_params() {
        let mut config = ClientConfig::new("http://feed/api/tenders");
        config.limit = 50;
        let mut query = FeedQuery::from_config(&config);
        query.offset = Some("abc".into());
        let params = query.params();
        assert!(params.contains(&("descending", "1".into())));
        assert!(params.contains(&("limit", "50".into())));
        assert!(params.contains(&("offset", "abc".into())));

        query.descending = false;
        assert!(!query.params().iter().any(|(k, _)| *k == "descending"));
    }

    #[tokio::test]
    async fn test_cursor_walks_both_directions() {
        let feed = feed_with(5, 2).await;

        let mut back = FeedCursor::new(feed.base_query());
        assert_eq!(ids(&back.next_page(&feed).await.unwrap()), vec!["t4", "t3"]);
        assert_eq!(ids(&back.next_page(&feed).await.unwrap()), vec!["t2", "t1"]);
        assert_eq!(ids(&back.next_page(&feed).await.unwrap()), vec!["t0"]);
        assert!(back.next_page(&feed).await.unwrap().is_empty());

        let mut fwd = FeedCursor::new(feed.base_query());
        fwd.next_page(&feed).await.unwrap();
        fwd.ascending();
        assert_eq!(ids(&fwd.next_page(&feed).await.unwrap()), vec!["t3", "t4"]);
        assert!(fwd.next_page(&feed).await.unwrap().is_empty());
        feed.push(json!({"id": "t5"})).await;
        assert_eq!(ids(&fwd.next_page(&feed).await.unwrap()), vec!["t5"]);
    }

    #[tokio::test]
    async fn test_memory_feed_failures_and_close() {
        let feed = feed_with(1, 10).await;
        feed.fail_next(FeedError::Status(503)).await;
        assert_eq!(feed.get_tender("t0").await, Err(FeedError::Status(503)));
        assert_eq!(feed.get_tender("t0").await.unwrap()["id"], "t0");
        assert_eq!(feed.get_tender("nope").await, Err(FeedError::Status(404)));

        feed.close().await;
        assert_eq!(feed.ping().await, Err(FeedError::Closed));
        assert!(!feed.reopen().is_closed());
    }

    #[tokio::test]
    async fn test_http_client_closed() {
        let client = HttpTenderClient::new(ClientConfig::new("http://127.0.0.1:9/tenders"));
        client.close().await;
        assert_eq!(client.get_tender("x").await, Err(FeedError::Closed));
    }
}
