//! # Tenderwatch Sync
//!
//! Mirrors an external tender feed into the local `tenders` table.
//!
//! ## Overview
//!
//! [`TenderApi`] is the consumed interface of the feed; [`HttpTenderClient`]
//! implements it over HTTP and [`MemoryFeed`] in memory. The [`Crawler`]
//! drives a feed and a storage [`Engine`](tenderwatch_store::Engine) with
//! insert-if-absent semantics, and [`run_loop`] restarts it after failures.
//!
//! ## Key Types
//!
//! - [`TenderApi`] - The async trait of the tender feed
//! - [`FeedCursor`] - Offset-tracking page walker
//! - [`Crawler`] / [`CrawlerConfig`] / [`CrawlReport`] - One crawler run
//! - [`FeedError`] / [`SyncError`] - Failure types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenderwatch_store::{MemoryEngine, Shutdown};
//! use tenderwatch_sync::{ClientConfig, Crawler, CrawlerConfig, HttpTenderClient};
//!
//! async fn example() -> tenderwatch_sync::Result<()> {
//!     let api = Arc::new(HttpTenderClient::new(ClientConfig::new(
//!         "https://public.api.openprocurement.org/api/2.4/tenders",
//!     )));
//!     let crawler = Crawler::new(api, Arc::new(MemoryEngine::new()), CrawlerConfig::default());
//!     let report = crawler.run_once(Shutdown::never()).await?;
//!     println!("mirrored {} tenders", report.inserted);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod crawler;
pub mod error;

pub use client::{
    memory::MemoryFeed, ClientConfig, FeedCursor, FeedPage, FeedQuery, FeedResult, HttpTenderClient,
    TenderApi,
};
pub use crawler::{run_loop, CrawlReport, Crawler, CrawlerConfig};
pub use error::{FeedError, Result, SyncError};
