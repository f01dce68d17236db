//! # Tenderwatch Store
//!
//! Append-only document storage behind one async trait, with memory, SQLite
//! and PostgreSQL backends.
//!
//! ## Overview
//!
//! Two logical tables exist: `data` holds content-addressed records, and
//! `tenders` mirrors the external tender feed. Every document gets a
//! server-assigned `ts` on insert, and `list` pages through a table in `ts`
//! order with open cursor boundaries.
//!
//! ## Key Types
//!
//! - [`Engine`] - The async trait every backend implements
//! - [`RecordStore`] - Record and tender helpers over any engine
//! - [`MemoryEngine`] - In-memory backend for tests
//! - [`SqliteEngine`] - SQLite backend
//! - [`PostgresEngine`] - PostgreSQL backend with reconnect and keep-alive
//! - [`DatabaseConfig`] / [`open_engine`] - Backend selection
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tenderwatch_store::{open_engine, DatabaseConfig, ListQuery, Table};
//!
//! async fn example() -> tenderwatch_store::Result<()> {
//!     let engine = open_engine(&DatabaseConfig::default()).await?;
//!     let page = engine.list(Table::Data, &ListQuery::default()).await?;
//!     println!("{} ids, next page after {:?}", page.ids.len(), page.next);
//!     engine.close().await
//! }
//! ```

pub mod clock;
pub mod codec;
pub mod document;
pub mod error;
pub mod factory;
pub mod memory;
pub mod migration;
pub mod postgres;
pub mod shutdown;
pub mod sqlite;
pub mod traits;

pub use document::{model_matches, Document, ListPage, ListQuery, Table, DEFAULT_LIMIT, MAX_BATCH_IDS};
pub use error::{Result, StoreError};
pub use factory::{open_engine, DatabaseConfig};
pub use memory::MemoryEngine;
pub use postgres::{PostgresEngine, PostgresOptions};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use sqlite::SqliteEngine;
pub use traits::{Engine, RecordStore};
