//! # Tenderwatch
//!
//! A public feedback store for procurement tenders: signed, content-addressed
//! records about tenders, checked against trusted keys and JSON schemas, kept
//! in an append-only store and served over HTTP.
//!
//! ## Overview
//!
//! - **Records**: immutable, signed envelopes addressed by their content hash
//! - **Trust**: owners sign with keys published as `admin/pubkey` records
//! - **Schemas**: `form/*` and `comment/*` payloads follow `admin/schema` records
//! - **References**: payload fields may point at tenders, contracts or other records
//! - **Sync**: a crawler mirrors the public tender feed into the local store
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenderwatch::{Config, Service};
//!
//! async fn example() -> tenderwatch::Result<()> {
//!     let config = Config::load("tenderwatch.toml")?;
//!     let service = Arc::new(Service::open(&config).await?);
//!
//!     let page = service.list(&Default::default()).await?;
//!     println!("{} records on the first page", page.ids.len());
//!
//!     service.close().await
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `tenderwatch::core` - Records, hashing, keyring and envelope validation
//! - `tenderwatch::store` - Storage engines
//! - `tenderwatch::sync` - Tender feed client and crawler

pub mod config;
pub mod error;
pub mod http;
pub mod json_schema;
pub mod loader;
pub mod maintenance;
pub mod resolver;
pub mod schema;
pub mod service;

// Re-export component crates
pub use tenderwatch_core as core;
pub use tenderwatch_store as store;
pub use tenderwatch_sync as sync;

pub use config::{Config, RetryPolicy};
pub use error::{Result, ServiceError};
pub use maintenance::{init_database, verify_database, VerifyReport};
pub use resolver::ReferenceResolver;
pub use schema::SchemaRegistry;
pub use service::{PutOutcome, Service, Snapshot};

pub use tenderwatch_core::{Envelope, Keypair, Record, RecordId, ValidationError};
