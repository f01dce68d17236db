//! # Tenderwatch Testkit
//!
//! Testing utilities for Tenderwatch.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known envelope hashes and cursor tokens
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Signers that produce valid records, sample schemas and tenders
//! - **Conformance**: One suite every storage engine must pass
//!
//! ## Golden Vectors
//!
//! ```rust
//! use tenderwatch_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, id) in verify_all_vectors() {
//!     assert!(matches, "{name}: {id}");
//! }
//! ```
//!
//! ## Fixtures
//!
//! ```rust
//! use serde_json::json;
//! use tenderwatch_testkit::fixtures::Signer;
//!
//! let root = Signer::root();
//! let record = root.record("comment/comment", json!({"comment": "ok"}));
//! assert_eq!(record["envelope"]["owner"], "root");
//! ```
//!
//! ## Engine Conformance
//!
//! ```rust,ignore
//! tenderwatch_testkit::conformance::run_all(&engine).await;
//! ```

pub mod conformance;
pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{root_key_record, signers, Signer, TestFixture, ROOT};
pub use vectors::{cursor_vectors, hash_vectors, verify_all_vectors, CursorVector, HashVector};
