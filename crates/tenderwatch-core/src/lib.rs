//! # Tenderwatch Core
//!
//! Pure primitives for Tenderwatch: records, canonical JSON, content hashing,
//! the owner keyring, and envelope trust validation.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Record`] - A stored unit: envelope, signature, content-addressed id
//! - [`Envelope`] - The signed and hashed part of a record
//! - [`RecordId`] - 32 hex characters of the double SHA-256 of the envelope
//! - [`Cursor`] - Opaque pagination token carrying one server timestamp
//! - [`Keyring`] - Owner → time-windowed Ed25519 public keys
//!
//! ## Canonicalization
//!
//! Envelopes are hashed and signed over canonical JSON. See [`canonical`].

pub mod canonical;
pub mod crypto;
pub mod cursor;
pub mod date;
pub mod error;
pub mod keyring;
pub mod record;
pub mod types;
pub mod validation;

pub use canonical::{canonical_json, envelope_bytes};
pub use crypto::{content_hash, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use cursor::Cursor;
pub use date::parse_date;
pub use error::{CoreError, ValidationError};
pub use keyring::{KeyEntry, Keyring};
pub use record::{Envelope, Record};
pub use types::{is_record_id, Model, ModelKind, RecordId};
pub use validation::{validate_envelope, validate_structure, verify_signature, TrustPolicy};
