//! Cryptographic primitives for Tenderwatch.
//!
//! Wraps Ed25519 signing and the double SHA-256 content hash with strong types.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::CoreError;
use crate::types::{RecordId, RECORD_ID_LEN};

/// Base64 decoder that accepts signatures with or without `=` padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// `hex(SHA-256(SHA-256(bytes)))`, truncated to 32 hex characters.
pub fn content_hash(bytes: &[u8]) -> RecordId {
    let inner = Sha256::digest(bytes);
    let outer = Sha256::digest(inner);
    let mut hex = hex::encode(outer);
    hex.truncate(RECORD_ID_LEN);
    RecordId::from_digest_hex(hex)
}

/// An owner's verifying key, as published in `admin/pubkey` records.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ed25519PublicKey(pub [u8; 32]);

impl Ed25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Lowercase hex, the form used in `publicKey`.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s).map_err(|_| CoreError::InvalidPublicKey)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CoreError::InvalidPublicKey)?;
        Ok(Self(arr))
    }

    /// Check `signature` over canonical envelope bytes.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CoreError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;

        let sig = Signature::from_bytes(&signature.0);

        verifying_key
            .verify(message, &sig)
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Pub({})", &self.to_hex()[..16])
    }
}

/// Detached signature carried in a record's `sign` field.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Signature(pub [u8; 64]);

impl Ed25519Signature {
    /// Decode from base64, padded or not.
    pub fn from_base64(s: &str) -> Result<Self, CoreError> {
        let bytes = LENIENT_BASE64
            .decode(s.trim())
            .map_err(|_| CoreError::InvalidSignature)?;
        let arr: [u8; 64] = bytes.try_into().map_err(|_| CoreError::InvalidSignature)?;
        Ok(Self(arr))
    }

    /// Encode as unpadded base64.
    pub fn to_base64(&self) -> String {
        STANDARD_NO_PAD.encode(self.0)
    }
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Sig({}...)", &hex::encode(&self.0[..8]))
    }
}

/// A keypair for signing envelopes.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Fresh random key, for tests and key generation.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);
        Self { signing_key }
    }

    /// Deterministic key from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Create from a base64 encoded seed, as stored in admin key files.
    pub fn from_base64_seed(s: &str) -> Result<Self, CoreError> {
        let bytes = LENIENT_BASE64
            .decode(s.trim())
            .map_err(|_| CoreError::InvalidPublicKey)?;
        // Accept the 64-byte seed||public form as well as a bare seed.
        let seed: [u8; 32] = match bytes.len() {
            32 | 64 => bytes[..32].try_into().map_err(|_| CoreError::InvalidPublicKey)?,
            _ => return Err(CoreError::InvalidPublicKey),
        };
        Ok(Self::from_seed(&seed))
    }

    /// Get the public key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        let sig = self.signing_key.sign(message);
        Ed25519Signature(sig.to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_covers_envelope_bytes() {
        let keypair = Keypair::from_seed(&[0x42u8; 32]);
        let envelope = br#"{"date":"2020-01-01T00:00:00Z","model":"comment/comment","owner":"a"}"#;
        let sig = keypair.sign(envelope);

        assert!(keypair.public_key().verify(envelope, &sig).is_ok());
        let other_owner = br#"{"date":"2020-01-01T00:00:00Z","model":"comment/comment","owner":"b"}"#;
        assert!(keypair.public_key().verify(other_owner, &sig).is_err());
        assert!(Keypair::generate().public_key().verify(envelope, &sig).is_err());
    }

    #[test]
    fn test_same_seed_same_key() {
        let seed = [0x42u8; 32];
        assert_eq!(Keypair::from_seed(&seed).public_key(), Keypair::from_seed(&seed).public_key());
        assert_ne!(Keypair::from_seed(&seed).public_key(), Keypair::from_seed(&[0x43; 32]).public_key());
    }

    #[test]
    fn test_content_hash_empty_object() {
        assert_eq!(content_hash(b"{}").as_str(), "c74f3008fdd2f7c5ae5446ab2e522629");
    }

    #[test]
    fn test_signature_base64_padding_optional() {
        let sig = Keypair::from_seed(&[7u8; 32]).sign(b"msg");
        let unpadded = sig.to_base64();
        assert!(!unpadded.ends_with('='));
        let padded = format!("{unpadded}==");
        assert_eq!(Ed25519Signature::from_base64(&unpadded).unwrap(), sig);
        assert_eq!(Ed25519Signature::from_base64(&padded).unwrap(), sig);
        assert!(Ed25519Signature::from_base64("not base64!").is_err());
        assert!(Ed25519Signature::from_base64("c2hvcnQ").is_err());
    }

    #[test]
    fn test_public_key_hex_roundtrip() {
        let pk = Keypair::generate().public_key();
        assert_eq!(Ed25519PublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
        assert!(Ed25519PublicKey::from_hex("abcd").is_err());
    }

    #[test]
    fn test_keypair_from_base64_seed() {
        let kp = Keypair::from_base64_seed(&STANDARD_NO_PAD.encode([9u8; 32])).unwrap();
        assert_eq!(kp.public_key(), Keypair::from_seed(&[9u8; 32]).public_key());
    }
}
