//! Error types for Tenderwatch Core.

use thiserror::Error;

/// Core errors raised while decoding primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid cursor: {0:?}")]
    InvalidCursor(String),

    #[error("invalid date: {0:?}")]
    InvalidDate(String),

    #[error("invalid key entry: {0}")]
    InvalidKeyEntry(String),

    #[error("malformed record: {0}")]
    MalformedRecord(String),
}

/// Validation errors: every way an inbound record can be refused.
///
/// The `Display` text is what API clients see in `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("bad data structure")]
    BadStructure,

    #[error("bad envelope date")]
    BadEnvelopeDate,

    #[error("bad hash id")]
    BadHashId,

    #[error("sign not verified")]
    SignNotVerified,

    #[error("bad model name {0:?}")]
    BadModelName(String),

    #[error("admin model requires root owner")]
    AdminRequiresRoot,

    #[error("unknown schema name {0:?}")]
    UnknownSchema(String),

    #[error("{0}")]
    SchemaViolation(String),

    #[error("reference not found: {field}={value}")]
    ReferenceNotFound { field: String, value: String },

    #[error("tender not found: {0}")]
    TenderNotFound(String),

    #[error("tender {0} is in mode=test")]
    TenderInTestMode(String),

    #[error("contract not found: {0}")]
    ContractNotFound(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => {
                ValidationError::SignNotVerified
            }
            CoreError::InvalidDate(_) => ValidationError::BadEnvelopeDate,
            CoreError::InvalidCursor(_)
            | CoreError::InvalidKeyEntry(_)
            | CoreError::MalformedRecord(_) => ValidationError::BadStructure,
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
