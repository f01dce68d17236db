//! Opaque pagination cursors.
//!
//! A cursor carries exactly one server timestamp (`f64` seconds since the
//! epoch). The token is the little-endian IEEE-754 bytes of the timestamp,
//! hex-encoded to 16 lowercase characters.

use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Length of an encoded cursor token.
pub const CURSOR_LEN: usize = 16;

/// A pagination boundary: the `ts` of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Cursor(pub f64);

impl Cursor {
    pub fn ts(&self) -> f64 {
        self.0
    }

    /// Encode to the 16-character token.
    pub fn encode(&self) -> String {
        hex::encode(self.0.to_le_bytes())
    }

    /// Decode a token, failing with `InvalidCursor` on anything but
    /// exactly 16 hex characters.
    pub fn decode(token: &str) -> Result<Self> {
        if token.len() != CURSOR_LEN {
            return Err(CoreError::InvalidCursor(token.to_owned()));
        }
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(token, &mut bytes)
            .map_err(|_| CoreError::InvalidCursor(token.to_owned()))?;
        Ok(Self(f64::from_le_bytes(bytes)))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Cursor {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}
