//! Cache key derivation.

use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MAX_KEY_LEN: usize = 128;

/// Content fingerprint identifying a structure entry.
///
/// Derived keys are 64 lowercase hex characters, but any short string of
/// ASCII alphanumerics, `-` and `_` is accepted when parsed so that keys
/// remain safe to use as file names in every tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Fingerprint source content together with the detector version and salt.
    ///
    /// Every input is length-prefixed before hashing so that moving bytes
    /// between the content and the version can never produce the same key.
    pub fn derive(content: &[u8], version: &str, salt: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in [content, version.as_bytes(), salt.as_bytes()] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(key: &str) -> bool {
        !key.is_empty()
            && key.len() <= MAX_KEY_LEN
            && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }
}

impl FromStr for CacheKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !Self::is_valid(s) {
            exn::bail!(ErrorKind::InvalidData("cache key"));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
