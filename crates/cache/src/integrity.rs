//! Payload checksums and verified lookups.

use crate::error::{Error, ErrorKind};
use derive_more::Display;
use exn::ResultExt;
use std::fmt;
use std::str::FromStr;

/// BLAKE3 digest of a serialized payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum(blake3::Hash);

impl Checksum {
    pub fn of(payload: &[u8]) -> Self {
        Self(blake3::hash(payload))
    }

    /// Recompute the digest of `payload` and compare it to this one.
    pub fn verify(&self, payload: &[u8]) -> bool {
        // blake3::Hash equality is constant-time.
        Self::of(payload) == *self
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        blake3::Hash::from_hex(s).map(Self).or_raise(|| ErrorKind::InvalidData("checksum"))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_hex())
    }
}

/// Why a stored entry was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Corruption {
    #[display("malformed checksum")]
    MalformedChecksum,
    #[display("checksum mismatch")]
    ChecksumMismatch,
    #[display("malformed payload")]
    MalformedPayload,
    #[display("malformed metadata")]
    MalformedMetadata,
    /// The stored entry belongs to a different key.
    #[display("key mismatch")]
    KeyMismatch,
}

/// Outcome of reading a single key from one tier.
///
/// A corrupt entry is not an error: the caller purges it and carries on
/// exactly as it would for a miss.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Hit(T),
    Miss,
    Corrupt(Corruption),
}

impl<T> Lookup<T> {
    pub fn hit(self) -> Option<T> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Miss | Self::Corrupt(_) => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Self::Hit(value) => Lookup::Hit(f(value)),
            Self::Miss => Lookup::Miss,
            Self::Corrupt(reason) => Lookup::Corrupt(reason),
        }
    }
}

impl<T> From<Result<T, Corruption>> for Lookup<T> {
    fn from(result: Result<T, Corruption>) -> Self {
        match result {
            Ok(value) => Self::Hit(value),
            Err(reason) => Self::Corrupt(reason),
        }
    }
}
