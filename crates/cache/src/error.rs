//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Corrupt entries are absent from this list: a failed checksum
//! is reported through [`Lookup::Corrupt`](crate::Lookup::Corrupt) and
//! handled by the caller as a miss.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// The backup snapshot store could not be read or written.
    #[display("backup storage error")]
    Storage,
    /// Serialization/deserialization error.
    #[display("invalid cache data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    /// The detector or classifier failed. Nothing was cached.
    #[display("computation failed")]
    Compute,
    /// Another holder kept the named lock for longer than the configured timeout.
    #[display("timed out waiting for lock: {_0}")]
    LockTimeout(#[error(not(source))] String),
    /// The lock file itself could not be created or locked.
    #[display("could not acquire lock")]
    Lock,
    #[display("invalid cache options: {_0}")]
    Config(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Callers hitting a lock timeout should back off and retry rather than
    /// computing outside the cache.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout(_) | Self::Lock)
    }
}
