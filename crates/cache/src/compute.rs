//! Collaborators that produce cacheable results.
//!
//! The cache never inspects how results are produced. It only needs to know
//! which detector version produced a structure, since that version is part of
//! the cache key.

use crate::models::{Classification, StructureResult};
use async_trait::async_trait;
use std::error::Error as StdError;

/// Structural analysis of a source document.
#[async_trait]
pub trait Detector: Send + Sync {
    type Error: StdError + Send + Sync + 'static;

    /// Version identifier of the analysis. Changing it invalidates every
    /// structure entry produced by earlier versions.
    fn version(&self) -> &str;

    /// Analyze a whole document. May take minutes.
    async fn compute_structure(&self, source: &[u8]) -> Result<StructureResult, Self::Error>;
}

/// Classification of a normalized heading into categories.
///
/// Calls may be metered, so the cache exists to avoid repeating them as much
/// as to save latency.
#[async_trait]
pub trait Classifier: Send + Sync {
    type Error: StdError + Send + Sync + 'static;

    async fn classify(&self, heading: &str) -> Result<Classification, Self::Error>;
}

/// A source document to analyze.
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
    /// Identifier recorded with the entry, for humans only. Not part of the key.
    pub name: &'a str,
    pub bytes: &'a [u8],
}

impl<'a> Source<'a> {
    pub fn new(name: &'a str, bytes: &'a [u8]) -> Self {
        Self { name, bytes }
    }
}
