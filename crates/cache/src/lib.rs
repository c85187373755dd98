//! Multi-tier cache for document structure analysis and heading classification.
//!
//! Structure analysis of a document is slow and deterministic, so its result
//! is cached under a fingerprint of the document content. Heading
//! classification is paid for per call, so its result is cached under the
//! normalized heading text.
//!
//! # Architecture
//! Every request walks the tiers in order and stops at the first verified hit:
//! - **Memory**: bounded, process-local maps. Lost on exit.
//! - **Durable**: a SQLite database shared by every process using the same
//!   cache directory. Tracks recency for eviction.
//! - **Backup**: one JSON snapshot per structure entry, used only to repair
//!   the durable tier when a row is missing or fails verification.
//!
//! Every structure payload carries a BLAKE3 checksum of its exact encoded
//! form. A payload that fails verification is treated as a miss and purged,
//! never returned. Computation for a key happens at most once at a time
//! across all processes sharing the directory, guarded by per-key lock files.

mod backup;
mod cache;
mod compute;
mod db;
pub mod error;
mod eviction;
mod integrity;
mod key;
mod lock;
mod memory;
mod models;
mod normalize;
mod repo;
mod stats;

pub use crate::backup::BackupTier;
pub use crate::cache::{Cache, CacheOptions, Cached, ClearReport, RepairReport, Tier};
pub use crate::compute::{Classifier, Detector, Source};
pub use crate::db::Database;
pub use crate::eviction::{EvictionManager, EvictionReport};
pub use crate::integrity::{Checksum, Corruption, Lookup};
pub use crate::key::CacheKey;
pub use crate::lock::{KeyLock, LockManager, LockName};
pub use crate::memory::MemoryTier;
pub use crate::models::{
    Block, Cell, Classification, ClassificationEntry, EntryKind, RecencyEntry, Section, StructureEntry,
    StructureResult, Table,
};
pub use crate::normalize::HeadingKey;
pub use crate::repo::{AccessCount, ClassificationSummary, Recency, Repository, StructureSummary};
pub use crate::stats::Statistics;
