//! Memory tier: process-local, bounded maps in front of the durable tier.

use crate::models::{ClassificationEntry, StructureEntry};
use crate::{CacheKey, HeadingKey};
use moka::sync::Cache;

/// In-process cache of verified entries.
///
/// Each table is capped at `capacity` entries, evicted by moka's TinyLFU
/// policy. Nothing here is persisted and nothing here counts against the
/// on-disk size budget.
#[derive(Clone)]
pub struct MemoryTier {
    structures: Cache<CacheKey, StructureEntry>,
    classifications: Cache<HeadingKey, ClassificationEntry>,
}

impl MemoryTier {
    pub fn new(capacity: u64) -> Self {
        Self {
            structures: Cache::builder().max_capacity(capacity).build(),
            classifications: Cache::builder().max_capacity(capacity).build(),
        }
    }

    pub fn get_structure(&self, key: &CacheKey) -> Option<StructureEntry> {
        self.structures.get(key)
    }

    pub fn put_structure(&self, entry: StructureEntry) {
        self.structures.insert(entry.key.clone(), entry);
    }

    pub fn remove_structure(&self, key: &CacheKey) {
        self.structures.invalidate(key);
    }

    pub fn get_classification(&self, key: &HeadingKey) -> Option<ClassificationEntry> {
        self.classifications.get(key)
    }

    pub fn put_classification(&self, entry: ClassificationEntry) {
        self.classifications.insert(entry.key.clone(), entry);
    }

    pub fn remove_classification(&self, key: &HeadingKey) {
        self.classifications.invalidate(key);
    }

    pub fn clear(&self) {
        self.structures.invalidate_all();
        self.classifications.invalidate_all();
    }

    pub fn clear_classifications(&self) {
        self.classifications.invalidate_all();
    }

    /// Entry counts as `(structures, classifications)`.
    pub fn entry_counts(&self) -> (u64, u64) {
        // moka only reflects inserts and invalidations after pending
        // maintenance has run.
        self.structures.run_pending_tasks();
        self.classifications.run_pending_tasks();
        (self.structures.entry_count(), self.classifications.entry_count())
    }
}
