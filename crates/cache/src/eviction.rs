//! Size-bounded LRU eviction across the durable and backup tiers.

use crate::backup::BackupTier;
use crate::error::{ErrorKind, Result};
use crate::lock::{LockManager, LockName};
use crate::memory::MemoryTier;
use crate::models::{EntryKind, RecencyEntry};
use crate::repo::Repository;
use crate::{CacheKey, HeadingKey};
use exn::OptionExt;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use strata_storage::FileInfo;
use tracing::instrument;

/// What a single eviction run removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub before_bytes: u64,
    pub after_bytes: u64,
    pub structures_evicted: u64,
    pub classifications_evicted: u64,
    /// Snapshots without a durable row.
    pub orphan_snapshots_evicted: u64,
}

impl EvictionReport {
    pub fn evicted(&self) -> u64 {
        self.structures_evicted + self.classifications_evicted + self.orphan_snapshots_evicted
    }
}

#[derive(Clone)]
pub struct EvictionManager {
    repo: Repository,
    backup: BackupTier,
    memory: MemoryTier,
    locks: Arc<LockManager>,
}

impl EvictionManager {
    pub fn new(repo: Repository, backup: BackupTier, memory: MemoryTier, locks: Arc<LockManager>) -> Self {
        Self { repo, backup, memory, locks }
    }

    /// Bytes held by the durable and backup tiers together.
    pub async fn current_size_bytes(&self) -> Result<u64> {
        Ok(self.repo.total_size_bytes().await? + self.backup.size_bytes().await?)
    }

    /// Remove least recently accessed entries until at most `target_bytes` remain.
    ///
    /// Snapshots without a durable row compete on their modification time,
    /// so a stale orphan goes before any durable entry accessed after it.
    /// Size is measured again after every single removal, so the run stops
    /// as soon as the budget is met regardless of how large each entry was.
    /// Runs under the maintenance lock, and each removal additionally takes
    /// the entry's own lock so it never races a population of the same key.
    #[instrument(skip(self))]
    pub async fn evict_to_target(&self, target_bytes: u64) -> Result<EvictionReport> {
        let _maintenance = self.locks.acquire(&LockName::maintenance()).await?;

        let mut size = self.current_size_bytes().await?;
        let mut report = EvictionReport { before_bytes: size, ..Default::default() };
        if size <= target_bytes {
            report.after_bytes = size;
            return Ok(report);
        }

        let mut orphans = self.orphan_snapshots().await?;
        while size > target_bytes {
            let oldest = self.repo.oldest().await?;
            let orphan_first = match (&oldest, orphans.front()) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(entry), Some((_, file))) => file.modified <= entry.accessed_at,
            };
            if orphan_first {
                if let Some((key, _)) = orphans.pop_front() {
                    self.evict_orphan(&key, &mut report).await?;
                }
            } else if let Some(entry) = oldest {
                self.evict_entry(&entry, &mut report).await?;
            } else {
                break;
            }
            size = self.current_size_bytes().await?;
        }
        report.after_bytes = size;

        if report.evicted() > 0 {
            tracing::info!(
                target_bytes,
                before = report.before_bytes,
                after = report.after_bytes,
                structures = report.structures_evicted,
                classifications = report.classifications_evicted,
                orphans = report.orphan_snapshots_evicted,
                "Evicted least recently used entries",
            );
        }
        Ok(report)
    }

    async fn evict_entry(&self, entry: &RecencyEntry, report: &mut EvictionReport) -> Result<()> {
        match entry.kind {
            EntryKind::Structure => {
                let key = entry.cache_key().ok_or_raise(|| ErrorKind::InvalidData("cache key"))?;
                let _lock = self.locks.acquire(&LockName::structure(&key)).await?;
                let removed = self.repo.delete_structure(&key).await?;
                self.backup.delete(&key).await?;
                self.memory.remove_structure(&key);
                if removed {
                    report.structures_evicted += 1;
                }
                tracing::debug!(key = %key, "Evicted structure entry");
                Ok(())
            },
            EntryKind::Classification => {
                let key = HeadingKey::from_normalized(entry.key.clone());
                let _lock = self.locks.acquire(&LockName::classification(&key)).await?;
                let removed = self.repo.delete_classification(&key).await?;
                self.memory.remove_classification(&key);
                if removed {
                    report.classifications_evicted += 1;
                }
                tracing::debug!(key = %key, "Evicted classification entry");
                Ok(())
            },
        }
    }

    /// Snapshots with no durable row, oldest first.
    async fn orphan_snapshots(&self) -> Result<VecDeque<(CacheKey, FileInfo)>> {
        let durable: HashSet<CacheKey> = self.repo.structure_keys().await?.into_iter().collect();
        let mut orphans: Vec<_> =
            self.backup.list().await?.into_iter().filter(|(key, _)| !durable.contains(key)).collect();
        orphans.sort_by(|(a_key, a), (b_key, b)| a.modified.cmp(&b.modified).then_with(|| a_key.cmp(b_key)));
        Ok(orphans.into())
    }

    async fn evict_orphan(&self, key: &CacheKey, report: &mut EvictionReport) -> Result<()> {
        let _lock = self.locks.acquire(&LockName::structure(key)).await?;
        // Populated since the orphan list was taken.
        if self.repo.has_structure(key).await? {
            return Ok(());
        }
        if self.backup.delete(key).await? {
            report.orphan_snapshots_evicted += 1;
        }
        self.memory.remove_structure(key);
        tracing::debug!(key = %key, "Evicted orphan snapshot");
        Ok(())
    }
}
