//! The cache facade: tier lookup order and the miss/populate path.
//!
//! A request walks memory, then the durable tier, then the backup tier, and
//! only computes on a full miss:
//!
//! ```text
//! memory ─miss─▶ durable ─miss/corrupt─▶ [key lock] ─▶ durable ─▶ backup ─miss/corrupt─▶ compute
//!   │hit            │hit                                  │hit       │hit (repairs durable)   │
//!   ▼               ▼                                     ▼          ▼                        ▼
//! return          return                               return     return          populate, return
//! ```
//!
//! Lookups before the key lock are lock-free. Everything that writes, including
//! purging a corrupt entry, happens while holding the key lock, and the durable
//! tier is checked again after acquiring it because another task or process
//! may have finished computing while this one waited.

use crate::backup::BackupTier;
use crate::compute::{Classifier, Detector, Source};
use crate::error::{Error, ErrorKind, Result};
use crate::eviction::{EvictionManager, EvictionReport};
use crate::integrity::Lookup;
use crate::lock::{LockManager, LockName};
use crate::memory::MemoryTier;
use crate::models::{ClassificationEntry, StructureEntry};
use crate::repo::Repository;
use crate::stats::Statistics;
use crate::{CacheKey, Database, HeadingKey};
use derive_more::Display;
use exn::ResultExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use strata_config::CacheConfig;
use strata_storage::BackendHandle;
use strata_storage::backend::LocalBackend;
use time::OffsetDateTime;
use tracing::instrument;

const DATABASE_FILE: &str = "cache.db";
const BACKUP_DIR: &str = "backup";
const LOCKS_DIR: &str = "locks";
const MOST_ACCESSED_LIMIT: u32 = 10;

/// Everything needed to open a cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    /// Directory shared by every process using this cache.
    pub root: PathBuf,
    /// Mixed into every structure key. Changing it invalidates all entries.
    pub salt: String,
    /// Evict once the durable and backup tiers together exceed this size.
    pub max_size_bytes: Option<u64>,
    /// Fraction of `max_size_bytes` to evict down to.
    pub eviction_target_ratio: f64,
    pub lock_timeout: Duration,
    /// Maximum memory tier entries, per table.
    pub memory_capacity: u64,
    pub max_connections: u32,
}

impl CacheOptions {
    /// Default options for a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from(&CacheConfig { root: root.into(), ..CacheConfig::default() })
    }

    pub fn with_max_size_bytes(mut self, max: u64) -> Self {
        self.max_size_bytes = Some(max);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.salt.is_empty() {
            exn::bail!(ErrorKind::Config("salt must not be empty"));
        }
        if !(self.eviction_target_ratio > 0.0 && self.eviction_target_ratio <= 1.0) {
            exn::bail!(ErrorKind::Config("eviction target ratio must be within (0, 1]"));
        }
        if self.memory_capacity == 0 || self.max_connections == 0 {
            exn::bail!(ErrorKind::Config("memory capacity and connections must be non-zero"));
        }
        Ok(())
    }

    fn eviction_target(&self) -> Option<u64> {
        self.max_size_bytes.map(|max| (max as f64 * self.eviction_target_ratio).floor() as u64)
    }
}

impl From<&CacheConfig> for CacheOptions {
    fn from(config: &CacheConfig) -> Self {
        Self {
            root: config.root.clone(),
            salt: config.salt.clone(),
            max_size_bytes: config.max_size_bytes,
            eviction_target_ratio: config.eviction_target_ratio,
            lock_timeout: config.lock_timeout(),
            memory_capacity: config.memory_capacity,
            max_connections: config.max_connections,
        }
    }
}

/// The tier a value was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[display("memory")]
    Memory,
    #[display("durable")]
    Durable,
    #[display("backup")]
    Backup,
    #[display("computed")]
    Computed,
}

/// A value together with the tier that served it.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: T,
    pub tier: Tier,
}

impl<T> Cached<T> {
    fn new(value: T, tier: Tier) -> Self {
        Self { value, tier }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// What [`Cache::clear_all()`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub structures: u64,
    pub classifications: u64,
    pub snapshots: u64,
}

/// What [`Cache::repair_from_backup()`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub scanned: u64,
    /// Snapshots copied back into the durable tier.
    pub restored: u64,
    /// Snapshots that failed verification and were deleted.
    pub purged: u64,
}

/// Multi-tier cache for structure analysis and heading classification.
///
/// Cheap to clone; every clone shares the same tiers.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

struct Inner {
    options: CacheOptions,
    db: Database,
    repo: Repository,
    backup: BackupTier,
    memory: MemoryTier,
    locks: Arc<LockManager>,
    eviction: EvictionManager,
    degraded_writes: AtomicU64,
}

impl Cache {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the cache at `options.root`, creating its layout if missing.
    ///
    /// ```text
    /// <root>/cache.db     durable tier
    /// <root>/backup/      one snapshot per structure key
    /// <root>/locks/       lock files
    /// ```
    pub async fn open(options: CacheOptions) -> Result<Self> {
        let root = Self::prepare_root(&options).await?;
        let backend = LocalBackend::new(root.join(BACKUP_DIR)).or_raise(|| ErrorKind::Storage)?;
        Self::assemble(options, root, Arc::new(backend)).await
    }

    /// Open the cache with a custom backup backend.
    pub async fn open_with_backup(options: CacheOptions, backend: BackendHandle) -> Result<Self> {
        let root = Self::prepare_root(&options).await?;
        Self::assemble(options, root, backend).await
    }

    async fn prepare_root(options: &CacheOptions) -> Result<PathBuf> {
        options.validate()?;
        let root = std::path::absolute(&options.root).or_raise(|| ErrorKind::Config("cache root"))?;
        tokio::fs::create_dir_all(&root).await.or_raise(|| ErrorKind::Storage)?;
        Ok(root)
    }

    async fn assemble(mut options: CacheOptions, root: PathBuf, backend: BackendHandle) -> Result<Self> {
        let db = Database::connect(root.join(DATABASE_FILE), options.max_connections).await?;
        let repo = Repository::from(&db);
        let backup = BackupTier::new(backend);
        let memory = MemoryTier::new(options.memory_capacity);
        let locks = Arc::new(LockManager::new(root.join(LOCKS_DIR), options.lock_timeout)?);
        let eviction = EvictionManager::new(repo.clone(), backup.clone(), memory.clone(), locks.clone());
        tracing::info!(root = %root.display(), max_size_bytes = ?options.max_size_bytes, "Opened cache");
        options.root = root;
        Ok(Self {
            inner: Arc::new(Inner {
                options,
                db,
                repo,
                backup,
                memory,
                locks,
                eviction,
                degraded_writes: AtomicU64::new(0),
            }),
        })
    }

    /// Close the durable tier. Other clones of this cache must not be used afterwards.
    pub async fn close(&self) {
        self.inner.db.close().await;
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    pub fn root(&self) -> &Path {
        &self.inner.options.root
    }

    /// Key under which a detector's analysis of `content` is cached.
    pub fn structure_key(&self, detector_version: &str, content: &[u8]) -> CacheKey {
        CacheKey::derive(content, detector_version, &self.inner.options.salt)
    }

    // =========================================================================
    // Structures
    // =========================================================================

    /// Return the structure of `source`, computing it only on a full miss.
    ///
    /// Concurrent callers for the same source, in this process or any other
    /// sharing the cache directory, cause at most one computation.
    #[instrument(skip(self, detector, source), fields(source = source.name, size = source.bytes.len()))]
    pub async fn analyze<D: Detector>(&self, detector: &D, source: Source<'_>) -> Result<Cached<StructureEntry>> {
        let key = self.structure_key(detector.version(), source.bytes);
        if let Some(hit) = self.structure_unlocked(&key).await {
            return Ok(hit);
        }

        let entry = {
            let _lock = self.inner.locks.acquire(&LockName::structure(&key)).await?;
            if let Some(hit) = self.structure_locked(&key).await {
                return Ok(hit);
            }

            let started = Instant::now();
            let payload = detector.compute_structure(source.bytes).await.or_raise(|| ErrorKind::Compute)?;
            let elapsed = started.elapsed();
            let entry = StructureEntry::new(
                key,
                source.name,
                source.bytes.len() as u64,
                detector.version(),
                payload,
                elapsed,
            )?;
            tracing::debug!(key = %entry.key, elapsed = ?elapsed, "Computed structure");
            self.populate_structure(entry).await
        };

        self.enforce_budget().await;
        Ok(Cached::new(entry, Tier::Computed))
    }

    /// Look up a structure entry without ever computing it.
    ///
    /// A corrupt durable entry is purged and, if possible, repaired from its
    /// backup snapshot, exactly as [`analyze()`](Self::analyze) would.
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn lookup_structure(&self, key: &CacheKey) -> Result<Option<Cached<StructureEntry>>> {
        if let Some(hit) = self.structure_unlocked(key).await {
            return Ok(Some(hit));
        }
        let _lock = self.inner.locks.acquire(&LockName::structure(key)).await?;
        Ok(self.structure_locked(key).await)
    }

    /// Store an already computed entry unless one exists for its key.
    ///
    /// Returns `true` if the entry was stored. The first entry stored for a
    /// key is kept; later ones are ignored.
    #[instrument(skip(self, entry), fields(key = %entry.key))]
    pub async fn put_structure(&self, entry: StructureEntry) -> Result<bool> {
        if !entry.verify() {
            exn::bail!(ErrorKind::InvalidData("checksum"));
        }
        let inserted = {
            let _lock = self.inner.locks.acquire(&LockName::structure(&entry.key)).await?;
            let inserted = self.inner.repo.insert_structure(&entry).await?;
            if inserted {
                if let Err(err) = self.inner.backup.put(&entry).await {
                    self.degraded("backup", entry.key.as_str(), &err);
                }
                self.inner.memory.put_structure(entry);
            }
            inserted
        };
        if inserted {
            self.enforce_budget().await;
        }
        Ok(inserted)
    }

    /// Remove one structure entry from every tier.
    ///
    /// Returns `true` if anything was removed from the durable or backup tier.
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn clear_one(&self, key: &CacheKey) -> Result<bool> {
        let _lock = self.inner.locks.acquire(&LockName::structure(key)).await?;
        let durable = self.inner.repo.delete_structure(key).await?;
        let backup = self.inner.backup.delete(key).await?;
        self.inner.memory.remove_structure(key);
        tracing::info!(key = %key, durable, backup, "Cleared structure entry");
        Ok(durable || backup)
    }

    /// Memory, then the durable tier, without taking any lock.
    async fn structure_unlocked(&self, key: &CacheKey) -> Option<Cached<StructureEntry>> {
        if let Some(hit) = self.memory_structure(key).await {
            return Some(hit);
        }
        match self.durable_structure(key).await {
            Lookup::Hit(entry) => Some(self.durable_hit(entry)),
            // Corrupt entries are purged under the key lock.
            Lookup::Miss | Lookup::Corrupt(_) => None,
        }
    }

    /// Everything after acquiring the key lock, short of computing.
    async fn structure_locked(&self, key: &CacheKey) -> Option<Cached<StructureEntry>> {
        if let Some(hit) = self.memory_structure(key).await {
            return Some(hit);
        }
        match self.durable_structure(key).await {
            Lookup::Hit(entry) => return Some(self.durable_hit(entry)),
            Lookup::Corrupt(reason) => {
                tracing::warn!(key = %key, %reason, "Purging corrupt durable entry");
                if let Err(err) = self.inner.repo.delete_structure(key).await {
                    tracing::warn!(key = %key, error = ?err, "Could not purge corrupt durable entry");
                }
            },
            Lookup::Miss => {},
        }

        match self.inner.backup.get(key).await {
            Ok(Lookup::Hit(entry)) => Some(self.restore_from_backup(entry).await),
            Ok(Lookup::Corrupt(reason)) => {
                tracing::warn!(key = %key, %reason, "Purging corrupt backup snapshot");
                if let Err(err) = self.inner.backup.delete(key).await {
                    tracing::warn!(key = %key, error = ?err, "Could not purge corrupt backup snapshot");
                }
                None
            },
            Ok(Lookup::Miss) => None,
            Err(err) => {
                tracing::warn!(key = %key, error = ?err, "Backup tier unreadable, treating as a miss");
                None
            },
        }
    }

    /// Serve a structure from memory, recording the access in the durable tier.
    ///
    /// An entry whose durable row is gone, because another process evicted
    /// or cleared it, is dropped from memory and treated as a miss.
    async fn memory_structure(&self, key: &CacheKey) -> Option<Cached<StructureEntry>> {
        let mut entry = self.inner.memory.get_structure(key)?;
        let now = OffsetDateTime::now_utc();
        match self.inner.repo.touch_structure(key, now).await {
            Ok(Some(count)) => entry.access_count = count,
            Ok(None) => {
                tracing::debug!(key = %key, "Memory entry has no durable row, dropping it");
                self.inner.memory.remove_structure(key);
                return None;
            },
            Err(err) => {
                tracing::warn!(key = %key, error = ?err, "Could not record access in durable tier");
                entry.access_count += 1;
            },
        }
        entry.accessed_at = now;
        tracing::debug!(key = %key, "Memory hit");
        self.inner.memory.put_structure(entry.clone());
        Some(Cached::new(entry, Tier::Memory))
    }

    /// Read the durable tier, treating an unreadable database as a miss.
    async fn durable_structure(&self, key: &CacheKey) -> Lookup<StructureEntry> {
        match self.inner.repo.get_structure(key).await {
            Ok(lookup) => lookup,
            Err(err) => {
                tracing::warn!(key = %key, error = ?err, "Durable tier unreadable, treating as a miss");
                Lookup::Miss
            },
        }
    }

    fn durable_hit(&self, entry: StructureEntry) -> Cached<StructureEntry> {
        tracing::debug!(key = %entry.key, "Durable hit");
        self.inner.memory.put_structure(entry.clone());
        Cached::new(entry, Tier::Durable)
    }

    /// Write a verified snapshot back into the durable tier.
    async fn restore_from_backup(&self, mut entry: StructureEntry) -> Cached<StructureEntry> {
        tracing::info!(key = %entry.key, "Repairing durable tier from backup snapshot");
        entry.accessed_at = OffsetDateTime::now_utc();
        entry.access_count += 1;
        if let Err(err) = self.inner.repo.insert_structure(&entry).await {
            self.degraded("durable", entry.key.as_str(), &err);
        }
        self.inner.memory.put_structure(entry.clone());
        Cached::new(entry, Tier::Backup)
    }

    /// Write a freshly computed entry to every tier and return the entry
    /// that is now canonical for its key.
    ///
    /// Persistence is best-effort: failures are logged and counted, and
    /// never stop the computed result from being returned. If another writer
    /// already owns the durable row, that row wins and is returned instead.
    async fn populate_structure(&self, entry: StructureEntry) -> StructureEntry {
        match self.inner.repo.insert_structure(&entry).await {
            Ok(true) => {},
            Ok(false) => {
                if let Lookup::Hit(existing) = self.durable_structure(&entry.key).await {
                    tracing::debug!(key = %entry.key, "Durable row already present, keeping it");
                    self.inner.memory.put_structure(existing.clone());
                    return existing;
                }
            },
            // The snapshot is still a repair source for the next process.
            Err(err) => self.degraded("durable", entry.key.as_str(), &err),
        }
        if let Err(err) = self.inner.backup.put(&entry).await {
            self.degraded("backup", entry.key.as_str(), &err);
        }
        self.inner.memory.put_structure(entry.clone());
        entry
    }

    // =========================================================================
    // Classifications
    // =========================================================================

    /// Return the classification of `heading`, calling the classifier only
    /// on a miss.
    ///
    /// Headings are normalized first, so `"STYRELSEN"` and `"styrelsen "`
    /// share an entry. The classifier receives the normalized text.
    #[instrument(skip(self, classifier))]
    pub async fn classify<C: Classifier>(&self, classifier: &C, heading: &str) -> Result<Cached<ClassificationEntry>> {
        let key = HeadingKey::new(heading);
        if let Some(hit) = self.classification_unlocked(&key).await {
            return Ok(hit);
        }

        let entry = {
            let _lock = self.inner.locks.acquire(&LockName::classification(&key)).await?;
            if let Some(hit) = self.classification_locked(&key).await {
                return Ok(hit);
            }
            let classification = classifier.classify(key.as_str()).await.or_raise(|| ErrorKind::Compute)?;
            let entry = ClassificationEntry::new(key, classification)?;
            if let Err(err) = self.inner.repo.upsert_classification(&entry).await {
                self.degraded("durable", entry.key.as_str(), &err);
            }
            self.inner.memory.put_classification(entry.clone());
            entry
        };

        self.enforce_budget().await;
        Ok(Cached::new(entry, Tier::Computed))
    }

    /// Look up the classification of `heading` without calling a classifier.
    #[instrument(skip(self))]
    pub async fn lookup_classification(&self, heading: &str) -> Result<Option<Cached<ClassificationEntry>>> {
        let key = HeadingKey::new(heading);
        if let Some(hit) = self.classification_unlocked(&key).await {
            return Ok(Some(hit));
        }
        let _lock = self.inner.locks.acquire(&LockName::classification(&key)).await?;
        Ok(self.classification_locked(&key).await)
    }

    /// Store a classification, replacing any existing one for its heading.
    #[instrument(skip(self, entry), fields(key = %entry.key))]
    pub async fn put_classification(&self, entry: ClassificationEntry) -> Result<()> {
        ClassificationEntry::validate(&entry.classification)?;
        {
            let _lock = self.inner.locks.acquire(&LockName::classification(&entry.key)).await?;
            self.inner.repo.upsert_classification(&entry).await?;
            self.inner.memory.put_classification(entry);
        }
        self.enforce_budget().await;
        Ok(())
    }

    /// Remove the classification of one heading.
    #[instrument(skip(self))]
    pub async fn clear_classification(&self, heading: &str) -> Result<bool> {
        let key = HeadingKey::new(heading);
        let _lock = self.inner.locks.acquire(&LockName::classification(&key)).await?;
        let removed = self.inner.repo.delete_classification(&key).await?;
        self.inner.memory.remove_classification(&key);
        Ok(removed)
    }

    async fn classification_unlocked(&self, key: &HeadingKey) -> Option<Cached<ClassificationEntry>> {
        if let Some(hit) = self.memory_classification(key).await {
            return Some(hit);
        }
        self.durable_classification(key).await.hit().map(|entry| self.classification_hit(entry))
    }

    async fn classification_locked(&self, key: &HeadingKey) -> Option<Cached<ClassificationEntry>> {
        if let Some(hit) = self.memory_classification(key).await {
            return Some(hit);
        }
        match self.durable_classification(key).await {
            Lookup::Hit(entry) => Some(self.classification_hit(entry)),
            Lookup::Corrupt(reason) => {
                tracing::warn!(key = %key, %reason, "Purging corrupt classification entry");
                if let Err(err) = self.inner.repo.delete_classification(key).await {
                    tracing::warn!(key = %key, error = ?err, "Could not purge corrupt classification entry");
                }
                None
            },
            Lookup::Miss => None,
        }
    }

    async fn memory_classification(&self, key: &HeadingKey) -> Option<Cached<ClassificationEntry>> {
        let mut entry = self.inner.memory.get_classification(key)?;
        let now = OffsetDateTime::now_utc();
        match self.inner.repo.touch_classification(key, now).await {
            Ok(Some(count)) => entry.access_count = count,
            Ok(None) => {
                tracing::debug!(key = %key, "Memory entry has no durable row, dropping it");
                self.inner.memory.remove_classification(key);
                return None;
            },
            Err(err) => {
                tracing::warn!(key = %key, error = ?err, "Could not record access in durable tier");
                entry.access_count += 1;
            },
        }
        entry.accessed_at = now;
        tracing::debug!(key = %key, "Memory hit");
        self.inner.memory.put_classification(entry.clone());
        Some(Cached::new(entry, Tier::Memory))
    }

    async fn durable_classification(&self, key: &HeadingKey) -> Lookup<ClassificationEntry> {
        match self.inner.repo.get_classification(key).await {
            Ok(lookup) => lookup,
            Err(err) => {
                tracing::warn!(key = %key, error = ?err, "Durable tier unreadable, treating as a miss");
                Lookup::Miss
            },
        }
    }

    fn classification_hit(&self, entry: ClassificationEntry) -> Cached<ClassificationEntry> {
        tracing::debug!(key = %entry.key, "Durable hit");
        self.inner.memory.put_classification(entry.clone());
        Cached::new(entry, Tier::Durable)
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Remove every entry from every tier.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<ClearReport> {
        let _maintenance = self.inner.locks.acquire(&LockName::maintenance()).await?;
        let report = ClearReport {
            structures: self.inner.repo.clear_structures().await?,
            classifications: self.inner.repo.clear_classifications().await?,
            snapshots: self.inner.backup.clear().await?,
        };
        self.inner.memory.clear();
        tracing::info!(
            structures = report.structures,
            classifications = report.classifications,
            snapshots = report.snapshots,
            "Cleared cache"
        );
        Ok(report)
    }

    /// Remove every classification, keeping structure entries.
    #[instrument(skip(self))]
    pub async fn clear_classifications(&self) -> Result<u64> {
        let _maintenance = self.inner.locks.acquire(&LockName::maintenance()).await?;
        let removed = self.inner.repo.clear_classifications().await?;
        self.inner.memory.clear_classifications();
        tracing::info!(removed, "Cleared classifications");
        Ok(removed)
    }

    /// Forget this process's memory tier. Other tiers are untouched.
    pub fn clear_memory(&self) {
        self.inner.memory.clear();
    }

    /// Evict least recently used entries until at most `target_bytes` remain.
    pub async fn evict_to_target(&self, target_bytes: u64) -> Result<EvictionReport> {
        self.inner.eviction.evict_to_target(target_bytes).await
    }

    /// Bytes held by the durable and backup tiers together.
    pub async fn current_size_bytes(&self) -> Result<u64> {
        self.inner.eviction.current_size_bytes().await
    }

    #[instrument(skip(self))]
    pub async fn statistics(&self) -> Result<Statistics> {
        let structures = self.inner.repo.structure_summary().await?;
        let classifications = self.inner.repo.classification_summary().await?;
        let snapshots = self.inner.backup.list().await?;
        let backup_bytes = snapshots.iter().map(|(_, file)| file.size).sum();
        let durable_bytes = structures.size_bytes + classifications.size_bytes;
        let (memory_structures, memory_classifications) = self.inner.memory.entry_counts();
        Ok(Statistics {
            structure_entries: structures.entries,
            classification_entries: classifications.entries,
            backup_snapshots: snapshots.len() as u64,
            durable_bytes,
            backup_bytes,
            total_bytes: durable_bytes + backup_bytes,
            average_compute_seconds: structures.average_compute_seconds,
            most_accessed: self.inner.repo.most_accessed(MOST_ACCESSED_LIMIT).await?,
            classification_tokens: classifications.tokens_used,
            classification_cost: classifications.cost,
            memory_structures,
            memory_classifications,
            degraded_writes: self.inner.degraded_writes.load(Ordering::Relaxed),
        })
    }

    /// Copy every valid snapshot missing from the durable tier back into it,
    /// deleting snapshots that fail verification.
    #[instrument(skip(self))]
    pub async fn repair_from_backup(&self) -> Result<RepairReport> {
        let _maintenance = self.inner.locks.acquire(&LockName::maintenance()).await?;
        let mut report = RepairReport::default();
        for key in self.inner.backup.list_keys().await? {
            report.scanned += 1;
            let _lock = self.inner.locks.acquire(&LockName::structure(&key)).await?;
            match self.inner.backup.get(&key).await? {
                Lookup::Hit(entry) => {
                    if self.inner.repo.insert_structure(&entry).await? {
                        report.restored += 1;
                    }
                },
                Lookup::Corrupt(reason) => {
                    tracing::warn!(key = %key, %reason, "Deleting corrupt backup snapshot");
                    if self.inner.backup.delete(&key).await? {
                        report.purged += 1;
                    }
                },
                Lookup::Miss => {},
            }
        }
        tracing::info!(scanned = report.scanned, restored = report.restored, purged = report.purged, "Repaired from backup");
        Ok(report)
    }

    /// Evict down to the target ratio if a size budget is configured and exceeded.
    ///
    /// Called after every population, never while holding a key lock.
    async fn enforce_budget(&self) {
        let (Some(max), Some(target)) = (self.inner.options.max_size_bytes, self.inner.options.eviction_target()) else {
            return;
        };
        let size = match self.current_size_bytes().await {
            Ok(size) => size,
            Err(err) => {
                tracing::warn!(error = ?err, "Could not measure cache size");
                return;
            },
        };
        if size <= max {
            return;
        }
        if let Err(err) = self.evict_to_target(target).await {
            tracing::warn!(error = ?err, size, max, "Eviction failed, cache is over budget");
        }
    }

    fn degraded(&self, tier: &'static str, key: &str, err: &Error) {
        self.inner.degraded_writes.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(tier, key, error = ?err, "Cache write failed, result returned without being persisted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::classification_fixtures::classification;
    use crate::models::structure_fixtures::report;
    use crate::models::{Classification, StructureResult};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use strata_storage::backend::MockBackend;

    struct CountingDetector {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingDetector {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0), delay: Duration::ZERO, fail: false }
        }

        fn slow(delay: Duration) -> Self {
            Self { delay, ..Self::new() }
        }

        fn failing() -> Self {
            Self { fail: true, ..Self::new() }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Detector for CountingDetector {
        type Error = std::io::Error;

        fn version(&self) -> &str {
            "detector-1.0"
        }

        async fn compute_structure(&self, _source: &[u8]) -> std::result::Result<StructureResult, Self::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(std::io::Error::other("detector crashed"));
            }
            Ok(report(2, 1))
        }
    }

    #[derive(Default)]
    struct CountingClassifier {
        calls: AtomicUsize,
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Classifier for CountingClassifier {
        type Error = std::io::Error;

        async fn classify(&self, heading: &str) -> std::result::Result<Classification, Self::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(heading.to_string());
            Ok(classification("board", 0.92))
        }
    }

    fn options(dir: &Path) -> CacheOptions {
        CacheOptions::new(dir).with_lock_timeout(Duration::from_secs(10))
    }

    async fn open(dir: &Path) -> Cache {
        Cache::open(options(dir)).await.unwrap()
    }

    async fn corrupt_durable(cache: &Cache, key: &CacheKey) {
        sqlx::query("UPDATE structures SET payload = replace(payload, 'Noter', 'Notez') WHERE key = ?1")
            .bind(key.as_str())
            .execute(cache.inner.db.pool())
            .await
            .unwrap();
    }

    fn corrupt_snapshot(cache: &Cache, key: &CacheKey) {
        let path = cache.root().join(BACKUP_DIR).join(format!("{key}.json"));
        let text = std::fs::read_to_string(&path).unwrap().replacen("Noter", "Notez", 1);
        std::fs::write(path, text).unwrap();
    }

    #[tokio::test]
    async fn test_open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir.path().join("nested/cache")).await;
        assert!(cache.root().join(DATABASE_FILE).is_file());
        assert!(cache.root().join(BACKUP_DIR).is_dir());
        assert!(cache.root().join(LOCKS_DIR).is_dir());
        cache.close().await;
        // Opening again is idempotent.
        open(&dir.path().join("nested/cache")).await.close().await;
    }

    #[tokio::test]
    async fn test_invalid_options() {
        let dir = tempfile::tempdir().unwrap();
        let options = CacheOptions { eviction_target_ratio: 0.0, ..options(dir.path()) };
        let err = Cache::open(options).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Config(_)));
    }

    #[tokio::test]
    async fn test_analyze_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let detector = CountingDetector::new();
        let source = Source::new("report.pdf", b"%PDF-1.7 annual report");

        let first = cache.analyze(&detector, source).await.unwrap();
        assert_eq!(first.tier, Tier::Computed);
        assert_eq!(first.value.key, cache.structure_key("detector-1.0", source.bytes));
        assert_eq!(first.value.source_name, "report.pdf");
        assert_eq!(first.value.source_size, source.bytes.len() as u64);

        let second = cache.analyze(&detector, source).await.unwrap();
        assert_eq!(second.tier, Tier::Memory);

        cache.clear_memory();
        let third = cache.analyze(&detector, source).await.unwrap();
        assert_eq!(third.tier, Tier::Durable);
        assert_eq!(third.value.payload(), first.value.payload());
        assert_eq!(detector.calls(), 1);

        let snapshot = cache.root().join(BACKUP_DIR).join(format!("{}.json", first.value.key));
        assert!(snapshot.is_file());
    }

    #[tokio::test]
    async fn test_put_and_lookup_structure() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let mut payload = report(5, 2);
        for section in &mut payload.sections {
            section.subsections.clear();
        }
        let key: CacheKey = "abc123".parse().unwrap();
        let entry = StructureEntry::new(key.clone(), "abc.pdf", 10, "detector-1.0", payload, Duration::from_secs(3))
            .unwrap();
        assert!(cache.put_structure(entry.clone()).await.unwrap());

        cache.clear_memory();
        let found = cache.lookup_structure(&key).await.unwrap().unwrap();
        assert_eq!(found.tier, Tier::Durable);
        assert_eq!((found.value.section_count, found.value.table_count), (5, 2));
        assert_eq!(found.value.payload(), entry.payload());

        assert!(cache.lookup_structure(&"missing".parse().unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_structure_keeps_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let key: CacheKey = "abc123".parse().unwrap();
        let first = StructureEntry::new(key.clone(), "a", 1, "v1", report(1, 0), Duration::ZERO).unwrap();
        let second = StructureEntry::new(key.clone(), "b", 1, "v1", report(3, 1), Duration::ZERO).unwrap();
        assert!(cache.put_structure(first.clone()).await.unwrap());
        assert!(!cache.put_structure(second).await.unwrap());

        let found = cache.lookup_structure(&key).await.unwrap().unwrap();
        assert_eq!(found.value.payload(), first.payload());
        cache.clear_memory();
        let found = cache.lookup_structure(&key).await.unwrap().unwrap();
        assert_eq!(found.value.payload(), first.payload());
        assert_eq!(found.value.source_name, "a");
    }

    #[tokio::test]
    async fn test_classification_keeps_last_write() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let first = ClassificationEntry::new(HeadingKey::new("Noter"), classification("notes", 0.4)).unwrap();
        let second = ClassificationEntry::new(HeadingKey::new("NOTER"), classification("appendix", 0.8)).unwrap();
        cache.put_classification(first).await.unwrap();
        cache.put_classification(second).await.unwrap();

        cache.clear_memory();
        let found = cache.lookup_classification("noter").await.unwrap().unwrap();
        assert_eq!(found.tier, Tier::Durable);
        assert_eq!(found.value.classification.primary, "appendix");
    }

    #[tokio::test]
    async fn test_self_heals_from_backup() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let detector = CountingDetector::new();
        let source = Source::new("report.pdf", b"content");
        let original = cache.analyze(&detector, source).await.unwrap().into_inner();

        corrupt_durable(&cache, &original.key).await;
        cache.clear_memory();
        let healed = cache.analyze(&detector, source).await.unwrap();
        assert_eq!(healed.tier, Tier::Backup);
        assert_eq!(healed.value.payload(), original.payload());
        assert_eq!(detector.calls(), 1);

        // The durable tier was repaired.
        cache.clear_memory();
        let again = cache.lookup_structure(&original.key).await.unwrap().unwrap();
        assert_eq!(again.tier, Tier::Durable);
        assert_eq!(again.value.payload(), original.payload());
    }

    #[tokio::test]
    async fn test_corrupt_everywhere_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let detector = CountingDetector::new();
        let source = Source::new("report.pdf", b"content");
        let original = cache.analyze(&detector, source).await.unwrap().into_inner();

        corrupt_durable(&cache, &original.key).await;
        corrupt_snapshot(&cache, &original.key);
        cache.clear_memory();
        assert!(cache.lookup_structure(&original.key).await.unwrap().is_none());

        let recomputed = cache.analyze(&detector, source).await.unwrap();
        assert_eq!(recomputed.tier, Tier::Computed);
        assert_eq!(recomputed.value.payload(), original.payload());
        assert_eq!(detector.calls(), 2);
        assert!(cache.inner.backup.get(&original.key).await.unwrap().is_hit());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_compute_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let detector = Arc::new(CountingDetector::slow(Duration::from_millis(100)));

        let tasks = (0..8).map(|_| {
            let (cache, detector) = (cache.clone(), detector.clone());
            tokio::spawn(async move { cache.analyze(&*detector, Source::new("doc", b"same bytes")).await })
        });
        let results: Vec<_> = futures::future::join_all(tasks).await.into_iter().map(|r| r.unwrap().unwrap()).collect();

        assert_eq!(detector.calls(), 1);
        assert_eq!(results.iter().filter(|r| r.tier == Tier::Computed).count(), 1);
        for result in &results {
            assert_eq!(result.value.payload(), results[0].value.payload());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_separate_instances_compute_once() {
        let dir = tempfile::tempdir().unwrap();
        // Two instances share nothing in memory, like two processes.
        let a = open(dir.path()).await;
        let b = open(dir.path()).await;
        let detector = Arc::new(CountingDetector::slow(Duration::from_millis(100)));

        let tasks = [a, b].into_iter().map(|cache| {
            let detector = detector.clone();
            tokio::spawn(async move { cache.analyze(&*detector, Source::new("doc", b"shared")).await })
        });
        let results: Vec<_> = futures::future::join_all(tasks).await.into_iter().map(|r| r.unwrap().unwrap()).collect();

        assert_eq!(detector.calls(), 1);
        let tiers: Vec<_> = results.iter().map(|r| r.tier).collect();
        assert!(tiers.contains(&Tier::Computed));
        assert!(tiers.contains(&Tier::Durable));
    }

    #[tokio::test]
    async fn test_lock_timeout_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(options(dir.path()).with_lock_timeout(Duration::from_millis(100))).await.unwrap();
        let detector = CountingDetector::new();
        let source = Source::new("doc", b"contended");
        let key = cache.structure_key(detector.version(), source.bytes);

        let other = LockManager::new(cache.root().join(LOCKS_DIR), Duration::from_secs(1)).unwrap();
        let held = other.acquire(&LockName::structure(&key)).await.unwrap();
        let err = cache.analyze(&detector, source).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::LockTimeout(_)));
        assert!(err.is_retryable());
        assert_eq!(detector.calls(), 0);

        drop(held);
        assert_eq!(cache.analyze(&detector, source).await.unwrap().tier, Tier::Computed);
    }

    #[tokio::test]
    async fn test_compute_failure_leaves_no_state() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let detector = CountingDetector::failing();
        let source = Source::new("doc", b"broken");

        let err = cache.analyze(&detector, source).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Compute));
        let stats = cache.statistics().await.unwrap();
        assert_eq!(stats.structure_entries, 0);
        assert_eq!(stats.backup_snapshots, 0);
        assert_eq!(stats.memory_structures, 0);

        // A later call computes again rather than caching the failure.
        assert!(cache.analyze(&detector, source).await.is_err());
        assert_eq!(detector.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_backup_write_is_degraded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::default());
        backend.fail_writes(true);
        let cache = Cache::open_with_backup(options(dir.path()), backend.clone()).await.unwrap();
        let detector = CountingDetector::new();

        let result = cache.analyze(&detector, Source::new("doc", b"bytes")).await.unwrap();
        assert_eq!(result.tier, Tier::Computed);
        let stats = cache.statistics().await.unwrap();
        assert_eq!(stats.degraded_writes, 1);
        assert_eq!(stats.structure_entries, 1);
        assert_eq!(stats.backup_snapshots, 0);
        assert_eq!(backend.write_count(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_backup_falls_through_to_compute() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::default());
        let cache = Cache::open_with_backup(options(dir.path()), backend.clone()).await.unwrap();
        let detector = CountingDetector::new();
        let source = Source::new("doc", b"bytes");
        let first = cache.analyze(&detector, source).await.unwrap().into_inner();

        sqlx::query("DELETE FROM structures").execute(cache.inner.db.pool()).await.unwrap();
        cache.clear_memory();
        backend.fail_reads(true);
        let again = cache.analyze(&detector, source).await.unwrap();
        assert_eq!(again.tier, Tier::Computed);
        assert_eq!(again.value.payload(), first.payload());
        assert_eq!(detector.calls(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_durable_tier_is_degraded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let detector = CountingDetector::new();
        let classifier = CountingClassifier::default();
        cache.inner.db.pool().close().await;

        let result = cache.analyze(&detector, Source::new("doc", b"bytes")).await.unwrap();
        assert_eq!(result.tier, Tier::Computed);
        assert_eq!(cache.inner.degraded_writes.load(Ordering::Relaxed), 1);
        // The snapshot is still written so a later process can repair from it.
        assert!(cache.inner.backup.get(&result.value.key).await.unwrap().is_hit());

        let again = cache.analyze(&detector, Source::new("doc", b"bytes")).await.unwrap();
        assert_eq!(again.tier, Tier::Memory);
        assert_eq!(again.value.access_count, 1);
        assert_eq!(detector.calls(), 1);

        let classified = cache.classify(&classifier, "Noter").await.unwrap();
        assert_eq!(classified.tier, Tier::Computed);
        assert_eq!(cache.inner.degraded_writes.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_memory_hits_count_as_access() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let detector = CountingDetector::new();
        let a = cache.analyze(&detector, Source::new("a", b"a")).await.unwrap().into_inner();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let b = cache.analyze(&detector, Source::new("b", b"b")).await.unwrap().into_inner();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let hit = cache.analyze(&detector, Source::new("a", b"a")).await.unwrap();
        assert_eq!(hit.tier, Tier::Memory);
        assert_eq!(hit.value.access_count, 1);
        assert!(hit.value.accessed_at > b.accessed_at);

        let size = cache.current_size_bytes().await.unwrap();
        let report = cache.evict_to_target(size - 1).await.unwrap();
        assert_eq!(report.structures_evicted, 1);
        assert!(cache.inner.repo.get_structure(&a.key).await.unwrap().is_hit());
        assert!(cache.lookup_structure(&b.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_classification_hits_count_as_access() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let classifier = CountingClassifier::default();
        cache.classify(&classifier, "Noter").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.classify(&classifier, "Styrelsen").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let hit = cache.classify(&classifier, "noter").await.unwrap();
        assert_eq!(hit.tier, Tier::Memory);
        assert_eq!(hit.value.access_count, 1);

        let size = cache.current_size_bytes().await.unwrap();
        let report = cache.evict_to_target(size - 1).await.unwrap();
        assert_eq!(report.classifications_evicted, 1);
        assert!(cache.lookup_classification("Noter").await.unwrap().is_some());
        assert!(cache.lookup_classification("Styrelsen").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_entry_without_durable_row_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let detector = CountingDetector::new();
        let source = Source::new("doc", b"bytes");
        let first = cache.analyze(&detector, source).await.unwrap().into_inner();

        // Another process clears the entry; this one still holds it in memory.
        let other = open(dir.path()).await;
        assert!(other.clear_one(&first.key).await.unwrap());
        assert!(cache.lookup_structure(&first.key).await.unwrap().is_none());
        assert!(cache.inner.memory.get_structure(&first.key).is_none());
    }

    #[tokio::test]
    async fn test_population_keeps_existing_durable_row() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let key: CacheKey = "abc123".parse().unwrap();
        let existing = StructureEntry::new(key.clone(), "first", 1, "v1", report(1, 0), Duration::ZERO).unwrap();
        assert!(cache.inner.repo.insert_structure(&existing).await.unwrap());

        let late = StructureEntry::new(key.clone(), "second", 1, "v1", report(3, 1), Duration::ZERO).unwrap();
        let kept = cache.populate_structure(late).await;
        assert_eq!(kept.source_name, "first");
        assert_eq!(kept.payload(), existing.payload());
        let held = cache.inner.memory.get_structure(&key).unwrap();
        assert_eq!(held.source_name, "first");
        assert_eq!(held.payload(), existing.payload());
        // The losing entry is never snapshotted.
        assert!(!cache.inner.backup.get(&key).await.unwrap().is_hit());
    }

    #[tokio::test]
    async fn test_classify_normalizes_headings() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let classifier = CountingClassifier::default();

        let first = cache.classify(&classifier, "STYRELSEN").await.unwrap();
        assert_eq!(first.tier, Tier::Computed);
        let second = cache.classify(&classifier, "styrelsen ").await.unwrap();
        assert_eq!(second.tier, Tier::Memory);
        assert_eq!(second.value.classification, first.value.classification);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*classifier.seen.lock().unwrap(), ["styrelsen"]);

        // A fresh process finds it in the durable tier.
        let other = open(dir.path()).await;
        let third = other.classify(&classifier, "Styrélsen").await.unwrap();
        assert_eq!(third.tier, Tier::Durable);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_operations() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let detector = CountingDetector::new();
        let classifier = CountingClassifier::default();
        let a = cache.analyze(&detector, Source::new("a", b"a")).await.unwrap().into_inner();
        cache.analyze(&detector, Source::new("b", b"b")).await.unwrap();
        cache.classify(&classifier, "Noter").await.unwrap();
        cache.classify(&classifier, "Styrelsen").await.unwrap();

        assert!(cache.clear_one(&a.key).await.unwrap());
        assert!(!cache.clear_one(&a.key).await.unwrap());
        assert!(cache.lookup_structure(&a.key).await.unwrap().is_none());

        assert!(cache.clear_classification("NOTER").await.unwrap());
        assert!(cache.lookup_classification("noter").await.unwrap().is_none());
        assert_eq!(cache.clear_classifications().await.unwrap(), 1);

        let report = cache.clear_all().await.unwrap();
        assert_eq!(report, ClearReport { structures: 1, classifications: 0, snapshots: 1 });
        let stats = cache.statistics().await.unwrap();
        assert_eq!(stats.total_bytes, 0);
        assert_eq!((stats.memory_structures, stats.memory_classifications), (0, 0));
    }

    #[tokio::test]
    async fn test_eviction_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let detector = CountingDetector::new();
        let mut entries = Vec::new();
        for i in 0..6 {
            let name = format!("doc-{i}");
            entries.push(cache.analyze(&detector, Source::new(&name, name.as_bytes())).await.unwrap().into_inner());
        }
        // Touch the two oldest through a second instance with an empty memory tier.
        let other = open(dir.path()).await;
        for entry in &entries[..2] {
            assert_eq!(other.lookup_structure(&entry.key).await.unwrap().unwrap().tier, Tier::Durable);
        }

        // Recency is now doc-2 < doc-3 < doc-4 < doc-5 < doc-0 < doc-1.
        let snapshots = cache.inner.backup.list().await.unwrap();
        let footprint = |entry: &StructureEntry| {
            entry.size_bytes() + snapshots.iter().find(|(key, _)| *key == entry.key).unwrap().1.size
        };
        let keep = [&entries[4], &entries[5], &entries[0], &entries[1]];
        let target: u64 = keep.iter().map(|&e| footprint(e)).sum();

        let report = cache.evict_to_target(target).await.unwrap();
        assert_eq!(report.structures_evicted, 2);
        assert!(cache.current_size_bytes().await.unwrap() <= target);
        for (i, entry) in entries.iter().enumerate() {
            let kept = !matches!(i, 2 | 3);
            assert_eq!(other.inner.repo.get_structure(&entry.key).await.unwrap().is_hit(), kept, "doc-{i}");
        }
    }

    #[tokio::test]
    async fn test_size_budget_is_enforced_after_population() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let detector = CountingDetector::new();
        cache.analyze(&detector, Source::new("doc-0", b"doc-0")).await.unwrap();
        let one = cache.current_size_bytes().await.unwrap();

        let budget = one * 5 / 2;
        let bounded = Cache::open(options(dir.path()).with_max_size_bytes(budget)).await.unwrap();
        let mut last = None;
        for i in 1..4 {
            let name = format!("doc-{i}");
            last = Some(bounded.analyze(&detector, Source::new(&name, name.as_bytes())).await.unwrap().into_inner());
        }
        let stats = bounded.statistics().await.unwrap();
        assert!(stats.total_bytes <= budget, "{} > {budget}", stats.total_bytes);
        assert_eq!(stats.structure_entries, 2);
        let last = last.unwrap();
        assert!(bounded.inner.repo.get_structure(&last.key).await.unwrap().is_hit());
    }

    #[tokio::test]
    async fn test_repair_from_backup() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let detector = CountingDetector::new();
        let a = cache.analyze(&detector, Source::new("a", b"a")).await.unwrap().into_inner();
        let b = cache.analyze(&detector, Source::new("b", b"b")).await.unwrap().into_inner();
        sqlx::query("DELETE FROM structures").execute(cache.inner.db.pool()).await.unwrap();
        corrupt_snapshot(&cache, &b.key);

        let report = cache.repair_from_backup().await.unwrap();
        assert_eq!(report, RepairReport { scanned: 2, restored: 1, purged: 1 });
        assert!(cache.inner.repo.get_structure(&a.key).await.unwrap().is_hit());
        assert_eq!(cache.statistics().await.unwrap().backup_snapshots, 1);
    }

    #[tokio::test]
    async fn test_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let detector = CountingDetector::new();
        let classifier = CountingClassifier::default();
        let a = cache.analyze(&detector, Source::new("a", b"a")).await.unwrap().into_inner();
        cache.analyze(&detector, Source::new("b", b"b")).await.unwrap();
        cache.classify(&classifier, "Noter").await.unwrap();
        for _ in 0..2 {
            cache.clear_memory();
            cache.lookup_structure(&a.key).await.unwrap();
        }

        let stats = cache.statistics().await.unwrap();
        assert_eq!(stats.structure_entries, 2);
        assert_eq!(stats.classification_entries, 1);
        assert_eq!(stats.backup_snapshots, 2);
        assert_eq!(stats.total_bytes, stats.durable_bytes + stats.backup_bytes);
        assert!(stats.durable_bytes > 0 && stats.backup_bytes > 0);
        assert_eq!(stats.most_accessed[0].key, a.key);
        assert_eq!(stats.most_accessed[0].count, 2);
        assert_eq!(stats.classification_tokens, 42);
        assert_eq!(stats.degraded_writes, 0);
    }
}
