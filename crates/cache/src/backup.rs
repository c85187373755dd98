//! Backup tier: one snapshot file per structure key.
//!
//! Snapshots are only ever read to repair the durable tier, never before it.

use crate::CacheKey;
use crate::error::{ErrorKind, Result};
use crate::integrity::Lookup;
use crate::models::{Snapshot, StructureEntry};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use strata_storage::error::ErrorKind as StorageErrorKind;
use strata_storage::{BackendHandle, FileInfo};
use tracing::instrument;

const EXTENSION: &str = "json";

#[derive(Clone)]
pub struct BackupTier {
    backend: BackendHandle,
}

impl BackupTier {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend }
    }

    fn path(key: &CacheKey) -> PathBuf {
        PathBuf::from(format!("{key}.{EXTENSION}"))
    }

    fn key_of(file: &FileInfo) -> Option<CacheKey> {
        if file.path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
            return None;
        }
        file.stem()?.parse().ok()
    }

    #[instrument(level = "debug", skip(self, key), fields(key = %key))]
    pub async fn get(&self, key: &CacheKey) -> Result<Lookup<StructureEntry>> {
        let bytes = match self.backend.read(&Self::path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => return Ok(Lookup::Miss),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Storage),
        };
        Ok(Snapshot::decode(key, &bytes).into())
    }

    /// Write (or replace) the snapshot for an entry.
    #[instrument(level = "debug", skip(self, entry), fields(key = %entry.key))]
    pub async fn put(&self, entry: &StructureEntry) -> Result<()> {
        let bytes = Snapshot::encode(entry)?;
        self.backend.write(&Self::path(&entry.key), &bytes).await.or_raise(|| ErrorKind::Storage)
    }

    /// Returns `true` if a snapshot was deleted.
    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.delete_path(&Self::path(key)).await
    }

    async fn delete_path(&self, path: &Path) -> Result<bool> {
        match self.backend.delete(path).await {
            Ok(()) => Ok(true),
            Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => Ok(false),
            Err(e) => Err(e).or_raise(|| ErrorKind::Storage),
        }
    }

    /// Every snapshot file, in no particular order.
    pub async fn list(&self) -> Result<Vec<(CacheKey, FileInfo)>> {
        let files = self.backend.list().await.or_raise(|| ErrorKind::Storage)?;
        Ok(files.into_iter().filter_map(|file| Some((Self::key_of(&file)?, file))).collect())
    }

    pub async fn list_keys(&self) -> Result<Vec<CacheKey>> {
        Ok(self.list().await?.into_iter().map(|(key, _)| key).collect())
    }

    /// Total bytes of all snapshot files.
    pub async fn size_bytes(&self) -> Result<u64> {
        Ok(self.list().await?.iter().map(|(_, file)| file.size).sum())
    }

    /// Delete every snapshot, returning how many were removed.
    pub async fn clear(&self) -> Result<u64> {
        let mut removed = 0;
        for (_, file) in self.list().await? {
            if self.delete_path(&file.path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::Corruption;
    use crate::models::structure_fixtures::{entry, report};
    use std::sync::Arc;
    use strata_storage::backend::{LocalBackend, MockBackend};

    fn mock() -> (Arc<MockBackend>, BackupTier) {
        let backend = Arc::new(MockBackend::default());
        (backend.clone(), BackupTier::new(backend))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (_, tier) = mock();
        let original = entry("abc123", report(5, 2));
        tier.put(&original).await.unwrap();
        let found = tier.get(&original.key).await.unwrap().hit().unwrap();
        assert_eq!(found.payload(), original.payload());
        assert_eq!(found.checksum(), original.checksum());
        assert_eq!(tier.list_keys().await.unwrap(), vec![original.key.clone()]);
    }

    #[tokio::test]
    async fn test_miss_and_delete() {
        let (_, tier) = mock();
        let key: CacheKey = "abc123".parse().unwrap();
        assert_eq!(tier.get(&key).await.unwrap().map(|_| ()), Lookup::Miss);
        assert!(!tier.delete(&key).await.unwrap());
        tier.put(&entry("abc123", report(1, 0))).await.unwrap();
        assert!(tier.delete(&key).await.unwrap());
        assert_eq!(tier.get(&key).await.unwrap().map(|_| ()), Lookup::Miss);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot() {
        let backend = Arc::new(MockBackend::with_files([("abc123.json", b"{\"format\": 1, \"key\": ".to_vec())]));
        let tier = BackupTier::new(backend);
        let lookup = tier.get(&"abc123".parse().unwrap()).await.unwrap();
        assert_eq!(lookup.map(|_| ()), Lookup::Corrupt(Corruption::MalformedMetadata));
    }

    #[tokio::test]
    async fn test_write_failure_is_an_error() {
        let (backend, tier) = mock();
        backend.fail_writes(true);
        let err = tier.put(&entry("abc123", report(1, 0))).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Storage));
    }

    #[tokio::test]
    async fn test_size_and_clear_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(LocalBackend::new(dir.path()).unwrap());
        let tier = BackupTier::new(backend);
        tier.put(&entry("a", report(1, 0))).await.unwrap();
        tier.put(&entry("b", report(3, 2))).await.unwrap();
        std::fs::write(dir.path().join("README.txt"), "not a snapshot").unwrap();

        let expected: u64 = ["a.json", "b.json"]
            .iter()
            .map(|name| std::fs::metadata(dir.path().join(name)).unwrap().len())
            .sum();
        assert_eq!(tier.size_bytes().await.unwrap(), expected);
        assert_eq!(tier.clear().await.unwrap(), 2);
        assert_eq!(tier.size_bytes().await.unwrap(), 0);
        assert!(dir.path().join("README.txt").exists());
    }
}
