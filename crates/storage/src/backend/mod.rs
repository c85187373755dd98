//! Storage backend trait and implementations.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::FileInfo;
use crate::error::Result;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Unified interface for flat-file storage.
///
/// # Path Handling
/// All paths are relative to the storage root and are validated with
/// [`validate_path`](crate::validate_path) by every implementation.
///
/// # Atomicity
/// [`write()`](Self::write) must be atomic from the point of view of any
/// concurrent reader, in this process or another one: a reader observes
/// either the previous contents or the complete new contents, never a
/// partially written file.
///
/// # Examples
///
/// ```
/// use strata_storage::{backend::StorageBackend, error::Result};
///
/// async fn snapshot_bytes(backend: &dyn StorageBackend) -> Result<u64> {
///     let files = backend.list().await?;
///     Ok(files.iter().filter(|f| f.path.extension().is_some_and(|ext| ext == "json")).map(|f| f.size).sum())
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// List every file under the storage root.
    ///
    /// Default implementation collects [`list_stream()`](Self::list_stream)
    /// into a [`Vec`].
    async fn list(&self) -> Result<Vec<FileInfo>> {
        self.list_stream().try_collect().await
    }

    /// Stream metadata for every file under the storage root.
    ///
    /// Files that are still being written (hidden temporary files) are never
    /// yielded.
    fn list_stream(&self) -> FileInfoStream<'_>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Atomically create or replace a file.
    ///
    /// Implementations create parent directories as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;
}
