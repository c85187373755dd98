//! Per-key exclusive locks shared between tasks and processes.
//!
//! Every lock is two layers deep. Tasks in the same process first queue on an
//! async mutex for the lock name, so only one of them ever touches the lock
//! file. That task then takes an advisory exclusive lock on
//! `<dir>/<name>.lock`, which is what excludes other processes. The OS drops
//! advisory locks when the holding process exits, so a crashed holder can
//! never wedge the cache. Lock files themselves are left in place: removing
//! one while another process is waiting on it would let two holders in.

use crate::error::{ErrorKind, Result};
use crate::{CacheKey, HeadingKey};
use exn::ResultExt;
use fs4::tokio::AsyncFileExt;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::instrument;

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(250);

/// Name of a lock, safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockName(String);

impl LockName {
    pub fn structure(key: &CacheKey) -> Self {
        Self(format!("s-{key}"))
    }

    /// Heading text is arbitrary Unicode, so its lock is named by digest.
    pub fn classification(key: &HeadingKey) -> Self {
        Self(format!("c-{}", blake3::hash(key.as_str().as_bytes()).to_hex()))
    }

    /// Coarse lock serializing eviction and bulk clears.
    pub fn maintenance() -> Self {
        Self("maintenance".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A held lock. Dropping it releases both layers.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct KeyLock {
    // Field order matters: the file lock is released before the next local
    // waiter is woken.
    _file: File,
    _local: OwnedMutexGuard<()>,
}

pub struct LockManager {
    dir: PathBuf,
    timeout: Duration,
    local: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockManager {
    /// Create a lock manager storing lock files in `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).or_raise(|| ErrorKind::Lock)?;
        Ok(Self { dir, timeout, local: Mutex::new(HashMap::new()) })
    }

    fn local_mutex(&self, name: &LockName) -> Arc<AsyncMutex<()>> {
        // The map is only ever held for this short, non-async section, so a
        // poisoned map is still consistent.
        let mut map = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        // Drop mutexes nobody is holding or waiting on.
        map.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        map.entry(name.0.clone()).or_default().clone()
    }

    /// Acquire the named lock, waiting at most the configured timeout.
    ///
    /// Returns [`ErrorKind::LockTimeout`] if the lock could not be acquired in
    /// time. Callers should back off and retry rather than bypass the lock.
    #[instrument(level = "debug", skip(self, name), fields(lock = %name))]
    pub async fn acquire(&self, name: &LockName) -> Result<KeyLock> {
        let deadline = Instant::now() + self.timeout;
        let local = tokio::time::timeout_at(deadline, self.local_mutex(name).lock_owned())
            .await
            .or_raise(|| ErrorKind::LockTimeout(name.to_string()))?;

        let path = self.dir.join(format!("{name}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await
            .or_raise(|| ErrorKind::Lock)?;

        let mut backoff = INITIAL_BACKOFF;
        loop {
            if file.try_lock_exclusive().or_raise(|| ErrorKind::Lock)? {
                return Ok(KeyLock { _file: file, _local: local });
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(lock = %name, timeout = ?self.timeout, "Timed out waiting for lock held by another process");
                exn::bail!(ErrorKind::LockTimeout(name.to_string()));
            }
            tokio::time::sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Run `f` while holding the named lock.
    ///
    /// The lock is released however `f` finishes, including when it returns
    /// an error, panics, or the returned future is dropped.
    pub async fn with_exclusive_lock<F, Fut, T>(&self, name: &LockName, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _lock = self.acquire(name).await?;
        f().await
    }
}
