use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Key salt baked into every cache key. Changing it invalidates every entry.
pub const DEFAULT_SALT: &str = "strata-cache-v1";
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 600;
const DEFAULT_MEMORY_CAPACITY: u64 = 1024;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_EVICTION_TARGET_RATIO: f64 = 0.9;

/// The `[cache]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory shared by every process using the same cache.
    pub root: PathBuf,
    pub salt: String,
    /// Size budget across the durable and backup tiers. No budget when unset.
    pub max_size_bytes: Option<u64>,
    /// Fraction of `max_size_bytes` to evict down to once over budget.
    pub eviction_target_ratio: f64,
    /// How long to wait for another process holding a key lock.
    pub lock_timeout_secs: u64,
    /// Maximum in-memory entries, per table.
    pub memory_capacity: u64,
    pub max_connections: u32,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            salt: DEFAULT_SALT.to_string(),
            max_size_bytes: None,
            eviction_target_ratio: DEFAULT_EVICTION_TARGET_RATIO,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}
impl CacheConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Size to evict down to once `max_size_bytes` has been exceeded.
    pub fn eviction_target(&self) -> Option<u64> {
        self.max_size_bytes.map(|max| (max as f64 * self.eviction_target_ratio).floor() as u64)
    }

    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if !(self.eviction_target_ratio > 0.0 && self.eviction_target_ratio <= 1.0) {
            return Err("cache.eviction_target_ratio must be within (0, 1]");
        }
        if self.lock_timeout_secs == 0 {
            return Err("cache.lock_timeout_secs must be greater than zero");
        }
        if self.memory_capacity == 0 {
            return Err("cache.memory_capacity must be greater than zero");
        }
        if self.max_connections == 0 {
            return Err("cache.max_connections must be greater than zero");
        }
        if self.salt.is_empty() {
            return Err("cache.salt must not be empty");
        }
        Ok(())
    }
}

fn default_root() -> PathBuf {
    directories::ProjectDirs::from("", "", "strata")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("strata"))
}
