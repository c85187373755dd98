//! Durable tier: structure and classification tables in SQLite.
//!
//! The two tables never share keys. Structure rows are written once
//! (insert-if-absent) because the same content fingerprint always produces
//! the same analysis; classification rows are replaced on every write since
//! a newer model may classify a heading better.
//!
//! Reading a row is also a write: every hit bumps `accessed_at` and
//! `access_count` in the same statement, which keeps the recency index used
//! by eviction accurate across processes.

use crate::error::{ErrorKind, Result};
use crate::integrity::Lookup;
use crate::models::{
    ClassificationEntry, ClassificationRow, RecencyEntry, RecencyRow, StructureEntry, StructureRow, to_nanos,
};
use crate::{CacheKey, Database, HeadingKey};
use exn::ResultExt;
use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::instrument;

/// Sort order for [`Repository::list_by_recency()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recency {
    /// Least recently accessed first.
    OldestFirst,
    NewestFirst,
}

/// Aggregate figures over the structure table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructureSummary {
    pub entries: u64,
    pub average_compute_seconds: f64,
    pub size_bytes: u64,
}

/// Aggregate figures over the classification table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationSummary {
    pub entries: u64,
    pub tokens_used: u64,
    pub cost: f64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessCount {
    pub key: CacheKey,
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Structures
    // =========================================================================

    /// Fetch and verify a structure entry, recording the access.
    ///
    /// A row whose checksum does not match is reported as
    /// [`Lookup::Corrupt`] and left in place for the caller to purge.
    #[instrument(level = "debug", skip(self, key), fields(key = %key))]
    pub async fn get_structure(&self, key: &CacheKey) -> Result<Lookup<StructureEntry>> {
        let now = to_nanos(OffsetDateTime::now_utc())?;
        let row: Option<StructureRow> = sqlx::query_as(include_str!("../queries/get_structure.sql"))
            .bind(key.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(match row {
            Some(row) => row.into_entry().into(),
            None => Lookup::Miss,
        })
    }

    /// Record an access to a structure row without reading it back.
    ///
    /// Returns the new access count, or `None` if the row no longer exists.
    #[instrument(level = "debug", skip(self, key, at), fields(key = %key))]
    pub async fn touch_structure(&self, key: &CacheKey, at: OffsetDateTime) -> Result<Option<u64>> {
        let count: Option<(i64,)> = sqlx::query_as(include_str!("../queries/touch_structure.sql"))
            .bind(key.as_str())
            .bind(to_nanos(at)?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        count.map(|(count,)| u64::try_from(count).or_raise(|| ErrorKind::InvalidData("access count"))).transpose()
    }

    /// Insert a structure entry unless one already exists for its key.
    ///
    /// Returns `true` if this call inserted the row. The first writer for a
    /// key wins; later writers are silently ignored.
    #[instrument(level = "debug", skip(self, entry), fields(key = %entry.key))]
    pub async fn insert_structure(&self, entry: &StructureEntry) -> Result<bool> {
        let row = StructureRow::try_from(entry)?;
        let result = sqlx::query(include_str!("../queries/insert_structure.sql"))
            .bind(row.key)
            .bind(row.source_name)
            .bind(row.source_size)
            .bind(row.detector_version)
            .bind(row.payload)
            .bind(row.checksum)
            .bind(row.compute_seconds)
            .bind(row.section_count)
            .bind(row.table_count)
            .bind(row.size_bytes)
            .bind(row.created_at)
            .bind(row.accessed_at)
            .bind(row.access_count)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns `true` if a row was deleted.
    pub async fn delete_structure(&self, key: &CacheKey) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_structure.sql"))
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Check for a structure row without recording an access.
    pub async fn has_structure(&self, key: &CacheKey) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(include_str!("../queries/structure_exists.sql"))
            .bind(key.as_str())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(exists)
    }

    /// Keys of every structure row, in no particular order.
    pub async fn structure_keys(&self) -> Result<Vec<CacheKey>> {
        let keys: Vec<(String,)> = sqlx::query_as(include_str!("../queries/structure_keys.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        keys.into_iter().map(|(key,)| key.parse()).collect()
    }

    pub async fn clear_structures(&self) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/clear_structures.sql"))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Classifications
    // =========================================================================

    /// Fetch a classification entry, recording the access.
    #[instrument(level = "debug", skip(self, key), fields(key = %key))]
    pub async fn get_classification(&self, key: &HeadingKey) -> Result<Lookup<ClassificationEntry>> {
        let now = to_nanos(OffsetDateTime::now_utc())?;
        let row: Option<ClassificationRow> = sqlx::query_as(include_str!("../queries/get_classification.sql"))
            .bind(key.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(match row {
            Some(row) => row.into_entry().into(),
            None => Lookup::Miss,
        })
    }

    /// Record an access to a classification row without reading it back.
    #[instrument(level = "debug", skip(self, key, at), fields(key = %key))]
    pub async fn touch_classification(&self, key: &HeadingKey, at: OffsetDateTime) -> Result<Option<u64>> {
        let count: Option<(i64,)> = sqlx::query_as(include_str!("../queries/touch_classification.sql"))
            .bind(key.as_str())
            .bind(to_nanos(at)?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        count.map(|(count,)| u64::try_from(count).or_raise(|| ErrorKind::InvalidData("access count"))).transpose()
    }

    /// Insert or replace the classification for a heading.
    ///
    /// Replacing keeps the original `created_at` and `access_count`.
    #[instrument(level = "debug", skip(self, entry), fields(key = %entry.key))]
    pub async fn upsert_classification(&self, entry: &ClassificationEntry) -> Result<()> {
        let row = ClassificationRow::try_from(entry)?;
        sqlx::query(include_str!("../queries/upsert_classification.sql"))
            .bind(row.key)
            .bind(row.categories)
            .bind(row.primary_category)
            .bind(row.confidence)
            .bind(row.reasoning)
            .bind(row.model)
            .bind(row.tokens_used)
            .bind(row.cost)
            .bind(row.size_bytes)
            .bind(row.created_at)
            .bind(row.accessed_at)
            .bind(row.access_count)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Returns `true` if a row was deleted.
    pub async fn delete_classification(&self, key: &HeadingKey) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_classification.sql"))
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear_classifications(&self) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/clear_classifications.sql"))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Recency & Size
    // =========================================================================

    /// List entries of both tables ordered by last access.
    ///
    /// Ties are broken by table and key so the order is total.
    pub async fn list_by_recency(&self, order: Recency, limit: Option<u32>) -> Result<Vec<RecencyEntry>> {
        let query = match order {
            Recency::OldestFirst => include_str!("../queries/list_by_recency_asc.sql"),
            Recency::NewestFirst => include_str!("../queries/list_by_recency_desc.sql"),
        };
        // SQLite treats a negative LIMIT as no limit.
        let limit = limit.map_or(-1, i64::from);
        let rows: Vec<RecencyRow> =
            sqlx::query_as(query).bind(limit).fetch_all(&self.pool).await.or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(RecencyEntry::try_from).collect()
    }

    /// The single least recently accessed entry across both tables.
    pub async fn oldest(&self) -> Result<Option<RecencyEntry>> {
        Ok(self.list_by_recency(Recency::OldestFirst, Some(1)).await?.into_iter().next())
    }

    /// Total payload bytes across both tables.
    pub async fn total_size_bytes(&self) -> Result<u64> {
        let (total,): (i64,) = sqlx::query_as(include_str!("../queries/total_size.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(total).or_raise(|| ErrorKind::InvalidData("total size"))
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    pub async fn structure_summary(&self) -> Result<StructureSummary> {
        let (entries, average_compute_seconds, size_bytes): (i64, f64, i64) =
            sqlx::query_as(include_str!("../queries/structure_summary.sql"))
                .fetch_one(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        Ok(StructureSummary {
            entries: u64::try_from(entries).or_raise(|| ErrorKind::InvalidData("entries"))?,
            average_compute_seconds,
            size_bytes: u64::try_from(size_bytes).or_raise(|| ErrorKind::InvalidData("size"))?,
        })
    }

    pub async fn classification_summary(&self) -> Result<ClassificationSummary> {
        let (entries, tokens_used, cost, size_bytes): (i64, i64, f64, i64) =
            sqlx::query_as(include_str!("../queries/classification_summary.sql"))
                .fetch_one(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        Ok(ClassificationSummary {
            entries: u64::try_from(entries).or_raise(|| ErrorKind::InvalidData("entries"))?,
            tokens_used: u64::try_from(tokens_used).or_raise(|| ErrorKind::InvalidData("tokens"))?,
            cost,
            size_bytes: u64::try_from(size_bytes).or_raise(|| ErrorKind::InvalidData("size"))?,
        })
    }

    /// Structure keys with the highest access counts, most accessed first.
    pub async fn most_accessed(&self, limit: u32) -> Result<Vec<AccessCount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(include_str!("../queries/most_accessed.sql"))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter()
            .map(|(key, count)| -> Result<AccessCount> {
                Ok(AccessCount {
                    key: key.parse()?,
                    count: u64::try_from(count).or_raise(|| ErrorKind::InvalidData("access count"))?,
                })
            })
            .collect()
    }
}
