use crate::error::{Error, ErrorKind, Result};
use crate::integrity::Corruption;
use crate::models::{Classification, ClassificationEntry, StoredStructure, StructureEntry};
use crate::{CacheKey, HeadingKey};
use exn::{OptionExt, ResultExt};
use time::OffsetDateTime;

pub(crate) fn to_nanos(at: OffsetDateTime) -> Result<i64> {
    i64::try_from(at.unix_timestamp_nanos()).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

pub(crate) fn from_nanos(nanos: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos)).ok()
}

fn to_i64(value: u64, field: &'static str) -> Result<i64> {
    i64::try_from(value).or_raise(|| ErrorKind::InvalidData(field))
}

#[derive(sqlx::FromRow)]
pub(crate) struct StructureRow {
    pub(crate) key: String,
    pub(crate) source_name: String,
    pub(crate) source_size: i64,
    pub(crate) detector_version: String,
    pub(crate) payload: String,
    pub(crate) checksum: String,
    pub(crate) compute_seconds: f64,
    pub(crate) section_count: i64,
    pub(crate) table_count: i64,
    #[sqlx(default)]
    pub(crate) size_bytes: i64,
    pub(crate) created_at: i64,
    pub(crate) accessed_at: i64,
    pub(crate) access_count: i64,
}
impl TryFrom<&StructureEntry> for StructureRow {
    type Error = Error;
    fn try_from(entry: &StructureEntry) -> Result<Self> {
        Ok(Self {
            key: entry.key.to_string(),
            source_name: entry.source_name.clone(),
            source_size: to_i64(entry.source_size, "source size")?,
            detector_version: entry.detector_version.clone(),
            payload: entry.encoded().to_string(),
            checksum: entry.checksum().to_hex(),
            compute_seconds: entry.compute_time.as_secs_f64(),
            section_count: i64::from(entry.section_count),
            table_count: i64::from(entry.table_count),
            size_bytes: to_i64(entry.size_bytes(), "size")?,
            created_at: to_nanos(entry.created_at)?,
            accessed_at: to_nanos(entry.accessed_at)?,
            access_count: to_i64(entry.access_count, "access count")?,
        })
    }
}
impl StructureRow {
    /// Verify the stored payload and rebuild the entry.
    pub(crate) fn into_entry(self) -> std::result::Result<StructureEntry, Corruption> {
        StructureEntry::restore(StoredStructure {
            key: self.key.parse().map_err(|_| Corruption::MalformedMetadata)?,
            source_name: self.source_name,
            source_size: u64::try_from(self.source_size).map_err(|_| Corruption::MalformedMetadata)?,
            detector_version: self.detector_version,
            compute_seconds: self.compute_seconds,
            section_count: u32::try_from(self.section_count).map_err(|_| Corruption::MalformedMetadata)?,
            table_count: u32::try_from(self.table_count).map_err(|_| Corruption::MalformedMetadata)?,
            created_at: from_nanos(self.created_at).ok_or(Corruption::MalformedMetadata)?,
            accessed_at: from_nanos(self.accessed_at).ok_or(Corruption::MalformedMetadata)?,
            access_count: u64::try_from(self.access_count).map_err(|_| Corruption::MalformedMetadata)?,
            encoded: self.payload,
            checksum: self.checksum,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ClassificationRow {
    pub(crate) key: String,
    pub(crate) categories: String,
    pub(crate) primary_category: String,
    pub(crate) confidence: f64,
    pub(crate) reasoning: String,
    pub(crate) model: String,
    pub(crate) tokens_used: i64,
    pub(crate) cost: f64,
    #[sqlx(default)]
    pub(crate) size_bytes: i64,
    pub(crate) created_at: i64,
    pub(crate) accessed_at: i64,
    pub(crate) access_count: i64,
}
impl TryFrom<&ClassificationEntry> for ClassificationRow {
    type Error = Error;
    fn try_from(entry: &ClassificationEntry) -> Result<Self> {
        let c = &entry.classification;
        Ok(Self {
            key: entry.key.to_string(),
            categories: serde_json::to_string(&c.categories).or_raise(|| ErrorKind::InvalidData("categories"))?,
            primary_category: c.primary.clone(),
            confidence: c.confidence,
            reasoning: c.reasoning.clone(),
            model: c.model.clone(),
            tokens_used: to_i64(c.tokens_used, "tokens used")?,
            cost: c.cost,
            size_bytes: to_i64(entry.size_bytes(), "size")?,
            created_at: to_nanos(entry.created_at)?,
            accessed_at: to_nanos(entry.accessed_at)?,
            access_count: to_i64(entry.access_count, "access count")?,
        })
    }
}
impl ClassificationRow {
    pub(crate) fn into_entry(self) -> std::result::Result<ClassificationEntry, Corruption> {
        let classification = Classification {
            categories: serde_json::from_str(&self.categories).map_err(|_| Corruption::MalformedPayload)?,
            primary: self.primary_category,
            confidence: self.confidence,
            reasoning: self.reasoning,
            model: self.model,
            tokens_used: u64::try_from(self.tokens_used).map_err(|_| Corruption::MalformedMetadata)?,
            cost: self.cost,
        };
        ClassificationEntry::validate(&classification).map_err(|_| Corruption::MalformedPayload)?;
        Ok(ClassificationEntry {
            key: HeadingKey::from_normalized(self.key),
            classification,
            created_at: from_nanos(self.created_at).ok_or(Corruption::MalformedMetadata)?,
            accessed_at: from_nanos(self.accessed_at).ok_or(Corruption::MalformedMetadata)?,
            access_count: u64::try_from(self.access_count).map_err(|_| Corruption::MalformedMetadata)?,
        })
    }
}

/// Which table a recency listing entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Structure,
    Classification,
}

/// One entry of the combined recency index over both durable tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecencyEntry {
    pub kind: EntryKind,
    pub key: String,
    pub accessed_at: OffsetDateTime,
    pub size_bytes: u64,
}

#[derive(sqlx::FromRow)]
pub(crate) struct RecencyRow {
    kind: String,
    key: String,
    accessed_at: i64,
    size_bytes: i64,
}
impl TryFrom<RecencyRow> for RecencyEntry {
    type Error = Error;
    fn try_from(row: RecencyRow) -> Result<Self> {
        let kind = match row.kind.as_str() {
            "structure" => EntryKind::Structure,
            "classification" => EntryKind::Classification,
            _ => exn::bail!(ErrorKind::InvalidData("entry kind")),
        };
        Ok(Self {
            kind,
            key: row.key,
            accessed_at: from_nanos(row.accessed_at).ok_or_raise(|| ErrorKind::InvalidData("accessed at"))?,
            size_bytes: u64::try_from(row.size_bytes).or_raise(|| ErrorKind::InvalidData("size"))?,
        })
    }
}
impl RecencyEntry {
    pub(crate) fn cache_key(&self) -> Option<CacheKey> {
        match self.kind {
            EntryKind::Structure => self.key.parse().ok(),
            EntryKind::Classification => None,
        }
    }
}
