use crate::CacheKey;
use crate::error::{ErrorKind, Result};
use crate::integrity::{Checksum, Corruption};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Sections and tables extracted from a single source document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureResult {
    pub sections: Vec<Section>,
    pub tables: Vec<Table>,
}
impl StructureResult {
    /// Number of sections at every nesting depth.
    pub fn section_count(&self) -> usize {
        fn count(sections: &[Section]) -> usize {
            sections.iter().map(|s| 1 + count(&s.subsections)).sum()
        }
        count(&self.sections)
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    /// Heading depth, starting at 1 for top-level sections.
    pub level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub subsections: Vec<Section>,
}

/// A unit of body content inside a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Paragraph { text: String },
    List { ordered: bool, items: Vec<String> },
    /// Reference to [`StructureResult::tables`] by position.
    TableRef { index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub header: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Amount { value: f64, currency: String },
}

/// A verified structure analysis result together with its bookkeeping.
///
/// The payload is kept alongside the exact JSON text its checksum was
/// computed over, so an entry moving between tiers is never re-encoded.
#[derive(Debug, Clone)]
pub struct StructureEntry {
    pub key: CacheKey,
    /// Identifier of the source document, for humans only.
    pub source_name: String,
    pub source_size: u64,
    pub detector_version: String,
    pub compute_time: Duration,
    pub section_count: u32,
    pub table_count: u32,
    pub created_at: OffsetDateTime,
    pub accessed_at: OffsetDateTime,
    pub access_count: u64,
    payload: Arc<StructureResult>,
    encoded: Arc<str>,
    checksum: Checksum,
}

/// Raw stored fields of a structure entry, prior to verification.
pub(crate) struct StoredStructure {
    pub(crate) key: CacheKey,
    pub(crate) source_name: String,
    pub(crate) source_size: u64,
    pub(crate) detector_version: String,
    pub(crate) compute_seconds: f64,
    pub(crate) section_count: u32,
    pub(crate) table_count: u32,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) accessed_at: OffsetDateTime,
    pub(crate) access_count: u64,
    pub(crate) encoded: String,
    pub(crate) checksum: String,
}

impl StructureEntry {
    /// Build a fresh entry from a successful computation.
    pub fn new(
        key: CacheKey,
        source_name: impl Into<String>,
        source_size: u64,
        detector_version: impl Into<String>,
        payload: StructureResult,
        compute_time: Duration,
    ) -> Result<Self> {
        let encoded = serde_json::to_string(&payload).or_raise(|| ErrorKind::InvalidData("structure payload"))?;
        let section_count = u32::try_from(payload.section_count()).or_raise(|| ErrorKind::InvalidData("section count"))?;
        let table_count = u32::try_from(payload.table_count()).or_raise(|| ErrorKind::InvalidData("table count"))?;
        let now = OffsetDateTime::now_utc();
        Ok(Self {
            key,
            source_name: source_name.into(),
            source_size,
            detector_version: detector_version.into(),
            compute_time,
            section_count,
            table_count,
            created_at: now,
            accessed_at: now,
            access_count: 0,
            checksum: Checksum::of(encoded.as_bytes()),
            encoded: Arc::from(encoded),
            payload: Arc::new(payload),
        })
    }

    /// Verify stored fields and decode the payload.
    pub(crate) fn restore(stored: StoredStructure) -> std::result::Result<Self, Corruption> {
        let checksum: Checksum = stored.checksum.parse().map_err(|_| Corruption::MalformedChecksum)?;
        if !checksum.verify(stored.encoded.as_bytes()) {
            return Err(Corruption::ChecksumMismatch);
        }
        let payload: StructureResult =
            serde_json::from_str(&stored.encoded).map_err(|_| Corruption::MalformedPayload)?;
        let compute_time =
            Duration::try_from_secs_f64(stored.compute_seconds).map_err(|_| Corruption::MalformedMetadata)?;
        Ok(Self {
            key: stored.key,
            source_name: stored.source_name,
            source_size: stored.source_size,
            detector_version: stored.detector_version,
            compute_time,
            section_count: stored.section_count,
            table_count: stored.table_count,
            created_at: stored.created_at,
            accessed_at: stored.accessed_at,
            access_count: stored.access_count,
            payload: Arc::new(payload),
            encoded: Arc::from(stored.encoded),
            checksum,
        })
    }

    pub fn payload(&self) -> &Arc<StructureResult> {
        &self.payload
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// Recompute the checksum over the encoded payload.
    pub fn verify(&self) -> bool {
        self.checksum.verify(self.encoded.as_bytes())
    }

    /// Size of the encoded payload, as counted against the cache budget.
    pub fn size_bytes(&self) -> u64 {
        self.encoded.len() as u64
    }

    pub(crate) fn encoded(&self) -> &str {
        &self.encoded
    }
}
