//! Self-describing backup snapshot format.
//!
//! Snapshots are human-readable JSON documents holding every field of a
//! structure entry, with RFC 3339 timestamps so they stay readable when the
//! durable schema changes. The payload is embedded verbatim so its checksum
//! can be verified without re-encoding.

use crate::CacheKey;
use crate::error::{ErrorKind, Result};
use crate::integrity::Corruption;
use crate::models::{StoredStructure, StructureEntry};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use time::OffsetDateTime;

pub(crate) const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Serialize, Deserialize)]
pub(crate) struct Snapshot {
    format: u32,
    key: CacheKey,
    source_name: String,
    source_size: u64,
    detector_version: String,
    compute_seconds: f64,
    section_count: u32,
    table_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    accessed_at: OffsetDateTime,
    access_count: u64,
    checksum: String,
    payload: Box<RawValue>,
}

impl Snapshot {
    pub(crate) fn encode(entry: &StructureEntry) -> Result<Vec<u8>> {
        let payload =
            RawValue::from_string(entry.encoded().to_string()).or_raise(|| ErrorKind::InvalidData("structure payload"))?;
        let snapshot = Self {
            format: SNAPSHOT_FORMAT,
            key: entry.key.clone(),
            source_name: entry.source_name.clone(),
            source_size: entry.source_size,
            detector_version: entry.detector_version.clone(),
            compute_seconds: entry.compute_time.as_secs_f64(),
            section_count: entry.section_count,
            table_count: entry.table_count,
            created_at: entry.created_at,
            accessed_at: entry.accessed_at,
            access_count: entry.access_count,
            checksum: entry.checksum().to_hex(),
            payload,
        };
        serde_json::to_vec_pretty(&snapshot).or_raise(|| ErrorKind::InvalidData("snapshot"))
    }

    /// Decode and verify a snapshot that is expected to hold `key`.
    pub(crate) fn decode(key: &CacheKey, bytes: &[u8]) -> std::result::Result<StructureEntry, Corruption> {
        let snapshot: Snapshot = serde_json::from_slice(bytes).map_err(|_| Corruption::MalformedMetadata)?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(Corruption::MalformedMetadata);
        }
        if snapshot.key != *key {
            return Err(Corruption::KeyMismatch);
        }
        StructureEntry::restore(StoredStructure {
            key: snapshot.key,
            source_name: snapshot.source_name,
            source_size: snapshot.source_size,
            detector_version: snapshot.detector_version,
            compute_seconds: snapshot.compute_seconds,
            section_count: snapshot.section_count,
            table_count: snapshot.table_count,
            created_at: snapshot.created_at,
            accessed_at: snapshot.accessed_at,
            access_count: snapshot.access_count,
            encoded: snapshot.payload.get().to_string(),
            checksum: snapshot.checksum,
        })
    }
}
