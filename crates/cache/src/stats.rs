use crate::repo::AccessCount;
use serde::Serialize;
use std::fmt;

/// Point-in-time figures for one cache directory, plus this process's
/// memory tier and degraded-write counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub structure_entries: u64,
    pub classification_entries: u64,
    pub backup_snapshots: u64,
    pub durable_bytes: u64,
    pub backup_bytes: u64,
    /// Bytes counted against the size budget.
    pub total_bytes: u64,
    pub average_compute_seconds: f64,
    pub most_accessed: Vec<AccessCount>,
    pub classification_tokens: u64,
    pub classification_cost: f64,
    pub memory_structures: u64,
    pub memory_classifications: u64,
    /// Writes that failed after a successful compute. The result was still
    /// returned, but it may need computing again after a restart.
    pub degraded_writes: u64,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "structure entries:      {}", self.structure_entries)?;
        writeln!(f, "classification entries: {}", self.classification_entries)?;
        writeln!(f, "backup snapshots:       {}", self.backup_snapshots)?;
        writeln!(
            f,
            "size:                   {} bytes ({} durable, {} backup)",
            self.total_bytes, self.durable_bytes, self.backup_bytes
        )?;
        writeln!(f, "average compute time:   {:.3}s", self.average_compute_seconds)?;
        writeln!(f, "classification tokens:  {}", self.classification_tokens)?;
        writeln!(f, "classification cost:    {:.4}", self.classification_cost)?;
        if self.degraded_writes > 0 {
            writeln!(f, "degraded writes:        {}", self.degraded_writes)?;
        }
        if !self.most_accessed.is_empty() {
            writeln!(f, "most accessed:")?;
            for entry in &self.most_accessed {
                writeln!(f, "  {:>6}  {}", entry.count, entry.key)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let stats = Statistics {
            structure_entries: 2,
            total_bytes: 300,
            durable_bytes: 100,
            backup_bytes: 200,
            most_accessed: vec![AccessCount { key: "abc123".parse().unwrap(), count: 7 }],
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.contains("structure entries:      2"));
        assert!(text.contains("300 bytes (100 durable, 200 backup)"));
        assert!(text.contains("     7  abc123"));
        assert!(!text.contains("degraded"));
    }

    #[test]
    fn test_serialize() {
        let stats = Statistics {
            most_accessed: vec![AccessCount { key: "abc123".parse().unwrap(), count: 1 }],
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["most_accessed"][0]["key"], "abc123");
        assert_eq!(json["degraded_writes"], 0);
    }
}
