use crate::HeadingKey;
use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Output of a single classifier call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub categories: Vec<String>,
    pub primary: String,
    /// Within `[0, 1]`.
    pub confidence: f64,
    pub reasoning: String,
    /// Identifier of the model that produced this classification.
    pub model: String,
    pub tokens_used: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationEntry {
    pub key: HeadingKey,
    pub classification: Classification,
    pub created_at: OffsetDateTime,
    pub accessed_at: OffsetDateTime,
    pub access_count: u64,
}

impl ClassificationEntry {
    pub fn new(key: HeadingKey, classification: Classification) -> Result<Self> {
        Self::validate(&classification)?;
        let now = OffsetDateTime::now_utc();
        Ok(Self { key, classification, created_at: now, accessed_at: now, access_count: 0 })
    }

    pub(crate) fn validate(classification: &Classification) -> Result<()> {
        if !(0.0..=1.0).contains(&classification.confidence) {
            exn::bail!(ErrorKind::InvalidData("confidence"));
        }
        if !classification.cost.is_finite() || classification.cost < 0.0 {
            exn::bail!(ErrorKind::InvalidData("cost"));
        }
        Ok(())
    }

    /// Bytes counted against the cache budget.
    pub fn size_bytes(&self) -> u64 {
        let c = &self.classification;
        let text = self.key.as_str().len()
            + c.categories.iter().map(String::len).sum::<usize>()
            + c.primary.len()
            + c.reasoning.len()
            + c.model.len();
        text as u64
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn classification(primary: &str, confidence: f64) -> Classification {
        Classification {
            categories: vec![primary.to_string(), "governance".to_string()],
            primary: primary.to_string(),
            confidence,
            reasoning: format!("Heading names the {primary} section."),
            model: "classifier-small".to_string(),
            tokens_used: 42,
            cost: 0.0004,
        }
    }
}
