//! Heading text normalization for classification keys.

use std::fmt;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Normalized heading text identifying a classification entry.
///
/// Headings that differ only in case, diacritics or surrounding whitespace
/// share a key: `"STYRELSEN"`, `"styrelsen "` and `"Styrélsen"` are the
/// same heading.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeadingKey(String);

impl HeadingKey {
    pub fn new(text: &str) -> Self {
        let folded: String = text.to_lowercase().nfd().filter(|c| !is_combining_mark(*c)).collect();
        Self(folded.trim().to_string())
    }

    /// Wrap text read back from the durable tier, which is already normalized.
    pub(crate) fn from_normalized(text: String) -> Self {
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HeadingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HeadingKey {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}
