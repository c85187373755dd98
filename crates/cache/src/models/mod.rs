mod classification;
mod row;
mod snapshot;
pub(crate) mod structure;

pub use self::classification::{Classification, ClassificationEntry};
pub(crate) use self::row::{ClassificationRow, RecencyRow, StructureRow, from_nanos, to_nanos};
pub use self::row::{EntryKind, RecencyEntry};
pub(crate) use self::snapshot::Snapshot;
pub(crate) use self::structure::StoredStructure;
pub use self::structure::{Block, Cell, Section, StructureEntry, StructureResult, Table};

#[cfg(test)]
pub(crate) use self::classification::fixtures as classification_fixtures;
#[cfg(test)]
pub(crate) use self::structure::fixtures as structure_fixtures;
