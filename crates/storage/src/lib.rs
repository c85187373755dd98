//! Flat-file storage for cache snapshots.
//!
//! Every backend stores opaque byte blobs under validated relative paths. The
//! cache only ever needs whole-file reads and whole-file writes, so the trait has
//! no streaming readers or writers.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::FileInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
