//! Path validation.
//!
//! Snapshot names are derived from cache keys, but the backend never trusts
//! its callers: every path is normalised and checked so that nothing can be
//! read or written outside the storage root.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path and returns its normalised form.
///
/// Rejects paths that are empty after normalisation, that climb above the
/// root with `..`, that carry a platform prefix, or that contain null bytes.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use strata_storage::validate_path;
/// assert!(validate_path("ab12cd.json").is_ok());
/// assert!(validate_path("shard/ab12cd.json").is_ok());
/// assert!(validate_path("../ab12cd.json").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(validate_path("./x/../ab12cd.json/").unwrap(), Path::new("ab12cd.json"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes survive Path::components() on Unix but truncate
                // the path inside the syscall.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(original.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
                }
            },
        }
    }
    if components.is_empty() {
        exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
    }
    Ok(components.into_iter().collect())
}
