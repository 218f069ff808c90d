//! Content hashing of the backend source tree.
//!
//! The hex SHA-256 over sorted relative paths and file contents is the
//! pipeline's trigger value: it changes exactly when the source changes.

use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::{PipelineError, Result};

/// Hash the source tree, skipping directories named in `excludes` at any
/// depth (local-only scratch such as virtual environments).
pub fn source_hash(dir: &Path, excludes: &[String]) -> Result<String> {
    let mut files = Vec::new();
    let walker = WalkDir::new(dir).into_iter().filter_entry(|entry| {
        let excluded = entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| excludes.iter().any(|e| e == name));
        !excluded
    });

    for entry in walker {
        let entry = entry.map_err(|source| PipelineError::Walk {
            dir: dir.display().to_string(),
            source,
        })?;
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(dir)
                .unwrap_or(entry.path())
                .to_path_buf();
            files.push((relative, entry.into_path()));
        }
    }
    files.sort();

    let mut hasher = Sha256::new();
    for (relative, path) in files {
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0]);
        let contents = std::fs::read(&path).map_err(|source| PipelineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        hasher.update(&contents);
        hasher.update([0]);
    }
    Ok(hex::encode(hasher.finalize()))
}
