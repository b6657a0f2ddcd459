use std::path::Path;
use walkdir::WalkDir;

use crate::error::{PreviewError, Result};

/// Copy every file below `from` into `to`.
///
/// Existing files are overwritten and files without a counterpart in `from` are left
/// alone. Returns the number of files copied.
pub fn copy_tree(from: &Path, to: &Path) -> Result<usize> {
    std::fs::create_dir_all(to)?;

    let mut copied = 0;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| PreviewError::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| PreviewError::BadArgument(format!("{}: {}", entry.path().display(), e)))?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_copy_is_additive() {
        let staging = assert_fs::TempDir::new().unwrap();
        staging.child("index.html").write_str("<p>new</p>").unwrap();
        staging.child("images/page-1.png").write_binary(b"png").unwrap();

        let cache = assert_fs::TempDir::new().unwrap();
        cache.child("index.html").write_str("<p>old</p>").unwrap();
        cache.child("stale.css").write_str("body {}").unwrap();

        assert_eq!(copy_tree(staging.path(), cache.path()).unwrap(), 2);

        cache.child("index.html").assert("<p>new</p>");
        assert!(cache.child("images/page-1.png").path().is_file());
        cache.child("stale.css").assert("body {}");
    }
}
