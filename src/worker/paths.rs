use std::path::{Component, Path, PathBuf};

use crate::error::{PreviewError, Result};

/// A path split the way the worker needs it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSet {
    pub path: PathBuf,
    pub dir: PathBuf,
    pub file: String,
    /// Extension without the dot, empty when there is none
    pub ext: String,
}

/// Split `base` (joined with `filename` when given) into path, directory, file and
/// extension. The directory is created only when `create` is set, so final cache
/// paths can be derived without side effects.
pub fn path_set<P: AsRef<Path>>(base: P, filename: Option<&str>, create: bool) -> Result<PathSet> {
    let base = base.as_ref();
    if base.as_os_str().is_empty() {
        return Err(PreviewError::BadArgument("Empty path".to_string()));
    }

    let path = match filename {
        Some(name) if !name.is_empty() => base.join(name),
        _ => base.to_path_buf(),
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => {
            return Err(PreviewError::BadArgument(format!(
                "{} has no parent directory",
                path.display()
            )));
        }
    };
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .ok_or_else(|| PreviewError::BadArgument(format!("{} has no file name", path.display())))?;
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();

    if create && !dir.is_dir() {
        std::fs::create_dir_all(&dir)?;
    }

    Ok(PathSet { path, dir, file, ext })
}

/// Check that `name` stays below the directory it is joined onto.
///
/// Absolute names, drive prefixes and `..` components are rejected.
pub fn relative_name(name: &str) -> Result<&Path> {
    let path = Path::new(name);
    if name.trim().is_empty() {
        return Err(PreviewError::BadArgument("Empty file name".to_string()));
    }
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::RootDir | Component::Prefix(_) | Component::ParentDir));
    if escapes {
        return Err(PreviewError::BadArgument(format!(
            "{} must be a path relative to the preview directory",
            name
        )));
    }
    Ok(path)
}
