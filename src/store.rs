//! On-disk layout of cached previews.
//!
//! ```text
//! <storage_root>/<kind plural>/<object id>/preview.<format>/index.<format>
//!                                                          /<asset files>
//! ```

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{PreviewError, Result};
use crate::worker::relative_name;

/// The object a preview belongs to, e.g. attachment 42
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreviewObject {
    pub kind: String,
    pub id: String,
}

impl PreviewObject {
    pub fn new<K: Into<String>, I: Into<String>>(kind: K, id: I) -> Self {
        Self { kind: kind.into(), id: id.into() }
    }
}

/// "attachment" -> "attachments", "repository" -> "repositories"
pub fn pluralize(kind: &str) -> String {
    let kind = kind.trim().to_lowercase();
    let vowel_before_y = kind
        .chars()
        .rev()
        .nth(1)
        .map(|c| "aeiou".contains(c))
        .unwrap_or(false);

    if kind.ends_with('y') && !vowel_before_y {
        format!("{}ies", &kind[..kind.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|suffix| kind.ends_with(suffix)) {
        format!("{}es", kind)
    } else {
        format!("{}s", kind)
    }
}

#[derive(Debug, Clone)]
pub struct PreviewStore {
    root: PathBuf,
}

impl PreviewStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every preview of `object`
    pub fn storage_path(&self, object: &PreviewObject) -> Result<PathBuf> {
        let id = object.id.trim();
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(PreviewError::BadArgument(format!("Invalid object id '{}'", object.id)));
        }
        Ok(self.root.join(pluralize(&object.kind)).join(id))
    }

    pub fn preview_dirname(&self, object: &PreviewObject, format: &str) -> Result<PathBuf> {
        Ok(self.storage_path(object)?.join(format!("preview.{}", format)))
    }

    pub fn preview_filename(format: &str) -> String {
        format!("index.{}", format)
    }

    /// Cache target of the main rendition
    pub fn preview_filepath(&self, object: &PreviewObject, format: &str) -> Result<PathBuf> {
        Ok(self.preview_dirname(object, format)?.join(Self::preview_filename(format)))
    }

    /// Cache path of an asset next to the main rendition
    pub fn preview_assetpath(
        &self,
        object: &PreviewObject,
        format: &str,
        asset: &str,
        asset_format: Option<&str>,
    ) -> Result<PathBuf> {
        let name = match asset_format {
            Some(ext) if !ext.is_empty() => format!("{}.{}", asset, ext),
            _ => asset.to_string(),
        };
        relative_name(&name)?;
        Ok(self.preview_dirname(object, format)?.join(name))
    }

    pub fn preview_available(&self, object: &PreviewObject, format: &str) -> bool {
        self.preview_filepath(object, format).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn asset_available(&self, object: &PreviewObject, format: &str, asset: &str, asset_format: Option<&str>) -> bool {
        self.preview_assetpath(object, format, asset, asset_format)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Modification time of the cached rendition, `None` when there is none
    pub fn preview_mtime(&self, object: &PreviewObject, format: &str) -> Option<DateTime<Local>> {
        let path = self.preview_filepath(object, format).ok()?;
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
        Some(DateTime::<Local>::from(modified))
    }

    /// Remove every cached preview of `object`. Returns whether anything was removed.
    pub fn purge(&self, object: &PreviewObject) -> Result<bool> {
        let path = self.storage_path(object)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&path)?;
        info!("Purged previews of {} {} at {}", object.kind, object.id, path.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("attachment"), "attachments");
        assert_eq!(pluralize("Repository"), "repositories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("box"), "boxes");
    }

    #[test]
    fn test_layout() {
        let store = PreviewStore::new("/var/lib/docpreview/previews");
        let object = PreviewObject::new("attachment", "42");

        assert_eq!(
            store.preview_filepath(&object, "html").unwrap(),
            PathBuf::from("/var/lib/docpreview/previews/attachments/42/preview.html/index.html")
        );
        assert_eq!(
            store.preview_assetpath(&object, "html", "image", Some("png")).unwrap(),
            PathBuf::from("/var/lib/docpreview/previews/attachments/42/preview.html/image.png")
        );
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let store = PreviewStore::new("/tmp/previews");
        for id in ["", "..", "a/b"] {
            let object = PreviewObject::new("attachment", id);
            assert!(matches!(store.storage_path(&object), Err(PreviewError::BadArgument(_))));
        }
    }

    #[test]
    fn test_asset_paths_stay_in_preview_directory() {
        let store = PreviewStore::new("/tmp/previews");
        let object = PreviewObject::new("attachment", "42");

        for asset in ["/etc/passwd", "../../43/preview.html/index", ""] {
            let result = store.preview_assetpath(&object, "html", asset, None);
            assert!(matches!(result, Err(PreviewError::BadArgument(_))), "{asset}");
            assert!(!store.asset_available(&object, "html", asset, None));
        }
        assert!(store.preview_assetpath(&object, "html", "images/page-1", Some("png")).is_ok());
    }

    #[test]
    fn test_availability_and_purge() {
        let root = assert_fs::TempDir::new().unwrap();
        let store = PreviewStore::new(root.path());
        let object = PreviewObject::new("attachment", "7");

        assert!(!store.preview_available(&object, "txt"));
        assert!(store.preview_mtime(&object, "txt").is_none());
        assert!(!store.purge(&object).unwrap());

        root.child("attachments/7/preview.txt/index.txt").write_str("hello").unwrap();
        root.child("attachments/7/preview.txt/extra.css").write_str("pre {}").unwrap();

        assert!(store.preview_available(&object, "txt"));
        assert!(store.asset_available(&object, "txt", "extra.css", None));
        assert!(store.preview_mtime(&object, "txt").is_some());

        assert!(store.purge(&object).unwrap());
        assert!(!root.child("attachments/7").path().exists());
    }
}
