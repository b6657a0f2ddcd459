use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;
use walkdir::WalkDir;

use crate::backend::{Backend, BackendKind, BackendStatus, ShellApi};
use crate::error::{PreviewError, Result};
use crate::worker::{ConversionRequest, Worker};
use super::declaration::MimeTypeSpec;

/// Web path prefix under which mirrored converter assets are served
pub const PUBLIC_WEB_PREFIX: &str = "/plugin_assets";

/// Registered converter. Built once by the registry and never changed afterwards.
pub struct ConverterDescriptor {
    pub id: String,
    pub name: String,
    /// Built-in backend type, `None` for a ready-made implementation
    pub kind: Option<BackendKind>,
    pub mime_types: BTreeMap<String, MimeTypeSpec>,
    pub threadsafe: bool,
    pub timeout: Duration,
    pub shell_api: ShellApi,
    pub settings: serde_json::Value,
    pub directory: PathBuf,
    pub version: Option<String>,
    pub(crate) public_directory: PathBuf,
    pub(crate) backend: Arc<dyn Backend>,
    lock: Arc<Mutex<()>>,
}

impl fmt::Debug for ConverterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("threadsafe", &self.threadsafe)
            .field("timeout", &self.timeout)
            .field("shell_api", &self.shell_api)
            .field("directory", &self.directory)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

pub(crate) struct DescriptorParts {
    pub id: String,
    pub name: String,
    pub kind: Option<BackendKind>,
    pub backend: Arc<dyn Backend>,
    pub mime_types: BTreeMap<String, MimeTypeSpec>,
    pub threadsafe: bool,
    pub timeout: Duration,
    pub shell_api: ShellApi,
    pub settings: serde_json::Value,
    pub directory: PathBuf,
    pub public_directory: PathBuf,
    pub version: Option<String>,
}

impl ConverterDescriptor {
    pub(crate) fn new(parts: DescriptorParts) -> Self {
        Self {
            id: parts.id,
            name: parts.name,
            kind: parts.kind,
            mime_types: parts.mime_types,
            threadsafe: parts.threadsafe,
            timeout: parts.timeout,
            shell_api: parts.shell_api,
            settings: parts.settings,
            directory: parts.directory,
            version: parts.version,
            public_directory: parts.public_directory,
            backend: parts.backend,
            // Allocated for thread-safe converters as well, see `acquire`
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Worker for one conversion request
    pub fn worker(self: &Arc<Self>, request: ConversionRequest) -> Result<Worker> {
        Worker::new(Arc::clone(self), request)
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// The converter's lock, for callers joining its exclusive regions
    pub fn lock(&self) -> &Arc<Mutex<()>> {
        &self.lock
    }

    /// Take the converter lock unless the converter is thread-safe.
    ///
    /// This is the only place deciding whether a conversion serializes.
    pub(crate) async fn acquire(&self) -> Option<MutexGuard<'_, ()>> {
        if self.threadsafe {
            None
        } else {
            Some(self.lock.lock().await)
        }
    }

    /// Backend self-check, serialized with running conversions
    pub async fn check(&self) -> Option<BackendStatus> {
        let _guard = self.acquire().await;
        self.backend.status().await
    }

    /// Whether the converter claims `filename` by extension, active or not
    pub fn convertible(&self, filename: &str) -> bool {
        crate::mime::extension_of(Path::new(filename))
            .map(|ext| {
                self.mime_types.contains_key(&ext)
                    || self.mime_types.values().any(|spec| spec.synonyms.iter().any(|s| s.eq_ignore_ascii_case(&ext)))
            })
            .unwrap_or(false)
    }

    /// Static assets shipped with the converter
    pub fn assets_directory(&self) -> PathBuf {
        self.directory.join("assets")
    }

    /// Directory the assets are mirrored into
    pub fn public_directory(&self) -> &Path {
        &self.public_directory
    }

    /// Web path of the mirrored assets
    pub fn public_web_directory(&self) -> String {
        format!("{}/{}", PUBLIC_WEB_PREFIX, self.id)
    }

    /// Whether the converter carries settings an administrator can change
    pub fn configurable(&self) -> bool {
        self.settings.as_object().map(|o| !o.is_empty()).unwrap_or(false)
    }

    /// Copy `assets/` into the public directory, skipping byte-identical files.
    ///
    /// Returns the number of files copied.
    pub fn mirror_assets(&self) -> Result<usize> {
        let source = self.assets_directory();
        if !source.is_dir() {
            return Ok(0);
        }
        let destination = &self.public_directory;

        let mut copied = 0;
        for entry in WalkDir::new(&source).min_depth(1) {
            let entry = entry.map_err(|e| PreviewError::Asset(format!("Could not read {}: {}", source.display(), e)))?;
            let relative = pathdiff::diff_paths(entry.path(), &source).unwrap_or_default();
            let target = destination.join(&relative);

            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target).map_err(|e| {
                    PreviewError::Asset(format!("Could not create directory {}: {}", target.display(), e))
                })?;
                continue;
            }

            if identical(entry.path(), &target) {
                continue;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PreviewError::Asset(format!("Could not create directory {}: {}", parent.display(), e))
                })?;
            }
            std::fs::copy(entry.path(), &target).map_err(|e| {
                PreviewError::Asset(format!(
                    "Could not copy {} to {}: {}",
                    entry.path().display(),
                    target.display(),
                    e
                ))
            })?;
            copied += 1;
        }

        debug!("Mirrored {} asset(s) of {} into {}", copied, self.id, destination.display());
        Ok(copied)
    }
}

fn identical(a: &Path, b: &Path) -> bool {
    let (Ok(meta_a), Ok(meta_b)) = (std::fs::metadata(a), std::fs::metadata(b)) else {
        return false;
    };
    if !meta_b.is_file() || meta_a.len() != meta_b.len() {
        return false;
    }
    match (std::fs::read(a), std::fs::read(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}
