// Pluggable conversion backends
//
// Every converter is backed by an implementation of the Backend capability:
// - libre: LibreOffice headless conversion of office documents
// - text: in-process rendering of plain text
// - image: in-process thumbnails of raster images
// - command: any external program declared in configuration
//
// To add a new backend:
// 1. Implement Backend (at least `convert`; `status` and `valid` have defaults)
// 2. Add a variant to BackendKind
// 3. Build it in BackendFactory::create
//
// Backends only ever see the staging directory of a conversion. The worker publishes
// the staged files into the cache once `convert` has returned successfully.

pub mod command;
pub mod image;
pub mod libre;
pub mod shell;
pub mod text;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use shell::{ShellApi, ShellCommand, ShellOutput};
use crate::error::{PreviewError, Result};

/// Result of a backend self-check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub message: String,
    pub ok: bool,
}

impl BackendStatus {
    pub fn new<S: Into<String>>(message: S, ok: bool) -> Self {
        Self { message: message.into(), ok }
    }
}

/// What a backend may inspect to decide whether a cached artifact is still fresh
#[derive(Debug, Clone)]
pub struct CacheCheck {
    pub source: PathBuf,
    /// Published `index.<format>` file
    pub target: PathBuf,
    /// Requested asset inside the published directory, if any
    pub asset: Option<PathBuf>,
}

/// One conversion attempt as handed to a backend.
///
/// Output goes to `tmp_target` (plus any assets next to it in `tmp_dir`). The final
/// cache location is deliberately absent.
#[derive(Debug, Clone)]
pub struct StagingJob {
    /// Converter id
    pub converter: String,
    /// Converter display name
    pub name: String,
    pub source: PathBuf,
    /// Format of the main rendition (`html`, `txt`, `pdf`, ...)
    pub preview_format: String,
    /// Format of a requested asset, empty when none was requested
    pub format: String,
    /// File name of the main rendition, e.g. `index.html`
    pub target_file: String,
    /// Extension of the main rendition without the dot
    pub target_ext: String,
    /// File name of the requested asset
    pub asset: Option<String>,
    /// Secondary files the caller expects next to the main rendition
    pub assets: Vec<String>,
    pub tmp_dir: PathBuf,
    pub tmp_target: PathBuf,
    pub timeout: Duration,
    pub shell_api: ShellApi,
}

impl StagingJob {
    /// Name an external tool gives its output: source stem plus preview format
    pub fn outfile(&self) -> String {
        outfile_for(&self.source, &self.preview_format)
    }
}

pub(crate) fn outfile_for(source: &Path, format: &str) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    format!("{}.{}", stem, format)
}

/// Capability every converter backend implements
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// Report whether required external tooling is present.
    ///
    /// `None` means the backend needs nothing external.
    async fn status(&self) -> Option<BackendStatus> {
        None
    }

    /// Whether the cached artifact can be served as is
    async fn valid(&self, check: &CacheCheck) -> bool {
        check.target.is_file()
    }

    /// Produce the rendition of `job.source` inside `job.tmp_dir`
    async fn convert(&self, job: &StagingJob) -> Result<()>;
}

/// Built-in backend types a declaration can refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Libre,
    Text,
    Image,
    Command,
}

impl BackendKind {
    /// Backend implied by a converter id when a declaration names none
    pub fn from_id(id: &str) -> Option<Self> {
        match id.to_lowercase().as_str() {
            "libre" => Some(BackendKind::Libre),
            "text" => Some(BackendKind::Text),
            "image" => Some(BackendKind::Image),
            "command" => Some(BackendKind::Command),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Libre => "libre",
            BackendKind::Text => "text",
            BackendKind::Image => "image",
            BackendKind::Command => "command",
        }
    }
}

/// Per-converter options a backend is built with
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub settings: serde_json::Value,
    pub timeout: Duration,
    pub shell_api: ShellApi,
}

impl BackendOptions {
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }

    pub fn setting_u64(&self, key: &str) -> Option<u64> {
        self.settings.get(key).and_then(|v| v.as_u64())
    }

    pub fn setting_strings(&self, key: &str) -> Result<Vec<String>> {
        match self.settings.get(key) {
            None => Ok(Vec::new()),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str().map(|s| s.to_string()).ok_or_else(|| {
                        PreviewError::WrongArgument(format!("Setting '{}' must be a list of strings", key))
                    })
                })
                .collect(),
            Some(_) => Err(PreviewError::WrongArgument(format!(
                "Setting '{}' must be a list of strings",
                key
            ))),
        }
    }
}

/// Factory for creating backend instances
pub struct BackendFactory;

impl BackendFactory {
    /// Create a backend of the given kind
    pub fn create(kind: BackendKind, options: BackendOptions) -> Result<Arc<dyn Backend>> {
        let backend: Arc<dyn Backend> = match kind {
            BackendKind::Libre => Arc::new(libre::LibreBackend::new(options)),
            BackendKind::Text => Arc::new(text::TextBackend::new(options)),
            BackendKind::Image => Arc::new(image::ImageBackend::new(options)),
            BackendKind::Command => Arc::new(command::CommandBackend::new(options)?),
        };
        Ok(backend)
    }
}
