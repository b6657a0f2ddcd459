// Conversion worker
//
// A worker is bound to one request and one converter. `preview` runs through
//   Idle -> Locking -> Staging -> Publishing (cached) or Yielding (transient) -> Idle
//
// The backend only ever writes into a fresh staging directory. A cached conversion is
// published by copying the staging directory into the cache directory once `convert`
// has succeeded; a transient one hands the staged bytes to the caller and is dropped.
// The staging directory is removed when its TempDir goes out of scope, whichever way
// the conversion ends.

pub mod paths;
pub mod publish;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, error, info};
use uuid::Uuid;

pub use paths::{PathSet, path_set, relative_name};
use crate::backend::{BackendStatus, CacheCheck, StagingJob, outfile_for};
use crate::error::{PreviewError, Result};
use crate::registry::ConverterDescriptor;

/// Caller options of one preview request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreviewOptions {
    /// Format of the main rendition; the registry fills it in from the resolved mime entry
    #[serde(default)]
    pub preview_format: Option<String>,
    /// Format of the requested asset
    #[serde(default)]
    pub format: Option<String>,
    /// Asset to return instead of the main rendition, relative to the cache directory
    #[serde(default)]
    pub asset: Option<String>,
    /// Further assets handed to a transient result sink
    #[serde(default)]
    pub assets: Vec<String>,
    /// Convert even when the cached artifact is valid
    #[serde(default)]
    pub reload: bool,
    /// Convert without reading or writing the cache
    #[serde(default)]
    pub bypass_cache: bool,
}

/// Where a conversion is cached and how it is requested
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    /// Cache path of the main rendition, e.g. `.../preview.html/index.html`
    pub target: PathBuf,
    pub options: PreviewOptions,
}

impl ConversionRequest {
    pub fn new<P: Into<PathBuf>>(target: P, options: PreviewOptions) -> Self {
        Self { target: target.into(), options }
    }
}

/// Bytes of a transient conversion. Missing files are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransientOutput {
    pub target: Option<Vec<u8>>,
    pub asset: Option<Vec<u8>>,
    /// In the order the assets were requested
    pub assets: Vec<Option<Vec<u8>>>,
}

/// Consumer of a transient conversion
pub type ResultSink<'a> = Box<dyn FnOnce(TransientOutput) + Send + 'a>;

#[derive(Debug)]
pub struct Worker {
    descriptor: Arc<ConverterDescriptor>,
    request_id: Uuid,
    preview_format: String,
    format: String,
    reload: bool,
    bypass_cache: bool,
    target: PathSet,
    asset: Option<(String, PathSet)>,
    assets: Vec<(String, PathSet)>,
}

impl Worker {
    pub fn new(descriptor: Arc<ConverterDescriptor>, request: ConversionRequest) -> Result<Self> {
        let options = request.options;

        let preview_format = options
            .preview_format
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty())
            .ok_or_else(|| PreviewError::BadArgument("No preview format given".to_string()))?;
        let format = options.format.map(|f| f.to_lowercase()).unwrap_or_default();

        // Final cache paths, never created here
        let target = path_set(&request.target, None, false)?;
        let asset = match options.asset.filter(|a| !a.is_empty()) {
            Some(name) => {
                relative_name(&name)?;
                let set = path_set(&target.dir, Some(&name), false)?;
                Some((name, set))
            }
            None => None,
        };
        let assets = options
            .assets
            .into_iter()
            .map(|name| {
                relative_name(&name)?;
                path_set(&target.dir, Some(&name), false).map(|set| (name, set))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            descriptor,
            request_id: Uuid::new_v4(),
            preview_format,
            format,
            reload: options.reload,
            bypass_cache: options.bypass_cache,
            target,
            asset,
            assets,
        })
    }

    pub fn descriptor(&self) -> &Arc<ConverterDescriptor> {
        &self.descriptor
    }

    pub fn target(&self) -> &PathSet {
        &self.target
    }

    pub fn asset(&self) -> Option<&PathSet> {
        self.asset.as_ref().map(|(_, set)| set)
    }

    pub fn preview_format(&self) -> &str {
        &self.preview_format
    }

    /// Name external tools give their output for `source`
    pub fn outfile(&self, source: &Path) -> String {
        outfile_for(source, &self.preview_format)
    }

    /// Backend self-check under the converter lock
    pub async fn check(&self) -> Option<BackendStatus> {
        self.descriptor.check().await
    }

    /// Produce the preview of `source`.
    ///
    /// With a `sink`, or when the request bypasses the cache, the conversion is
    /// transient: the sink receives the staged bytes and the cache is left untouched.
    /// Otherwise the cached artifact is served, converting and publishing it first when
    /// it is missing, invalid or a reload was requested.
    ///
    /// Returns the requested asset, or the main rendition when no asset was requested.
    /// Failures and panics of the conversion end here: they are logged and yield `None`.
    pub async fn preview(&self, source: &Path, sink: Option<ResultSink<'_>>) -> Option<Vec<u8>> {
        let transient = sink.is_some() || self.bypass_cache;
        let outcome = AssertUnwindSafe(self.run(source, transient, sink)).catch_unwind().await;

        match outcome {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                error!(
                    "[{}] An error occurred while generating preview for {} with {}: {}",
                    self.request_id,
                    source.display(),
                    self.descriptor.name,
                    e
                );
                None
            }
            Err(panic) => {
                error!(
                    "[{}] {} panicked while generating preview for {}: {}",
                    self.request_id,
                    self.descriptor.name,
                    source.display(),
                    panic_message(panic.as_ref())
                );
                None
            }
        }
    }

    async fn run(&self, source: &Path, transient: bool, sink: Option<ResultSink<'_>>) -> Result<Option<Vec<u8>>> {
        if !source.is_file() {
            return Err(PreviewError::BadArgument(format!("{} is not a file", source.display())));
        }

        let guard = self.descriptor.acquire().await;
        let held = guard.is_some();
        debug!("[{}] {} lock held: {}", self.request_id, self.descriptor.id, held);

        if transient {
            self.transient_preview(source, sink).await
        } else {
            self.cached_preview(source, held).await
        }
    }

    async fn transient_preview(&self, source: &Path, sink: Option<ResultSink<'_>>) -> Result<Option<Vec<u8>>> {
        let staging = staging_dir()?;
        self.convert(source, staging.path()).await?;

        let output = TransientOutput {
            target: read_optional(&staging.path().join(&self.target.file)).await?,
            asset: match &self.asset {
                Some((name, _)) => read_optional(&staging.path().join(name)).await?,
                None => None,
            },
            assets: {
                let mut assets = Vec::with_capacity(self.assets.len());
                for (name, _) in &self.assets {
                    assets.push(read_optional(&staging.path().join(name)).await?);
                }
                assets
            },
        };

        let primary = if self.asset.is_some() {
            output.asset.clone()
        } else {
            output.target.clone()
        };
        if let Some(sink) = sink {
            sink(output);
        }
        Ok(primary)
    }

    async fn cached_preview(&self, source: &Path, held: bool) -> Result<Option<Vec<u8>>> {
        let check = CacheCheck {
            source: source.to_path_buf(),
            target: self.target.path.clone(),
            asset: self.asset().map(|a| a.path.clone()),
        };

        if self.reload || !self.descriptor.backend.valid(&check).await {
            let staging = staging_dir()?;
            self.convert(source, staging.path()).await?;
            let copied = self.copy_over(staging.path(), held).await?;
            info!(
                "[{}] Published {} file(s) to {}",
                self.request_id,
                copied,
                self.target.dir.display()
            );
        } else {
            debug!("[{}] Serving cached {}", self.request_id, self.target.path.display());
        }

        self.read_safe(held).await
    }

    async fn convert(&self, source: &Path, tmp_dir: &Path) -> Result<()> {
        let job = self.staging_job(source, tmp_dir);
        info!(
            "[{}] Converting {} to {} with {}",
            self.request_id,
            source.display(),
            job.preview_format,
            self.descriptor.name
        );
        self.descriptor.backend.convert(&job).await
    }

    fn staging_job(&self, source: &Path, tmp_dir: &Path) -> StagingJob {
        StagingJob {
            converter: self.descriptor.id.clone(),
            name: self.descriptor.name.clone(),
            source: source.to_path_buf(),
            preview_format: self.preview_format.clone(),
            format: self.format.clone(),
            target_file: self.target.file.clone(),
            target_ext: self.target.ext.clone(),
            asset: self.asset.as_ref().map(|(name, _)| name.clone()),
            assets: self.assets.iter().map(|(name, _)| name.clone()).collect(),
            tmp_dir: tmp_dir.to_path_buf(),
            tmp_target: tmp_dir.join(&self.target.file),
            timeout: self.descriptor.timeout,
            shell_api: self.descriptor.shell_api,
        }
    }

    /// Publish everything staged in `tmp_dir` into the cache directory.
    ///
    /// `held` tells whether the caller already owns the converter lock; otherwise the
    /// lock is taken for the copy.
    pub async fn copy_over(&self, tmp_dir: &Path, held: bool) -> Result<usize> {
        if !tmp_dir.is_dir() {
            return Ok(0);
        }
        let _guard = if held { None } else { Some(self.descriptor.lock().lock().await) };
        let (from, to) = (tmp_dir.to_path_buf(), self.target.dir.clone());
        tokio::task::spawn_blocking(move || publish::copy_tree(&from, &to)).await?
    }

    /// Read the requested asset, or the main rendition when none was requested, under
    /// the same lock discipline as `copy_over`
    pub async fn read_safe(&self, held: bool) -> Result<Option<Vec<u8>>> {
        let path = match &self.asset {
            Some((_, set)) => &set.path,
            None => &self.target.path,
        };
        let _guard = if held { None } else { Some(self.descriptor.lock().lock().await) };
        read_optional(path).await
    }
}

fn staging_dir() -> Result<TempDir> {
    Ok(tempfile::Builder::new().prefix("docpreview-").tempdir()?)
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    if !path.is_file() {
        return Ok(None);
    }
    Ok(Some(tokio::fs::read(path).await?))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MockBackend};
    use crate::registry::{ConverterRegistry, Declaration, MimeTypeSpec};
    use crate::config::PreviewSettings;
    use std::sync::Mutex as StdMutex;

    fn registry(backend: MockBackend, threadsafe: bool) -> (tempfile::TempDir, Arc<ConverterDescriptor>) {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("converters/stub")).unwrap();

        let mut registry = ConverterRegistry::new(
            root.path().join("converters"),
            root.path().join("public"),
            PreviewSettings::default(),
        );
        let implementation: Arc<dyn Backend> = Arc::new(backend);
        registry
            .register(
                "stub",
                Declaration::new()
                    .implementation(implementation)
                    .threadsafe(threadsafe)
                    .mime_type("txt", MimeTypeSpec::new("text/plain", &["txt"])),
            )
            .unwrap();
        let descriptor = registry.find("stub").unwrap();
        (root, descriptor)
    }

    fn source(dir: &Path) -> PathBuf {
        let path = dir.join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        path
    }

    fn options(format: &str) -> PreviewOptions {
        PreviewOptions {
            preview_format: Some(format.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_requires_preview_format() {
        let (root, descriptor) = registry(MockBackend::new(), false);
        let request = ConversionRequest::new(root.path().join("cache/preview.txt/index.txt"), PreviewOptions::default());
        assert!(matches!(descriptor.worker(request), Err(PreviewError::BadArgument(_))));
    }

    #[test]
    fn test_rejects_assets_outside_the_cache_directory() {
        let (root, descriptor) = registry(MockBackend::new(), false);
        let target = root.path().join("cache/preview.txt/index.txt");
        let outside = root.path().join("secret.txt");

        let mut opts = options("txt");
        opts.asset = Some(outside.to_string_lossy().to_string());
        let err = descriptor.worker(ConversionRequest::new(&target, opts)).unwrap_err();
        assert!(matches!(err, PreviewError::BadArgument(_)));

        let mut opts = options("txt");
        opts.assets = vec!["page-1.png".into(), "../../secret.txt".into()];
        let err = descriptor.worker(ConversionRequest::new(&target, opts)).unwrap_err();
        assert!(matches!(err, PreviewError::BadArgument(_)));
    }

    #[test]
    fn test_worker_does_not_create_cache_directories() {
        let (root, descriptor) = registry(MockBackend::new(), false);
        let mut opts = options("html");
        opts.asset = Some("images/page-1.png".into());
        let worker = descriptor
            .worker(ConversionRequest::new(root.path().join("cache/preview.html/index.html"), opts))
            .unwrap();

        assert_eq!(worker.target().ext, "html");
        assert_eq!(worker.asset().unwrap().path, root.path().join("cache/preview.html/images/page-1.png"));
        assert!(!root.path().join("cache").exists());
        assert_eq!(worker.outfile(Path::new("/data/notes.txt")), "notes.html");
    }

    #[tokio::test]
    async fn test_failed_conversion_returns_none_and_leaves_no_target() {
        let mut backend = MockBackend::new();
        backend.expect_valid().returning(|_| false);
        backend.expect_convert().times(1).returning(|job| {
            std::fs::write(&job.tmp_target, "partial").unwrap();
            Err(PreviewError::Conversion("boom".into()))
        });
        let (root, descriptor) = registry(backend, false);
        let target = root.path().join("cache/preview.txt/index.txt");

        let worker = descriptor.worker(ConversionRequest::new(&target, options("txt"))).unwrap();
        assert_eq!(worker.preview(&source(root.path()), None).await, None);
        assert!(!target.exists());
    }

    struct PanickingBackend;

    #[async_trait::async_trait]
    impl Backend for PanickingBackend {
        async fn convert(&self, _job: &StagingJob) -> Result<()> {
            panic!("backend exploded")
        }
    }

    #[tokio::test]
    async fn test_panicking_backend_returns_none_and_releases_lock() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("converters/stub")).unwrap();
        let mut registry = ConverterRegistry::new(
            root.path().join("converters"),
            root.path().join("public"),
            PreviewSettings::default(),
        );
        registry
            .register(
                "stub",
                Declaration::new()
                    .implementation(Arc::new(PanickingBackend))
                    .mime_type("txt", MimeTypeSpec::new("text/plain", &["txt"])),
            )
            .unwrap();
        let descriptor = registry.find("stub").unwrap();

        let worker = descriptor
            .worker(ConversionRequest::new(root.path().join("cache/index.txt"), options("txt")))
            .unwrap();
        assert_eq!(worker.preview(&source(root.path()), None).await, None);
        assert!(descriptor.lock().try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_missing_source_is_not_converted() {
        let mut backend = MockBackend::new();
        backend.expect_convert().never();
        let (root, descriptor) = registry(backend, false);

        let worker = descriptor
            .worker(ConversionRequest::new(root.path().join("cache/index.txt"), options("txt")))
            .unwrap();
        assert_eq!(worker.preview(&root.path().join("missing.txt"), None).await, None);
    }

    #[tokio::test]
    async fn test_valid_cache_skips_conversion_unless_reload() {
        let mut backend = MockBackend::new();
        backend.expect_valid().returning(|check| check.target.is_file());
        backend.expect_convert().times(2).returning(|job| {
            std::fs::write(&job.tmp_target, "converted")?;
            Ok(())
        });
        let (root, descriptor) = registry(backend, true);
        let source = source(root.path());
        let target = root.path().join("cache/preview.txt/index.txt");

        for _ in 0..2 {
            let worker = descriptor.worker(ConversionRequest::new(&target, options("txt"))).unwrap();
            assert_eq!(worker.preview(&source, None).await.as_deref(), Some(&b"converted"[..]));
        }

        let mut reload = options("txt");
        reload.reload = true;
        let worker = descriptor.worker(ConversionRequest::new(&target, reload)).unwrap();
        assert!(worker.preview(&source, None).await.is_some());
    }

    #[tokio::test]
    async fn test_transient_hands_assets_to_sink() {
        let mut backend = MockBackend::new();
        backend.expect_valid().never();
        backend.expect_convert().returning(|job| {
            std::fs::write(&job.tmp_target, "<img src=\"a.png\">")?;
            std::fs::write(job.tmp_dir.join("a.png"), b"png")?;
            Ok(())
        });
        let (root, descriptor) = registry(backend, false);
        let target = root.path().join("cache/preview.html/index.html");

        let mut opts = options("html");
        opts.assets = vec!["a.png".into(), "b.png".into()];
        let worker = descriptor.worker(ConversionRequest::new(&target, opts)).unwrap();

        let received = Arc::new(StdMutex::new(None));
        let sink: ResultSink<'_> = {
            let received = Arc::clone(&received);
            Box::new(move |output| *received.lock().unwrap() = Some(output))
        };
        let primary = worker.preview(&source(root.path()), Some(sink)).await;

        let output = received.lock().unwrap().take().unwrap();
        assert_eq!(primary, output.target);
        assert_eq!(output.asset, None);
        assert_eq!(output.assets, vec![Some(b"png".to_vec()), None]);
        assert!(!root.path().join("cache").exists());
    }

    #[tokio::test]
    async fn test_requested_asset_is_returned() {
        let mut backend = MockBackend::new();
        backend.expect_valid().returning(|_| false);
        backend.expect_convert().returning(|job| {
            std::fs::write(&job.tmp_target, "<img src=\"image.png\">")?;
            std::fs::write(job.tmp_dir.join("image.png"), b"png")?;
            Ok(())
        });
        let (root, descriptor) = registry(backend, false);

        let mut opts = options("html");
        opts.asset = Some("image.png".into());
        let worker = descriptor
            .worker(ConversionRequest::new(root.path().join("cache/preview.html/index.html"), opts))
            .unwrap();
        assert_eq!(worker.preview(&source(root.path()), None).await, Some(b"png".to_vec()));

        let mut opts = options("html");
        opts.asset = Some("missing.png".into());
        let worker = descriptor
            .worker(ConversionRequest::new(root.path().join("cache/preview.html/index.html"), opts))
            .unwrap();
        assert_eq!(worker.preview(&source(root.path()), None).await, None);
    }

    #[tokio::test]
    async fn test_check_reports_backend_status() {
        let mut backend = MockBackend::new();
        backend.expect_status().returning(|| Some(BackendStatus::new("tool missing", false)));
        let (root, descriptor) = registry(backend, false);

        let worker = descriptor
            .worker(ConversionRequest::new(root.path().join("cache/index.txt"), options("txt")))
            .unwrap();
        assert_eq!(worker.check().await, Some(BackendStatus::new("tool missing", false)));
    }
}
