// Converter registry
//
// Converters are registered once at start-up, then looked up per request:
// - declaration: what a converter claims (mime types, formats, backend, limits)
// - descriptor: the registered, immutable form of a declaration
// - requirement: version constraints checked at registration
//
// Which converters and extensions are active is not part of a descriptor. It comes
// from the PreviewSettings block and is re-read on every lookup, so settings can change
// while the process runs without touching the registered descriptors.

pub mod declaration;
pub mod descriptor;
pub mod requirement;

use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

pub use declaration::{Declaration, MimeTypeSpec};
pub use descriptor::ConverterDescriptor;
pub use requirement::{HOST_VERSION, Requirement, VersionRequirement};

use crate::backend::{Backend, BackendFactory, BackendKind, BackendOptions};
use crate::config::{DisplayMode, PreviewSettings};
use crate::error::{PreviewError, Result};
use crate::format;
use crate::mime::{self, ActiveMimeTypes, MimeEntry, MimeTable};
use crate::worker::{ConversionRequest, PreviewOptions, ResultSink};
use descriptor::DescriptorParts;

/// Default time an external program may run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// "libre_office" -> "Libre office"
pub fn humanize(id: &str) -> String {
    let spaced = id.trim_end_matches("_id").replace('_', " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

pub struct ConverterRegistry {
    converters_dir: PathBuf,
    public_dir: PathBuf,
    converters: BTreeMap<String, Arc<ConverterDescriptor>>,
    settings: RwLock<PreviewSettings>,
    mime_table: MimeTable,
}

impl ConverterRegistry {
    pub fn new<P1: Into<PathBuf>, P2: Into<PathBuf>>(
        converters_dir: P1,
        public_dir: P2,
        settings: PreviewSettings,
    ) -> Self {
        Self {
            converters_dir: converters_dir.into(),
            public_dir: public_dir.into(),
            converters: BTreeMap::new(),
            settings: RwLock::new(settings),
            mime_table: MimeTable::new(),
        }
    }

    /// Register a converter under `id`.
    ///
    /// Fails with `NotFound` when the converter directory is missing, `WrongArgument`
    /// for an empty or duplicate id, malformed settings or mime types, and
    /// `Requirement` when a declared requirement is not met.
    pub fn register(&mut self, id: &str, declaration: Declaration) -> Result<Arc<ConverterDescriptor>> {
        let id = id.trim();
        if id.is_empty() {
            return Err(PreviewError::WrongArgument("Converter id must not be empty".to_string()));
        }
        if self.converters.contains_key(id) {
            return Err(PreviewError::WrongArgument(format!("Converter {} is already registered", id)));
        }

        let name = declaration.name.clone().unwrap_or_else(|| humanize(id));
        let directory = declaration.directory.clone().unwrap_or_else(|| self.converters_dir.join(id));
        let threadsafe = declaration.threadsafe.unwrap_or(false);
        let timeout = declaration.timeout.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT);
        let shell_api = declaration.shell_api.unwrap_or_default();

        if !directory.is_dir() {
            return Err(PreviewError::NotFound(format!(
                "Converter not found. The directory for converter {} should be {}",
                id,
                directory.display()
            )));
        }

        let settings = declaration
            .settings
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        if !settings.is_object() {
            return Err(PreviewError::WrongArgument(format!(
                "Settings of converter {} must be a table",
                id
            )));
        }

        for (ext, spec) in &declaration.mime_types {
            if spec.mime.trim().is_empty() || spec.formats.is_empty() {
                return Err(PreviewError::WrongArgument(format!(
                    "Mime type {} of converter {} needs a mime string and at least one format",
                    ext, id
                )));
            }
            for format in &spec.formats {
                if !format::is_known_format(format) {
                    warn!("Converter {} declares unknown format {} for {}", id, format, ext);
                }
            }
        }

        for requirement in &declaration.requires {
            requirement.check(id, |other| self.converters.get(other).map(|c| c.version.clone()))?;
        }

        let (kind, backend): (Option<BackendKind>, Arc<dyn Backend>) = match declaration.implementation.clone() {
            Some(backend) => (declaration.backend, backend),
            None => {
                let kind = declaration.backend.or_else(|| BackendKind::from_id(id)).ok_or_else(|| {
                    PreviewError::WrongArgument(format!("Converter {} declares no backend", id))
                })?;
                let options = BackendOptions {
                    settings: settings.clone(),
                    timeout,
                    shell_api,
                };
                (Some(kind), BackendFactory::create(kind, options)?)
            }
        };

        for (ext, spec) in &declaration.mime_types {
            if self.mime_table.register_unless_known(&spec.mime, ext, &spec.synonyms) {
                debug!("Registered mime type {} for .{}", spec.mime, ext);
            }
        }

        let descriptor = Arc::new(ConverterDescriptor::new(DescriptorParts {
            id: id.to_string(),
            name,
            kind,
            backend,
            mime_types: declaration.mime_types,
            threadsafe,
            timeout,
            shell_api,
            settings,
            directory,
            public_directory: self.public_dir.join(id),
            version: declaration.version,
        }));
        descriptor.mirror_assets()?;

        info!(
            "Registered converter {} ({}, threadsafe: {}, timeout: {}s)",
            descriptor.id,
            descriptor.name,
            descriptor.threadsafe,
            descriptor.timeout.as_secs()
        );
        self.converters.insert(id.to_string(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    pub fn find(&self, id: &str) -> Result<Arc<ConverterDescriptor>> {
        self.converters
            .get(id)
            .cloned()
            .ok_or_else(|| PreviewError::NotFound(format!("Converter {} is not registered", id)))
    }

    /// Registered converters sorted by id
    pub fn all(&self) -> Vec<Arc<ConverterDescriptor>> {
        self.converters.values().cloned().collect()
    }

    pub fn installed(&self, id: &str) -> bool {
        self.converters.contains_key(id)
    }

    /// Forget a converter. Its mime table entries and mirrored assets stay.
    pub fn unregister(&mut self, id: &str) -> Option<Arc<ConverterDescriptor>> {
        self.converters.remove(id)
    }

    pub fn clear(&mut self) {
        self.converters.clear();
    }

    pub fn mime_table(&self) -> &MimeTable {
        &self.mime_table
    }

    fn settings_guard(&self) -> RwLockReadGuard<'_, PreviewSettings> {
        self.settings.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the activation settings
    pub fn settings(&self) -> PreviewSettings {
        self.settings_guard().clone()
    }

    /// Replace the activation settings; later lookups see the new view
    pub fn update_settings(&self, settings: PreviewSettings) {
        let mut guard = self.settings.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = settings;
    }

    pub fn cache_previews(&self) -> bool {
        self.settings_guard().cache_previews
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.settings_guard().display_mode
    }

    /// Ids configured active that are also registered
    pub fn active_converters(&self) -> Vec<String> {
        self.settings_guard()
            .converters
            .iter()
            .filter(|(id, converter)| converter.active && self.installed(id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn active_entries_of(&self, settings: &PreviewSettings, id: &str) -> Vec<MimeEntry> {
        let (Some(converter), Some(descriptor)) = (settings.converters.get(id), self.converters.get(id)) else {
            return Vec::new();
        };
        if !converter.active {
            return Vec::new();
        }

        descriptor
            .mime_types
            .iter()
            .filter_map(|(ext, spec)| {
                let configured = converter.mime_types.get(ext);
                let active = configured.map(|c| c.active).unwrap_or(spec.active);
                if !active {
                    return None;
                }
                let format = configured
                    .and_then(|c| c.format.as_ref())
                    .filter(|f| spec.formats.contains(*f))
                    .or_else(|| spec.formats.first())?
                    .clone();
                Some(MimeEntry {
                    extension: ext.clone(),
                    converter: id.to_string(),
                    mime: spec.mime.clone(),
                    format,
                    synonyms: spec.synonyms.clone(),
                    icon: spec.icon.clone(),
                })
            })
            .collect()
    }

    /// Active entries of all active converters by extension. Where two converters claim
    /// the same extension, the one with the greater id wins.
    pub fn active_mime_types(&self) -> ActiveMimeTypes {
        let settings = self.settings_guard();
        let mut active = ActiveMimeTypes::new();
        for id in self.converters.keys() {
            for entry in self.active_entries_of(&settings, id) {
                active.insert(entry.extension.clone(), entry);
            }
        }
        active
    }

    pub fn active_extensions(&self) -> Vec<String> {
        self.active_mime_types().into_keys().collect()
    }

    /// Whether an active converter other than `id` already claims `extension`
    pub fn mime_doublette(&self, id: &str, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.').to_lowercase();
        let settings = self.settings_guard();
        self.converters
            .keys()
            .filter(|other| other.as_str() != id)
            .any(|other| {
                self.active_entries_of(&settings, other)
                    .iter()
                    .any(|entry| entry.extension == extension)
            })
    }

    /// Whether `filename` has an actively claimed extension or synonym
    pub fn convertible(&self, filename: &str) -> bool {
        mime::extension_of(Path::new(filename))
            .map(|ext| mime::lookup_extension(&self.active_mime_types(), &ext).is_some())
            .unwrap_or(false)
    }

    /// Preview format configured for an extension or one of its synonyms
    pub fn conversion_extension(&self, extension: &str) -> Option<String> {
        mime::lookup_extension(&self.active_mime_types(), extension).map(|entry| entry.format.clone())
    }

    /// Resolve the active mime entry for `path`
    pub fn mime<P: AsRef<Path>>(&self, path: P, path_only: bool) -> Result<MimeEntry> {
        mime::resolve(path, &self.active_mime_types(), path_only)
    }

    pub fn conversion_ext<P: AsRef<Path>>(&self, path: P, path_only: bool) -> Result<String> {
        mime::conversion_ext(path, &self.active_mime_types(), path_only)
    }

    pub fn conversion_mime<P: AsRef<Path>>(&self, path: P, path_only: bool) -> Result<&'static str> {
        mime::conversion_mime(path, &self.active_mime_types(), path_only)
    }

    /// Converter responsible for `path`; `None` when it is not previewable
    pub fn responsible<P: AsRef<Path>>(&self, path: P) -> Option<Arc<ConverterDescriptor>> {
        self.mime(path, false).ok().and_then(|entry| self.find(&entry.converter).ok())
    }

    /// Preview `path` with its responsible converter, caching at `target`.
    ///
    /// `NotFound` when no converter is responsible; a failed conversion is `Ok(None)`.
    /// With `cache_previews` switched off every conversion is transient.
    pub async fn convert<P: AsRef<Path>, T: Into<PathBuf>>(
        &self,
        path: P,
        target: T,
        options: PreviewOptions,
        sink: Option<ResultSink<'_>>,
    ) -> Result<Option<Vec<u8>>> {
        let path = path.as_ref();
        let entry = self.mime(path, false)?;
        let descriptor = self.find(&entry.converter)?;

        let mut options = options;
        if options.preview_format.is_none() {
            options.preview_format = Some(entry.format);
        }
        if !self.cache_previews() {
            debug!("Preview caching is off, converting {} transiently", path.display());
            options.bypass_cache = true;
        }

        let worker = descriptor.worker(ConversionRequest::new(target, options))?;
        Ok(worker.preview(path, sink).await)
    }
}

static GLOBAL: OnceCell<Arc<ConverterRegistry>> = OnceCell::new();

/// Make `registry` the process-wide registry. Fails if one is installed already.
pub fn install(registry: Arc<ConverterRegistry>) -> Result<()> {
    GLOBAL
        .set(registry)
        .map_err(|_| PreviewError::WrongArgument("A converter registry is already installed".to_string()))
}

/// The process-wide registry, once installed
pub fn global() -> Option<Arc<ConverterRegistry>> {
    GLOBAL.get().cloned()
}
