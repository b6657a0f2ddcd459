use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use crate::error::{PreviewError, Result};
use crate::registry::Declaration;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    /// Activation block read by the registry on every lookup
    #[serde(default)]
    pub previews: PreviewSettings,
    /// Additional converters declared in configuration (generic command backends)
    #[serde(default)]
    pub declarations: BTreeMap<String, Declaration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of all runtime state (logs live below it)
    pub state_dir: PathBuf,
    /// Root of the preview cache
    pub storage_root: PathBuf,
    /// Directory holding one sub-directory per converter
    pub converters_dir: PathBuf,
    /// Public directory converter assets are mirrored into
    pub public_dir: PathBuf,
}

/// How hosts should display previews
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Render the preview inline in the page
    #[default]
    Embed,
    /// Offer a link to the preview
    Link,
}

/// External activation configuration, consumed by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewSettings {
    /// Whether hosts should cache previews at all
    #[serde(default = "default_true")]
    pub cache_previews: bool,
    #[serde(default)]
    pub display_mode: DisplayMode,
    /// Converter id -> activation
    #[serde(default)]
    pub converters: BTreeMap<String, ConverterSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConverterSettings {
    #[serde(default)]
    pub active: bool,
    /// Extension -> activation
    #[serde(default)]
    pub mime_types: BTreeMap<String, MimeTypeSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MimeTypeSettings {
    #[serde(default = "default_true")]
    pub active: bool,
    /// Preview format chosen for this extension; the first declared format when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Default for MimeTypeSettings {
    fn default() -> Self {
        Self { active: true, format: None }
    }
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            cache_previews: true,
            display_mode: DisplayMode::Embed,
            converters: BTreeMap::new(),
        }
    }
}

impl PreviewSettings {
    /// Activate a converter and the given extensions
    pub fn activate<I, S>(&mut self, converter: &str, extensions: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.converters.entry(converter.to_string()).or_default();
        entry.active = true;
        for ext in extensions {
            entry.mime_types.entry(ext.into()).or_default().active = true;
        }
        self
    }

    /// Deactivate a converter without forgetting its per-extension settings
    pub fn deactivate(&mut self, converter: &str) -> &mut Self {
        if let Some(entry) = self.converters.get_mut(converter) {
            entry.active = false;
        }
        self
    }

    /// Pin the preview format used for one extension of a converter
    pub fn set_format(&mut self, converter: &str, extension: &str, format: &str) -> &mut Self {
        let entry = self.converters.entry(converter.to_string()).or_default();
        entry.mime_types.entry(extension.to_string()).or_default().format = Some(format.to_string());
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        let state_dir = PathBuf::from(".docpreview");
        Self {
            paths: PathsConfig {
                storage_root: state_dir.join("previews"),
                converters_dir: state_dir.join("converters"),
                public_dir: state_dir.join("public"),
                state_dir,
            },
            previews: PreviewSettings::default(),
            declarations: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PreviewError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| PreviewError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PreviewError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| PreviewError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}
