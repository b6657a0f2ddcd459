use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{Backend, BackendKind, ShellApi};
use super::requirement::{Requirement, VersionRequirement};

fn default_true() -> bool {
    true
}

/// Capability of a converter for one source extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MimeTypeSpec {
    /// Preview formats the converter can produce, preferred first
    pub formats: Vec<String>,
    /// Canonical mime string of the source type
    pub mime: String,
    /// Further extensions meaning the same type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Default activation when configuration says nothing about this extension
    #[serde(default = "default_true")]
    pub active: bool,
}

impl MimeTypeSpec {
    pub fn new<S: Into<String>>(mime: S, formats: &[&str]) -> Self {
        Self {
            formats: formats.iter().map(|f| f.to_string()).collect(),
            mime: mime.into(),
            synonyms: Vec::new(),
            icon: None,
            active: true,
        }
    }

    pub fn synonyms(mut self, synonyms: &[&str]) -> Self {
        self.synonyms = synonyms.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn icon<S: Into<String>>(mut self, icon: S) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Declarative registration block for one converter.
///
/// Everything is optional; the registry fills in defaults. Declarations can be built in
/// code or read from the `[declarations.<id>]` tables of the configuration file.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Declaration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threadsafe: Option<bool>,
    /// Seconds an external program may run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_api: Option<ShellApi>,
    #[serde(default)]
    pub mime_types: BTreeMap<String, MimeTypeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<Requirement>,
    /// Ready-made backend, taking precedence over `backend`
    #[serde(skip)]
    pub implementation: Option<Arc<dyn Backend>>,
}

impl fmt::Debug for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Declaration")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .field("threadsafe", &self.threadsafe)
            .field("timeout", &self.timeout)
            .field("shell_api", &self.shell_api)
            .field("mime_types", &self.mime_types)
            .field("settings", &self.settings)
            .field("directory", &self.directory)
            .field("version", &self.version)
            .field("requires", &self.requires)
            .field("implementation", &self.implementation.as_ref().map(|_| "<backend>"))
            .finish()
    }
}

impl Declaration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = Some(kind);
        self
    }

    pub fn implementation(mut self, backend: Arc<dyn Backend>) -> Self {
        self.implementation = Some(backend);
        self
    }

    pub fn threadsafe(mut self, threadsafe: bool) -> Self {
        self.threadsafe = Some(threadsafe);
        self
    }

    pub fn timeout_secs(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn shell_api(mut self, api: ShellApi) -> Self {
        self.shell_api = Some(api);
        self
    }

    pub fn mime_type<S: Into<String>>(mut self, extension: S, spec: MimeTypeSpec) -> Self {
        self.mime_types.insert(extension.into().to_lowercase(), spec);
        self
    }

    pub fn settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Require a docpreview version
    pub fn requires_host(mut self, version: VersionRequirement) -> Self {
        self.requires.push(Requirement::Host { version });
        self
    }

    /// Require another registered converter, optionally at some version
    pub fn requires_converter<S: Into<String>>(mut self, id: S, version: VersionRequirement) -> Self {
        self.requires.push(Requirement::Converter { id: id.into(), version });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_declaration_from_toml() {
        let content = r#"
            [paths]
            state_dir = "/tmp/dp"
            storage_root = "/tmp/dp/previews"
            converters_dir = "/tmp/dp/converters"
            public_dir = "/tmp/dp/public"

            [declarations.markdown]
            backend = "command"
            threadsafe = true
            timeout = 20
            settings = { command = "pandoc", args = ["{input}", "-o", "{output}"] }

            [declarations.markdown.mime_types.md]
            mime = "text/markdown"
            formats = ["html", "inline"]
            synonyms = ["markdown"]

            [[declarations.markdown.requires]]
            on = "host"
            version = { at_least = "0.1" }
        "#;

        let config: Config = toml::from_str(content).unwrap();
        let markdown = &config.declarations["markdown"];
        assert_eq!(markdown.backend, Some(BackendKind::Command));
        assert_eq!(markdown.timeout, Some(20));
        assert_eq!(markdown.settings.as_ref().unwrap()["command"], "pandoc");

        let md = &markdown.mime_types["md"];
        assert!(md.active);
        assert_eq!(md.formats, vec!["html", "inline"]);
        assert_eq!(md.synonyms, vec!["markdown"]);
        assert_eq!(
            markdown.requires,
            vec![Requirement::Host { version: VersionRequirement::AtLeast("0.1".into()) }]
        );
    }

    #[test]
    fn test_builder_lowercases_extensions() {
        let decl = Declaration::new()
            .name("Plain text")
            .mime_type("TXT", MimeTypeSpec::new("text/plain", &["txt"]).icon("text").inactive())
            .requires_converter("libre", VersionRequirement::OneOf(vec!["7".into()]));

        let txt = &decl.mime_types["txt"];
        assert!(!txt.active);
        assert_eq!(txt.icon.as_deref(), Some("text"));
        assert_eq!(decl.requires.len(), 1);
        assert!(format!("{:?}", decl).contains("Plain text"));
    }
}
