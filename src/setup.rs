use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backend::BackendKind;
use crate::config::Config;
use crate::error::Result;
use crate::registry::{ConverterRegistry, Declaration, MimeTypeSpec};

pub struct SetupManager {
    state_dir: PathBuf,
}

/// Converters shipped with docpreview
pub fn builtin_declarations() -> Vec<(&'static str, Declaration)> {
    vec![
        (
            "libre",
            Declaration::new()
                .name("LibreOffice")
                .backend(BackendKind::Libre)
                .threadsafe(false)
                .timeout_secs(60)
                .settings(json!({ "binary": "soffice" }))
                .mime_type("doc", MimeTypeSpec::new("application/msword", &["pdf", "html", "png"]).icon("word"))
                .mime_type(
                    "docx",
                    MimeTypeSpec::new(
                        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                        &["pdf", "html", "png"],
                    )
                    .icon("word"),
                )
                .mime_type(
                    "odt",
                    MimeTypeSpec::new("application/vnd.oasis.opendocument.text", &["pdf", "html", "png"]).icon("writer"),
                )
                .mime_type("rtf", MimeTypeSpec::new("application/rtf", &["pdf", "html"]).icon("word"))
                .mime_type("xls", MimeTypeSpec::new("application/vnd.ms-excel", &["pdf", "html"]).icon("excel"))
                .mime_type(
                    "xlsx",
                    MimeTypeSpec::new(
                        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                        &["pdf", "html"],
                    )
                    .icon("excel"),
                )
                .mime_type(
                    "ods",
                    MimeTypeSpec::new("application/vnd.oasis.opendocument.spreadsheet", &["pdf", "html"]).icon("calc"),
                )
                .mime_type(
                    "ppt",
                    MimeTypeSpec::new("application/vnd.ms-powerpoint", &["pdf", "png"]).icon("powerpoint"),
                )
                .mime_type(
                    "pptx",
                    MimeTypeSpec::new(
                        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                        &["pdf", "png"],
                    )
                    .icon("powerpoint"),
                )
                .mime_type(
                    "odp",
                    MimeTypeSpec::new("application/vnd.oasis.opendocument.presentation", &["pdf", "png"])
                        .icon("impress"),
                ),
        ),
        (
            "text",
            Declaration::new()
                .name("Plain text")
                .backend(BackendKind::Text)
                .threadsafe(true)
                .mime_type("txt", MimeTypeSpec::new("text/plain", &["html", "inline", "txt"]).synonyms(&["text"]))
                .mime_type("log", MimeTypeSpec::new("text/x-log", &["html", "inline", "txt"]))
                .mime_type("csv", MimeTypeSpec::new("text/csv", &["html", "inline", "txt"]))
                .mime_type(
                    "md",
                    MimeTypeSpec::new("text/markdown", &["html", "inline", "txt"]).synonyms(&["markdown"]),
                ),
        ),
        (
            "image",
            Declaration::new()
                .name("Images")
                .backend(BackendKind::Image)
                .threadsafe(true)
                .settings(json!({ "max_size": 1024 }))
                .mime_type("png", MimeTypeSpec::new("image/png", &["png", "jpg", "gif", "html"]))
                .mime_type(
                    "jpg",
                    MimeTypeSpec::new("image/jpeg", &["jpg", "png", "gif", "html"]).synonyms(&["jpeg", "jpe"]),
                )
                .mime_type("gif", MimeTypeSpec::new("image/gif", &["gif", "png", "jpg", "html"])),
        ),
    ]
}

impl SetupManager {
    /// Create the state directory tree described by `config`
    pub fn new(config: &Config) -> Result<Self> {
        let paths = &config.paths;
        let state_dir = paths.state_dir.clone();

        fs::create_dir_all(state_dir.join("log"))?;
        fs::create_dir_all(&paths.storage_root)?;
        fs::create_dir_all(&paths.converters_dir)?;
        fs::create_dir_all(&paths.public_dir)?;

        Ok(Self { state_dir })
    }

    /// Register the built-in converters and every converter declared in `config`.
    ///
    /// Built-in converters the configuration does not mention are activated with all
    /// their extensions.
    pub fn initialize(&self, config: &mut Config) -> Result<ConverterRegistry> {
        info!("Initializing docpreview in {}", self.state_dir.display());

        let builtins = builtin_declarations();
        self.ensure_default_activation(config, &builtins);

        let mut registry = ConverterRegistry::new(
            &config.paths.converters_dir,
            &config.paths.public_dir,
            config.previews.clone(),
        );

        for (id, declaration) in builtins {
            self.ensure_converter_dir(&config.paths.converters_dir, id, &declaration)?;
            registry.register(id, declaration)?;
        }

        for (id, declaration) in &config.declarations {
            if registry.installed(id) {
                warn!("Declaration {} shadows a built-in converter and is ignored", id);
                continue;
            }
            self.ensure_converter_dir(&config.paths.converters_dir, id, declaration)?;
            registry.register(id, declaration.clone())?;
        }

        info!(
            "Initialization completed: {} converter(s), {} active",
            registry.all().len(),
            registry.active_converters().len()
        );
        Ok(registry)
    }

    fn ensure_default_activation(&self, config: &mut Config, builtins: &[(&'static str, Declaration)]) {
        for (id, declaration) in builtins {
            if config.previews.converters.contains_key(*id) {
                continue;
            }
            info!("Activating built-in converter {} with defaults", id);
            config
                .previews
                .activate(id, declaration.mime_types.keys().cloned());
        }
    }

    /// Converters without an explicit directory get one below `converters_dir`
    fn ensure_converter_dir(&self, converters_dir: &Path, id: &str, declaration: &Declaration) -> Result<()> {
        if declaration.directory.is_none() {
            fs::create_dir_all(converters_dir.join(id))?;
        }
        Ok(())
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use std::collections::BTreeMap;

    fn config(root: &Path) -> Config {
        Config {
            paths: PathsConfig {
                state_dir: root.to_path_buf(),
                storage_root: root.join("previews"),
                converters_dir: root.join("converters"),
                public_dir: root.join("public"),
            },
            previews: Default::default(),
            declarations: BTreeMap::new(),
        }
    }

    #[test]
    fn test_initialize_registers_builtins() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config(root.path());

        let setup = SetupManager::new(&config).unwrap();
        assert!(setup.log_dir().is_dir());

        let registry = setup.initialize(&mut config).unwrap();
        let ids: Vec<_> = registry.all().iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec!["image", "libre", "text"]);
        assert!(root.path().join("converters/libre").is_dir());

        assert!(config.previews.converters["text"].active);
        assert!(registry.convertible("report.docx"));
        assert_eq!(registry.conversion_extension("txt").as_deref(), Some("html"));
        assert!(!registry.find("libre").unwrap().threadsafe);
    }

    #[test]
    fn test_configured_activation_is_kept() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config(root.path());
        config.previews.activate("libre", ["docx"]).deactivate("libre");

        let registry = SetupManager::new(&config).unwrap().initialize(&mut config).unwrap();
        assert!(!registry.convertible("report.docx"));
        assert!(registry.convertible("notes.txt"));
    }

    #[test]
    fn test_declared_command_converter() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config(root.path());
        config.declarations.insert(
            "markdown".to_string(),
            Declaration::new()
                .backend(BackendKind::Command)
                .settings(json!({ "command": "pandoc", "args": ["{input}", "-o", "{output}"] }))
                .mime_type("mdown", MimeTypeSpec::new("text/markdown", &["html"])),
        );
        config.previews.activate("markdown", ["mdown"]);

        let registry = SetupManager::new(&config).unwrap().initialize(&mut config).unwrap();
        let markdown = registry.find("markdown").unwrap();
        assert_eq!(markdown.kind, Some(BackendKind::Command));
        assert_eq!(registry.conversion_extension("mdown").as_deref(), Some("html"));
    }
}
