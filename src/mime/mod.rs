// Mime resolution
//
// A source file is matched against the mime types claimed by active converters:
// - magic: content sniffing on the leading bytes
// - extension: lookup of the lowercased file extension
//
// Sniffing wins when the sniffed mime is claimed by an active converter; otherwise the
// extension decides. Neither matching means "not previewable".

pub mod magic;

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::debug;

use crate::error::{PreviewError, Result};
use crate::format;

/// One active extension of one converter, as seen by the resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MimeEntry {
    /// Extension key in the converter's capability map
    pub extension: String,
    /// Id of the converter owning this entry
    pub converter: String,
    /// Canonical mime string of the source type
    pub mime: String,
    /// Preview format produced for this extension
    pub format: String,
    pub synonyms: Vec<String>,
    pub icon: Option<String>,
}

/// Active entries keyed by extension
pub type ActiveMimeTypes = BTreeMap<String, MimeEntry>;

/// Resolve the mime entry responsible for `path`.
///
/// With `path_only` the content is not inspected.
pub fn resolve<P: AsRef<Path>>(path: P, active: &ActiveMimeTypes, path_only: bool) -> Result<MimeEntry> {
    let path = path.as_ref();

    if !path_only {
        if let Some(sniffed) = magic::sniff(path)? {
            if let Some(entry) = active.values().find(|e| e.mime == sniffed) {
                debug!("Resolved {} by content as {} ({})", path.display(), sniffed, entry.converter);
                return Ok(entry.clone());
            }
        }
    }

    if let Some(ext) = extension_of(path) {
        if let Some(entry) = lookup_extension(active, &ext) {
            debug!("Resolved {} by extension .{} ({})", path.display(), ext, entry.converter);
            return Ok(entry.clone());
        }
    }

    Err(PreviewError::NotFound(format!("No active converter for {}", path.display())))
}

/// Active entry claiming `ext`, either as its key or as one of its synonyms
pub fn lookup_extension<'a>(active: &'a ActiveMimeTypes, ext: &str) -> Option<&'a MimeEntry> {
    let ext = ext.trim_start_matches('.').to_lowercase();
    active.get(&ext).or_else(|| {
        active
            .values()
            .find(|entry| entry.synonyms.iter().any(|s| s.eq_ignore_ascii_case(&ext)))
    })
}

/// Output extension for the resolved entry
pub fn conversion_ext<P: AsRef<Path>>(path: P, active: &ActiveMimeTypes, path_only: bool) -> Result<String> {
    Ok(resolve(path, active, path_only)?.format)
}

/// Output mime for the resolved entry
pub fn conversion_mime<P: AsRef<Path>>(path: P, active: &ActiveMimeTypes, path_only: bool) -> Result<&'static str> {
    Ok(format::format_mime(&resolve(path, active, path_only)?.format))
}

/// Lowercased extension without the dot
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_lowercase())
}

#[derive(Debug, Clone)]
struct MimeRecord {
    mime: String,
    synonyms: Vec<String>,
}

/// Extension to mime table shared by everything served from the cache.
///
/// Converters add their source types here; extensions already known, either from an
/// earlier registration or from the built-in database, are never overwritten.
#[derive(Debug, Default)]
pub struct MimeTable {
    custom: RwLock<BTreeMap<String, MimeRecord>>,
}

impl MimeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mime for an extension, custom registrations first
    pub fn lookup_by_extension(&self, ext: &str) -> Option<String> {
        let ext = ext.trim_start_matches('.').to_lowercase();
        if let Ok(custom) = self.custom.read() {
            if let Some(record) = custom.get(&ext) {
                return Some(record.mime.clone());
            }
            if let Some(record) = custom.values().find(|r| r.synonyms.iter().any(|s| *s == ext)) {
                return Some(record.mime.clone());
            }
        }
        mime_guess::from_ext(&ext).first_raw().map(|m| m.to_string())
    }

    /// Register `mime` for `ext` unless the extension is already known.
    ///
    /// Returns whether the table changed.
    pub fn register_unless_known(&self, mime: &str, ext: &str, synonyms: &[String]) -> bool {
        if self.lookup_by_extension(ext).is_some() {
            return false;
        }
        let Ok(mut custom) = self.custom.write() else {
            return false;
        };
        custom.insert(
            ext.trim_start_matches('.').to_lowercase(),
            MimeRecord {
                mime: mime.to_string(),
                synonyms: synonyms.iter().map(|s| s.to_lowercase()).collect(),
            },
        );
        true
    }

    /// Mime of a file by its extension, octet-stream when unknown
    pub fn mime_for_path<P: AsRef<Path>>(&self, path: P) -> String {
        extension_of(path.as_ref())
            .and_then(|ext| self.lookup_by_extension(&ext))
            .unwrap_or_else(|| format::OCTET_STREAM.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn entry(ext: &str, converter: &str, mime: &str, format: &str) -> MimeEntry {
        MimeEntry {
            extension: ext.to_string(),
            converter: converter.to_string(),
            mime: mime.to_string(),
            format: format.to_string(),
            synonyms: Vec::new(),
            icon: None,
        }
    }

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::File::create(&path).unwrap().write_all(content).unwrap();
        path
    }

    #[test]
    fn test_content_wins_over_extension() {
        let dir = tempfile::tempdir().unwrap();
        // A PDF disguised with a .txt extension
        let path = write_file(dir.path(), "report.txt", b"%PDF-1.4\n%...");

        let mut active = ActiveMimeTypes::new();
        active.insert("txt".into(), entry("txt", "text", "text/plain", "html"));
        active.insert("pdf".into(), entry("pdf", "pdfview", "application/pdf", "png"));

        let resolved = resolve(&path, &active, false).unwrap();
        assert_eq!(resolved.converter, "pdfview");

        // Skipping the content check falls back to the extension
        let resolved = resolve(&path, &active, true).unwrap();
        assert_eq!(resolved.converter, "text");
    }

    #[test]
    fn test_unclaimed_sniff_falls_back_to_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "report.TXT", b"%PDF-1.4\n%...");

        let mut active = ActiveMimeTypes::new();
        active.insert("txt".into(), entry("txt", "text", "text/plain", "html"));

        assert_eq!(resolve(&path, &active, false).unwrap().converter, "text");
        assert_eq!(conversion_ext(&path, &active, false).unwrap(), "html");
        assert_eq!(conversion_mime(&path, &active, false).unwrap(), "text/html");
    }

    #[test]
    fn test_synonyms_resolve_like_their_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "notes.TEXT", b"plain words");

        let mut txt = entry("txt", "text", "text/plain", "html");
        txt.synonyms = vec!["text".to_string()];
        let mut active = ActiveMimeTypes::new();
        active.insert("txt".into(), txt);

        assert_eq!(lookup_extension(&active, ".Text").unwrap().extension, "txt");
        assert!(lookup_extension(&active, "md").is_none());
        assert_eq!(resolve(&path, &active, true).unwrap().converter, "text");
        assert_eq!(conversion_ext(&path, &active, false).unwrap(), "html");
    }

    #[test]
    fn test_unresolvable_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "archive.bin", b"\x00\x01\x02");

        let err = resolve(&path, &ActiveMimeTypes::new(), false).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_mime_table_keeps_known_extensions() {
        let table = MimeTable::new();

        // Known to the built-in database
        assert!(!table.register_unless_known("application/x-bogus", "pdf", &[]));
        assert_eq!(table.lookup_by_extension("pdf").as_deref(), Some("application/pdf"));

        assert!(table.register_unless_known("text/x-fancy", "fancy", &["fcy".to_string()]));
        assert!(!table.register_unless_known("text/x-other", "fancy", &[]));
        assert_eq!(table.lookup_by_extension(".FANCY").as_deref(), Some("text/x-fancy"));
        assert_eq!(table.lookup_by_extension("fcy").as_deref(), Some("text/x-fancy"));
        assert_eq!(table.mime_for_path("a/b/c.fancy"), "text/x-fancy");
        assert_eq!(table.mime_for_path("noext"), "application/octet-stream");
    }
}
