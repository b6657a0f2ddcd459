//! Preview output formats and their mime types.

/// Formats a converter may produce
pub const FORMATS: &[&str] = &["html", "inline", "txt", "pdf", "png", "jpg", "gif", "xml"];

const FORMAT_MIMES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("inline", "text/html"),
    ("txt", "text/plain"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("gif", "image/gif"),
    ("xml", "text/xml"),
];

/// Fallback mime for formats outside the table
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Mime type served for a preview format
pub fn format_mime(format: &str) -> &'static str {
    let format = format.to_ascii_lowercase();
    FORMAT_MIMES
        .iter()
        .find(|(f, _)| *f == format)
        .map(|(_, mime)| *mime)
        .unwrap_or(OCTET_STREAM)
}

pub fn is_known_format(format: &str) -> bool {
    FORMATS.contains(&format.to_ascii_lowercase().as_str())
}

/// Known formats out of `formats`, as (label, value) pairs for selection lists
pub fn formats_for_select<S: AsRef<str>>(formats: &[S]) -> Vec<(String, String)> {
    FORMATS
        .iter()
        .filter(|f| formats.iter().any(|g| g.as_ref() == **f))
        .map(|f| (f.to_string(), f.to_string()))
        .collect()
}
