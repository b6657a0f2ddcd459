use async_trait::async_trait;
use std::time::SystemTime;
use tracing::debug;

use crate::error::{PreviewError, Result};
use super::{Backend, BackendOptions, CacheCheck, StagingJob};

/// Default cap on the number of source bytes rendered
const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;

/// Plain text rendered in-process as `txt`, `html` or `inline`
pub struct TextBackend {
    max_bytes: u64,
}

impl TextBackend {
    pub fn new(options: BackendOptions) -> Self {
        Self {
            max_bytes: options.setting_u64("max_bytes").unwrap_or(DEFAULT_MAX_BYTES),
        }
    }

    fn read_source(&self, bytes: &[u8]) -> String {
        let end = (self.max_bytes as usize).min(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).to_string()
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Standalone page around a `<pre>` block
fn html_page(title: &str, text: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n<pre>{}</pre>\n</body>\n</html>\n",
        escape_html(title),
        escape_html(text)
    )
}

/// Fragment for embedding into a host page
fn inline_fragment(text: &str) -> String {
    format!("<pre class=\"docpreview-text\">{}</pre>\n", escape_html(text))
}

fn modified(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[async_trait]
impl Backend for TextBackend {
    /// Stale once the source has been modified after the cached rendition
    async fn valid(&self, check: &CacheCheck) -> bool {
        match (modified(&check.target), modified(&check.source)) {
            (Some(target), Some(source)) => target >= source,
            (Some(_), None) => true,
            _ => false,
        }
    }

    async fn convert(&self, job: &StagingJob) -> Result<()> {
        let bytes = tokio::fs::read(&job.source).await?;
        let text = self.read_source(&bytes);
        debug!("Rendering {} bytes of text as {}", text.len(), job.preview_format);

        let title = job
            .source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let rendered = match job.preview_format.as_str() {
            "txt" => text,
            "html" => html_page(&title, &text),
            "inline" => inline_fragment(&text),
            other => {
                return Err(PreviewError::WrongArgument(format!(
                    "Text converter cannot produce '{}'",
                    other
                )));
            }
        };

        tokio::fs::write(&job.tmp_target, rendered).await?;
        Ok(())
    }
}
