use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{PreviewError, Result};
use super::{Backend, BackendOptions, BackendStatus, ShellApi, ShellCommand, StagingJob, outfile_for};

const LIBRE_OFFICE_BIN: &str = "soffice";

/// Office documents through a headless LibreOffice.
///
/// soffice refuses to run twice against one user profile, so every conversion gets a
/// private `-env:UserInstallation` and the converter is registered as not thread-safe.
pub struct LibreBackend {
    binary: String,
    timeout: Duration,
    shell_api: ShellApi,
}

impl LibreBackend {
    pub fn new(options: BackendOptions) -> Self {
        Self {
            binary: options.setting_str("binary").unwrap_or(LIBRE_OFFICE_BIN).to_string(),
            timeout: options.timeout,
            shell_api: options.shell_api,
        }
    }

    /// soffice filter name for a preview format
    fn convert_to(preview_format: &str) -> &str {
        match preview_format {
            "inline" => "html",
            other => other,
        }
    }

    fn soffice(&self, source: &Path, outdir: &Path, profile: &Path, format: &str) -> ShellCommand {
        ShellCommand::new(&self.binary, "LibreOffice conversion")
            .arg("--headless")
            .arg("--convert-to")
            .arg(format)
            .arg("--outdir")
            .path_arg(outdir)
            .arg(format!("-env:UserInstallation=file://{}", profile.display()))
            .path_arg(source)
            .current_dir(outdir)
    }
}

#[async_trait]
impl Backend for LibreBackend {
    async fn status(&self) -> Option<BackendStatus> {
        let available = ShellCommand::is_available(&self.binary, self.timeout).await;
        let message = if available {
            format!("LibreOffice ({}) is available", self.binary)
        } else {
            format!("LibreOffice ({}) is not available", self.binary)
        };
        Some(BackendStatus::new(message, available))
    }

    async fn convert(&self, job: &StagingJob) -> Result<()> {
        let format = Self::convert_to(&job.preview_format);
        info!("Converting {} to {} with {}", job.source.display(), format, job.name);

        let profile = tempfile::Builder::new()
            .prefix("docpreview-soffice-")
            .tempdir()
            .map_err(|e| PreviewError::Conversion(format!("Failed to create profile directory: {}", e)))?;
        let user_installation = profile.path().join("user_installation");

        self.soffice(&job.source, &job.tmp_dir, &user_installation, format)
            .execute(self.shell_api, self.timeout)
            .await?;

        let produced = job.tmp_dir.join(outfile_for(&job.source, format));
        if !produced.is_file() {
            return Err(PreviewError::Conversion(format!(
                "LibreOffice did not produce {}",
                produced.display()
            )));
        }
        if produced != job.tmp_target {
            tokio::fs::rename(&produced, &job.tmp_target).await?;
        }

        Ok(())
    }
}
