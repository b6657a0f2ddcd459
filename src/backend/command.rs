use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{PreviewError, Result};
use super::{Backend, BackendOptions, BackendStatus, ShellApi, ShellCommand, StagingJob};

/// Any external program declared in configuration.
///
/// Settings:
/// - `command`: program to run (required)
/// - `args`: argument template; `{input}`, `{output}`, `{outdir}`, `{outfile}` and
///   `{format}` are substituted per conversion
///
/// Programs that ignore `{output}` and write `<stem>.<format>` into `{outdir}` are
/// picked up as well.
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    shell_api: ShellApi,
}

impl CommandBackend {
    pub fn new(options: BackendOptions) -> Result<Self> {
        let program = options
            .setting_str("command")
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PreviewError::WrongArgument("Command converter needs a 'command' setting".to_string()))?
            .to_string();
        let mut args = options.setting_strings("args")?;
        if args.is_empty() {
            args = vec!["{input}".to_string(), "{output}".to_string()];
        }
        Ok(Self {
            program,
            args,
            timeout: options.timeout,
            shell_api: options.shell_api,
        })
    }

    fn substitute_args(&self, job: &StagingJob) -> Vec<String> {
        let input = job.source.to_string_lossy();
        let output = job.tmp_target.to_string_lossy();
        let outdir = job.tmp_dir.to_string_lossy();
        let outfile = job.outfile();

        let values = [
            ("input", &*input),
            ("output", &*output),
            ("outdir", &*outdir),
            ("outfile", outfile.as_str()),
            ("format", job.preview_format.as_str()),
        ];
        self.args.iter().map(|arg| substitute(arg, &values)).collect()
    }

    fn command(&self, job: &StagingJob) -> ShellCommand {
        ShellCommand::new(&self.program, format!("{} conversion", job.name))
            .args(self.substitute_args(job))
            .current_dir(&job.tmp_dir)
    }
}

/// Replace `{name}` placeholders in one left-to-right pass; substituted text is never
/// scanned again and unknown placeholders stay as written.
fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        result.push_str(&rest[..start]);
        rest = &rest[start..];
        let placeholder = values
            .iter()
            .find(|(name, _)| rest[1..].starts_with(*name) && rest[1 + name.len()..].starts_with('}'));
        match placeholder {
            Some(&(name, value)) => {
                result.push_str(value);
                rest = &rest[name.len() + 2..];
            }
            None => {
                result.push('{');
                rest = &rest[1..];
            }
        }
    }
    result.push_str(rest);
    result
}

async fn adopt_outfile(produced: &Path, target: &Path) -> Result<bool> {
    if target.is_file() {
        return Ok(true);
    }
    if produced.is_file() {
        tokio::fs::rename(produced, target).await?;
        return Ok(true);
    }
    Ok(false)
}

#[async_trait]
impl Backend for CommandBackend {
    async fn status(&self) -> Option<BackendStatus> {
        let available = ShellCommand::is_available(&self.program, self.timeout).await;
        let message = if available {
            format!("{} is available", self.program)
        } else {
            format!("{} is not available", self.program)
        };
        Some(BackendStatus::new(message, available))
    }

    async fn convert(&self, job: &StagingJob) -> Result<()> {
        let cmd = self.command(job);
        info!("Converting {} with {}", job.source.display(), cmd.display());
        cmd.execute(self.shell_api, self.timeout).await?;

        let produced = job.tmp_dir.join(job.outfile());
        if adopt_outfile(&produced, &job.tmp_target).await? {
            Ok(())
        } else {
            Err(PreviewError::Conversion(format!(
                "{} did not produce {}",
                self.program, job.target_file
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(settings: serde_json::Value) -> BackendOptions {
        BackendOptions {
            settings,
            timeout: Duration::from_secs(5),
            shell_api: ShellApi::Pipe,
        }
    }

    fn job(source: &Path, dir: &Path, format: &str) -> StagingJob {
        StagingJob {
            converter: "markdown".into(),
            name: "Markdown".into(),
            source: source.to_path_buf(),
            preview_format: format.into(),
            format: String::new(),
            target_file: format!("index.{}", format),
            target_ext: format.into(),
            asset: None,
            assets: Vec::new(),
            tmp_dir: dir.to_path_buf(),
            tmp_target: dir.join(format!("index.{}", format)),
            timeout: Duration::from_secs(5),
            shell_api: ShellApi::Pipe,
        }
    }

    #[test]
    fn test_substitutes_placeholders() {
        let backend = CommandBackend::new(options(json!({
            "command": "pandoc",
            "args": ["{input}", "-t", "{format}", "-o", "{output}", "--resource-path={outdir}"]
        })))
        .unwrap();
        let job = job(Path::new("/data/readme.md"), Path::new("/tmp/stage"), "html");

        assert_eq!(
            backend.command(&job).display(),
            "pandoc /data/readme.md -t html -o /tmp/stage/index.html --resource-path=/tmp/stage"
        );
    }

    #[test]
    fn test_substituted_paths_are_not_rescanned() {
        let backend = CommandBackend::new(options(json!({
            "command": "conv",
            "args": ["{input}", "{output}", "{unknown}", "{format"]
        })))
        .unwrap();
        let job = job(Path::new("/data/{outdir}-{format}.md"), Path::new("/tmp/stage"), "html");

        assert_eq!(
            backend.substitute_args(&job),
            vec!["/data/{outdir}-{format}.md", "/tmp/stage/index.html", "{unknown}", "{format"]
        );
    }

    #[test]
    fn test_default_arguments() {
        let backend = CommandBackend::new(options(json!({"command": "conv"}))).unwrap();
        assert_eq!(backend.args, vec!["{input}", "{output}"]);
    }

    #[test]
    fn test_blank_command_is_rejected() {
        let result = CommandBackend::new(options(json!({"command": "  "})));
        assert!(matches!(result, Err(PreviewError::WrongArgument(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_adopts_tool_named_output() {
        let src = tempfile::tempdir().unwrap();
        let stage = tempfile::tempdir().unwrap();
        let source = src.path().join("notes.txt");
        std::fs::write(&source, "hello").unwrap();

        let backend = CommandBackend::new(options(json!({
            "command": "cp",
            "args": ["{input}", "{outdir}/{outfile}"]
        })))
        .unwrap();
        let job = job(&source, stage.path(), "txt");
        backend.convert(&job).await.unwrap();

        assert_eq!(std::fs::read_to_string(&job.tmp_target).unwrap(), "hello");
        assert!(!stage.path().join("notes.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_output_is_conversion_error() {
        let stage = tempfile::tempdir().unwrap();
        let backend = CommandBackend::new(options(json!({"command": "true", "args": ["{input}"]}))).unwrap();

        let err = backend
            .convert(&job(Path::new("/data/readme.md"), stage.path(), "html"))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::Conversion(_)));
    }
}
