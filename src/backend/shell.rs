use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{PreviewError, Result};

/// How external programs are invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellApi {
    /// Subprocess with captured stdout/stderr
    #[default]
    Pipe,
    /// Subprocess writing to the parent's streams
    Inherit,
}

/// Captured output of a finished command
#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
}

/// External program invocation
#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub description: String,
    pub current_dir: Option<PathBuf>,
}

impl ShellCommand {
    /// Create a new command
    pub fn new<S1: Into<String>, S2: Into<String>>(program: S1, description: S2) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            description: description.into(),
            current_dir: None,
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add a path argument
    pub fn path_arg<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Run the command from `dir`
    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Command line for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(|a| a.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Execute the command, killing it once `timeout` has elapsed
    pub async fn execute(&self, api: ShellApi, timeout: Duration) -> Result<ShellOutput> {
        debug!("Executing shell command: {}", self.display());
        debug!("Description: {}", self.description);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null()).kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        match api {
            ShellApi::Pipe => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            ShellApi::Inherit => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }

        let child = cmd.spawn().map_err(|e| PreviewError::Shell {
            command: self.display(),
            status: "not started".to_string(),
            stderr: e.to_string(),
        })?;

        // Dropping the pending wait on timeout kills the child
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(PreviewError::Timeout {
                    command: self.display(),
                    seconds: timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(PreviewError::Shell {
                command: self.display(),
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(ShellOutput { stdout, stderr })
    }

    /// Whether `program --version` runs successfully
    pub async fn is_available(program: &str, timeout: Duration) -> bool {
        ShellCommand::new(program, "Version check")
            .arg("--version")
            .execute(ShellApi::Pipe, timeout)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_arguments() {
        let cmd = ShellCommand::new("soffice", "Conversion")
            .arg("--headless")
            .args(["--convert-to", "pdf"])
            .path_arg("/tmp/a b.docx");
        assert_eq!(cmd.display(), "soffice --headless --convert-to pdf /tmp/a b.docx");
    }

    #[tokio::test]
    async fn test_missing_program_is_shell_error() {
        let err = ShellCommand::new("docpreview-no-such-program", "Missing")
            .execute(ShellApi::Pipe, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::Shell { .. }));
        assert!(!ShellCommand::is_available("docpreview-no-such-program", Duration::from_secs(5)).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_output_and_exit_status() {
        let output = ShellCommand::new("sh", "Echo")
            .args(["-c", "echo hello; echo oops >&2"])
            .execute(ShellApi::Pipe, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");

        let err = ShellCommand::new("sh", "Fail")
            .args(["-c", "exit 3"])
            .execute(ShellApi::Pipe, Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            PreviewError::Shell { status, .. } => assert!(status.contains('3')),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_command() {
        let started = std::time::Instant::now();
        let err = ShellCommand::new("sleep", "Hang")
            .arg("10")
            .execute(ShellApi::Pipe, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
