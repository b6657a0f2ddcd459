use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// No responsible converter, unknown converter id, or unresolvable mime type.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad argument: {0}")]
    BadArgument(String),

    #[error("Wrong argument: {0}")]
    WrongArgument(String),

    #[error("Shell command failed ({status}): {command}\n{stderr}")]
    Shell {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Shell command timed out after {seconds}s: {command}")]
    Timeout { command: String, seconds: u64 },

    #[error("Requirement not met: {0}")]
    Requirement(String),

    #[error("Asset error: {0}")]
    Asset(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Conversion error: {0}")]
    Conversion(String),
}

impl PreviewError {
    /// True for the "no preview available" outcome, which callers treat as normal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PreviewError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, PreviewError>;
