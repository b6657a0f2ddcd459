use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a preview of a file
    Convert {
        /// Source file
        #[arg(short, long)]
        input: PathBuf,

        /// Kind of object the preview belongs to
        #[arg(short, long, default_value = "attachment")]
        kind: String,

        /// Id of the object the preview belongs to
        #[arg(long, default_value = "0")]
        id: String,

        /// Preview format, defaults to the one configured for the extension
        #[arg(short, long)]
        format: Option<String>,

        /// Asset to return in place of the main rendition
        #[arg(short, long)]
        asset: Option<String>,

        /// Convert again even if a cached preview is valid
        #[arg(long)]
        reload: bool,

        /// Do not touch the cache
        #[arg(long)]
        transient: bool,

        /// Write the preview here instead of printing a summary
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check every registered converter backend
    Status,

    /// List registered converters and their active extensions
    Converters,

    /// Resolve the mime type and preview format of a file
    Mime {
        /// File to inspect
        #[arg(short, long)]
        input: PathBuf,

        /// Use the file name only, never the content
        #[arg(long)]
        path_only: bool,
    },

    /// Remove all cached previews of an object
    Purge {
        #[arg(short, long, default_value = "attachment")]
        kind: String,

        #[arg(long)]
        id: String,
    },

    /// Write the effective configuration to a file
    InitConfig {
        #[arg(short, long, default_value = "docpreview.toml")]
        output: PathBuf,
    },
}
