//! docpreview - document preview conversion engine
//!
//! Command line entry point: loads the configuration, registers the converters and
//! runs one command against them.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use docpreview::cli::{Args, Commands};
use docpreview::config::Config;
use docpreview::error::PreviewError;
use docpreview::registry::{self, ConverterRegistry};
use docpreview::setup::SetupManager;
use docpreview::store::{PreviewObject, PreviewStore};
use docpreview::worker::{PreviewOptions, ResultSink, TransientOutput};

const DEFAULT_CONFIG_FILE: &str = "docpreview.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };

    let setup_manager = SetupManager::new(&config)?;
    setup_logging(&setup_manager.log_dir(), args.verbose)?;
    info!("Starting docpreview {}", registry::HOST_VERSION);

    if let Commands::InitConfig { output } = &args.command {
        config.save_to_file(output)?;
        println!("Configuration written to {}", output.display());
        return Ok(());
    }

    // Registration walks and copies converter assets; keep it off the runtime threads
    let (converters, config) = tokio::task::spawn_blocking(move || {
        let registry = setup_manager.initialize(&mut config)?;
        Ok::<_, PreviewError>((registry, config))
    })
    .await??;
    let converters = Arc::new(converters);
    registry::install(Arc::clone(&converters))?;
    let store = PreviewStore::new(&config.paths.storage_root);

    match args.command {
        Commands::Convert {
            input,
            kind,
            id,
            format,
            asset,
            reload,
            transient,
            output,
        } => {
            convert(
                &converters,
                &store,
                ConvertArgs {
                    input,
                    object: PreviewObject::new(kind, id),
                    format,
                    asset,
                    reload,
                    transient,
                    output,
                },
            )
            .await?;
        }
        Commands::Status => {
            println!("{:<12} {:<20} {:<8} {}", "Converter", "Name", "Status", "Message");
            println!("{}", "-".repeat(70));
            for descriptor in converters.all() {
                let (status, message) = match descriptor.check().await {
                    Some(status) if status.ok => ("ok", status.message),
                    Some(status) => ("failed", status.message),
                    None => ("unknown", String::new()),
                };
                println!("{:<12} {:<20} {:<8} {}", descriptor.id, descriptor.name, status, message);
            }
        }
        Commands::Converters => {
            let active = converters.active_converters();
            let mime_types = converters.active_mime_types();
            for descriptor in converters.all() {
                let state = if active.contains(&descriptor.id) { "active" } else { "inactive" };
                println!(
                    "{} ({}) - {}, threadsafe: {}, timeout: {}s",
                    descriptor.id,
                    descriptor.name,
                    state,
                    descriptor.threadsafe,
                    descriptor.timeout.as_secs()
                );
                for entry in mime_types.values().filter(|e| e.converter == descriptor.id) {
                    println!("    .{:<8} {:<45} -> {}", entry.extension, entry.mime, entry.format);
                }
                if descriptor.configurable() {
                    println!("    settings: {}", descriptor.settings);
                }
            }
        }
        Commands::Mime { input, path_only } => {
            let entry = converters.mime(&input, path_only)?;
            println!("mime:      {}", entry.mime);
            println!("converter: {}", entry.converter);
            println!("format:    {}", entry.format);
            println!("serve as:  {}", converters.conversion_mime(&input, path_only)?);
        }
        Commands::Purge { kind, id } => {
            let object = PreviewObject::new(kind, id);
            if store.purge(&object)? {
                println!("Purged previews of {} {}", object.kind, object.id);
            } else {
                println!("No previews cached for {} {}", object.kind, object.id);
            }
        }
        // Written before the converters are registered
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

struct ConvertArgs {
    input: PathBuf,
    object: PreviewObject,
    format: Option<String>,
    asset: Option<String>,
    reload: bool,
    transient: bool,
    output: Option<PathBuf>,
}

async fn convert(converters: &ConverterRegistry, store: &PreviewStore, args: ConvertArgs) -> Result<()> {
    let format = match args.format {
        Some(format) => format,
        None => converters
            .conversion_ext(&args.input, false)
            .with_context(|| format!("No active converter for {}", args.input.display()))?,
    };
    let target = store.preview_filepath(&args.object, &format)?;
    let transient = args.transient || !converters.cache_previews();

    let options = PreviewOptions {
        preview_format: Some(format.clone()),
        asset: args.asset,
        reload: args.reload,
        bypass_cache: transient,
        ..Default::default()
    };

    let sink: Option<ResultSink<'_>> = if transient {
        Some(Box::new(|output: TransientOutput| {
            info!(
                "Transient preview: target {} bytes, asset {} bytes",
                output.target.as_ref().map(Vec::len).unwrap_or(0),
                output.asset.as_ref().map(Vec::len).unwrap_or(0)
            );
        }))
    } else {
        None
    };

    let Some(bytes) = converters.convert(&args.input, &target, options, sink).await? else {
        anyhow::bail!("Conversion of {} failed, see the log for details", args.input.display());
    };

    match args.output {
        Some(output) => {
            std::fs::write(&output, &bytes)?;
            println!("Preview written to {} ({} bytes)", output.display(), bytes.len());
        }
        None if transient => println!("Transient {} preview: {} bytes", format, bytes.len()),
        None => {
            let cached_at = store
                .preview_mtime(&args.object, &format)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("{} ({} bytes, cached {})", target.display(), bytes.len(), cached_at);
        }
    }

    if !transient && !store.preview_available(&args.object, &format) {
        warn!("Cache target {} is missing after conversion", target.display());
    }
    Ok(())
}

fn setup_logging(log_dir: &Path, verbose: bool) -> Result<()> {
    // Create log directory
    std::fs::create_dir_all(log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(log_dir, "docpreview.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    // Determine log level
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Create console layer; stdout is reserved for command output
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // Create file layer
    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    // Setup layered subscriber and initialize it
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("docpreview.log").display()
    );

    Ok(())
}
