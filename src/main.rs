//! Mizuchi S3 Engine - store and remove files through the S3 storage engine

use anyhow::Context;
use clap::{Parser, Subcommand};
use mizuchi_s3_engine::{
    config::Config,
    s3::S3ObjectStore,
    stream,
    telemetry,
    FileInfo, IncomingFile, RequestContext, S3StorageEngine, StorageEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Mizuchi S3 Engine - upload files to S3 with per-file options
#[derive(Parser, Debug)]
#[command(name = "mizuchi-s3-engine")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file and print its storage descriptor as JSON
    Upload {
        /// File to upload
        path: PathBuf,

        /// Form field name reported to option resolvers
        #[arg(long, default_value = "file")]
        field: String,

        /// Declared MIME type of the file
        #[arg(long)]
        mime_type: Option<String>,
    },

    /// Delete a stored object
    Delete {
        #[arg(long)]
        bucket: String,

        #[arg(long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    telemetry::init_subscriber(&config.logging)?;
    info!("Starting Mizuchi S3 Engine v{}", mizuchi_s3_engine::VERSION);

    let store = S3ObjectStore::new(config.s3_client_config()).await?;
    let options = config.storage_options()?.build()?;
    let engine = S3StorageEngine::new(options, Arc::new(store));
    let ctx = RequestContext::new();

    match args.command {
        Command::Upload {
            path,
            field,
            mime_type,
        } => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open {:?}", path))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let mut info = FileInfo::new(field, name);
            if let Some(mime_type) = mime_type {
                info = info.with_mime_type(mime_type);
            }

            let outcome = engine
                .handle_file(&ctx, IncomingFile::new(info, stream::from_reader(file)))
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Delete { bucket, key } => {
            engine.remove_object(&bucket, &key).await?;
            println!(
                "{}",
                serde_json::json!({ "deleted": { "bucket": bucket, "key": key } })
            );
        }
    }

    Ok(())
}
