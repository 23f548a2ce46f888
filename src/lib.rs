//! Mizuchi S3 Engine Library
//!
//! S3 storage engine for multipart file uploads. A multipart layer hands each
//! file part to a [`StorageEngine`], which resolves per-file options, sniffs
//! the content type when asked to, and streams the body to S3, optionally
//! fanning it out into several transformed variants.
//!
//! # Features
//!
//! - **Per-file options**: every option is a constant, an async resolver of
//!   the request and file, or a default
//! - **Content sniffing**: byte signatures plus SVG detection on the first chunk
//! - **Transform fan-out**: one source, several derived objects uploaded in parallel
//! - **Managed uploads**: single PutObject or multipart, with progress tracking
//!
//! # Example
//!
//! ```no_run
//! use mizuchi_s3_engine::{config::Config, s3::S3ObjectStore, S3StorageEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let store = S3ObjectStore::new(config.s3_client_config()).await?;
//!     let options = config.storage_options()?.build()?;
//!     let _engine = S3StorageEngine::new(options, Arc::new(store));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod file;
pub mod metrics;
pub mod options;
pub mod s3;
pub mod sniff;
pub mod stream;
pub mod telemetry;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use file::{FileInfo, IncomingFile, RequestContext};
pub use options::{ContentTypeOption, OptionValue, StorageOptions};
pub use upload::{S3StorageEngine, StorageEngine, StorageError, StoredFile, UploadOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
