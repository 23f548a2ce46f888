//! Configuration module for the S3 storage engine
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.
//!
//! ```yaml
//! s3:
//!   region: us-east-1
//!   endpoint: ${S3_ENDPOINT:-http://localhost:9000}
//! upload:
//!   multipart_threshold: 16777216
//! storage:
//!   bucket: uploads
//!   key_prefix: "incoming/"
//!   acl: public-read
//!   content_type: auto
//!   metadata:
//!     source: cli
//! logging:
//!   level: debug
//!   format: json
//! ```

use crate::options::{ConfigurationError, StorageOptionsBuilder};
use crate::s3::{
    S3ClientConfig, DEFAULT_MULTIPART_THRESHOLD, DEFAULT_PART_SIZE, MAX_PART_SIZE, MIN_PART_SIZE,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;
mod storage;

pub use loader::ConfigLoader;
pub use storage::storage_options;

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid storage options: {0}")]
    OptionsError(#[from] ConfigurationError),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub s3: S3Config,
    #[serde(default)]
    pub upload: UploadConfig,
    /// Raw engine options, classified by [`storage_options`]
    #[serde(default)]
    pub storage: serde_yaml::Value,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.region.trim().is_empty() {
            return Err(ConfigError::ValidationError("s3.region cannot be empty".into()));
        }

        if let Some(endpoint) = &self.s3.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid s3.endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
        }

        if self.s3.access_key.is_some() != self.s3.secret_key.is_some() {
            return Err(ConfigError::ValidationError(
                "s3.access_key and s3.secret_key must be set together".into(),
            ));
        }

        if self.upload.part_size < MIN_PART_SIZE || self.upload.part_size as u64 > MAX_PART_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "Invalid upload.part_size {}: must be between {} and {} bytes",
                self.upload.part_size, MIN_PART_SIZE, MAX_PART_SIZE
            )));
        }

        if self.upload.multipart_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "upload.multipart_threshold must be greater than 0".into(),
            ));
        }

        match self.logging.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid logging level '{}': must be one of trace, debug, info, warn, error",
                    other
                )))
            }
        }

        // Type-check the storage section now so bad values fail at load time
        storage_options(&self.storage)?;

        Ok(())
    }

    /// Storage options builder for the `storage` section
    pub fn storage_options(&self) -> Result<StorageOptionsBuilder, ConfigurationError> {
        storage_options(&self.storage)
    }

    /// Client configuration for [`crate::s3::S3ObjectStore`]
    pub fn s3_client_config(&self) -> S3ClientConfig {
        S3ClientConfig {
            region: self.s3.region.clone(),
            endpoint: self.s3.endpoint.clone(),
            access_key: self.s3.access_key.clone(),
            secret_key: self.s3.secret_key.clone(),
            session_token: self.s3.session_token.clone(),
            force_path_style: self.s3.force_path_style,
            multipart_threshold: self.upload.multipart_threshold,
            part_size: self.upload.part_size,
            max_attempts: self.s3.max_attempts,
        }
    }
}

/// S3 backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: usize,
    #[serde(default = "default_part_size")]
    pub part_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: default_multipart_threshold(),
            part_size: default_part_size(),
        }
    }
}

fn default_multipart_threshold() -> usize {
    DEFAULT_MULTIPART_THRESHOLD
}

fn default_part_size() -> usize {
    DEFAULT_PART_SIZE
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level when `RUST_LOG` is unset. Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
