//! S3 client module
//!
//! [`ObjectStore`] is the storage contract the engine depends on: a managed
//! upload of a streamed body, and a single-object delete. [`S3ObjectStore`]
//! implements it on `aws-sdk-s3`.
//!
//! # Example
//!
//! ```no_run
//! use mizuchi_s3_engine::s3::{S3ClientConfig, S3ObjectStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = S3ClientConfig::new("us-east-1");
//! config.endpoint = Some("http://localhost:9000".to_string());
//! config.access_key = Some("minioadmin".to_string());
//! config.secret_key = Some("minioadmin".to_string());
//!
//! let store = S3ObjectStore::new(config).await?;
//! assert_eq!(
//!     store.object_url("uploads", "a b.txt"),
//!     "http://localhost:9000/uploads/a%20b.txt"
//! );
//! # Ok(())
//! # }
//! ```
//!
//! # Tracing
//!
//! | Operation | Span Name |
//! |-----------|-----------|
//! | PutObject | `s3.put_object` |
//! | CreateMultipartUpload + parts + Complete | `s3.multipart_upload` |
//! | UploadPart | `s3.upload_part` |
//! | DeleteObject | `s3.delete_object` |

pub mod credentials;
mod managed;

pub use credentials::{Credentials, CredentialsError, CredentialsProvider};
pub use managed::{MAX_PARTS, MAX_PART_SIZE, MIN_PART_SIZE};

use crate::options::{Acl, Metadata, ServerSideEncryption, StorageClass};
use crate::stream::FileStream;
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Default body size above which uploads go multipart
pub const DEFAULT_MULTIPART_THRESHOLD: usize = 8 * 1024 * 1024;

/// Default multipart part size
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Characters escaped in object keys when building locations
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// S3 client errors
#[derive(Error, Debug)]
pub enum StorageClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Credentials error: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("Request error: {0}")]
    RequestError(String),

    #[error("Response error: {0}")]
    ResponseError(String),

    #[error("Body read error: {0}")]
    BodyError(#[from] std::io::Error),

    #[error("Multipart upload error: {0}")]
    MultipartError(String),
}

impl StorageClientError {
    pub(crate) fn request<E>(operation: &str, err: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        StorageClientError::RequestError(format!("{} failed: {}", operation, DisplayErrorContext(&err)))
    }
}

/// Everything sent with an object except its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectParams {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub acl: Option<Acl>,
    pub metadata: Option<Metadata>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub storage_class: Option<StorageClass>,
    pub server_side_encryption: Option<ServerSideEncryption>,
    pub sse_kms_key_id: Option<String>,
}

/// Progress event emitted while a body is transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    /// Bytes transferred so far
    pub loaded: u64,
    /// Final body size, once known
    pub total: Option<u64>,
    /// Multipart part number, for multipart transfers
    pub part: Option<u32>,
}

/// Receiver of [`UploadProgress`] events
pub type ProgressListener = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutput {
    pub location: String,
    pub etag: String,
    pub version_id: Option<String>,
}

/// Storage client contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `params.bucket`/`params.key`.
    ///
    /// Implementations stream the body and emit progress events. At least
    /// one event must carry the final size in `total`.
    async fn upload(
        &self,
        params: ObjectParams,
        body: FileStream,
        progress: ProgressListener,
    ) -> Result<UploadOutput, StorageClientError>;

    /// Delete one object
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageClientError>;
}

/// S3 client configuration
#[derive(Clone)]
pub struct S3ClientConfig {
    pub region: String,
    /// Custom endpoint for S3-compatible services. Implies path-style addressing.
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,
    pub force_path_style: bool,
    pub multipart_threshold: usize,
    pub part_size: usize,
    pub max_attempts: u32,
}

impl S3ClientConfig {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            session_token: None,
            force_path_style: false,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
            max_attempts: 3,
        }
    }

    /// Check the limits S3 puts on multipart uploads
    pub fn validate(&self) -> Result<(), StorageClientError> {
        if self.region.trim().is_empty() {
            return Err(StorageClientError::ConfigError("region is required".into()));
        }
        if self.multipart_threshold == 0 {
            return Err(StorageClientError::ConfigError(
                "multipart_threshold must be greater than 0".into(),
            ));
        }
        if self.part_size < MIN_PART_SIZE || self.part_size as u64 > MAX_PART_SIZE {
            return Err(StorageClientError::ConfigError(format!(
                "part_size {} must be between {} and {} bytes",
                self.part_size, MIN_PART_SIZE, MAX_PART_SIZE
            )));
        }
        Ok(())
    }

    fn path_style(&self) -> bool {
        self.force_path_style || self.endpoint.is_some()
    }
}

impl fmt::Debug for S3ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3ClientConfig")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key.as_ref().map(|_| "***"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "***"))
            .field("force_path_style", &self.force_path_style)
            .field("multipart_threshold", &self.multipart_threshold)
            .field("part_size", &self.part_size)
            .finish_non_exhaustive()
    }
}

/// [`ObjectStore`] backed by `aws-sdk-s3`
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    config: S3ClientConfig,
}

impl S3ObjectStore {
    /// Create a store.
    ///
    /// Static credentials from the config win; otherwise the SDK default
    /// chain (environment, profile, instance metadata) is used.
    pub async fn new(config: S3ClientConfig) -> Result<Self, StorageClientError> {
        config.validate()?;

        let retry_config = RetryConfig::standard().with_max_attempts(config.max_attempts.max(1));
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .retry_config(retry_config);

        if let Some(credentials) = CredentialsProvider::from_config(&config)? {
            loader = loader.credentials_provider(credentials.into_provider());
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        builder = builder.force_path_style(config.path_style());

        tracing::debug!(
            region = %config.region,
            endpoint = ?config.endpoint,
            path_style = config.path_style(),
            "Created S3 client"
        );

        Ok(Self {
            client: Client::from_conf(builder.build()),
            config,
        })
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: Client, config: S3ClientConfig) -> Result<Self, StorageClientError> {
        config.validate()?;
        Ok(Self { client, config })
    }

    /// Get the region
    pub fn region(&self) -> &str {
        &self.config.region
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> String {
        self.config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", self.config.region))
    }

    /// Public URL of an object
    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        let key = utf8_percent_encode(key, KEY_ENCODE_SET);
        if self.config.path_style() {
            format!("{}/{}/{}", self.endpoint().trim_end_matches('/'), bucket, key)
        } else {
            format!("https://{}.s3.{}.amazonaws.com/{}", bucket, self.config.region, key)
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        params: ObjectParams,
        body: FileStream,
        progress: ProgressListener,
    ) -> Result<UploadOutput, StorageClientError> {
        self.managed_upload(&params, body, &progress).await
    }

    #[tracing::instrument(
        name = "s3.delete_object",
        skip(self),
        fields(s3.bucket = %bucket, s3.key = %key, http.method = "DELETE"),
        err
    )]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageClientError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageClientError::request("DeleteObject", e))?;

        tracing::info!("DeleteObject completed");
        Ok(())
    }
}
